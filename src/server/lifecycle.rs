// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Server lifecycle hooks.
//!
//! Hooks observe `Start` right before the server begins accepting and
//! `Stop` after the listener closed. Start runs in registration order, Stop
//! in reverse. A hook marked critical aborts server creation when its Start
//! fails, stopping the hooks that already started; a non-critical failure
//! is logged and ignored.

use log::{error, warn};

use crate::error::Error;
use crate::server::ServerHandle;

/// Boxed error hooks may raise on start.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// A start/stop observer of the server lifecycle.
pub trait LifecycleHook: Send + Sync {
    /// A short name for logs and lifecycle errors.
    fn name(&self) -> &str {
        "lifecycle-hook"
    }

    /// Called with the server handle before the first accept.
    fn on_start(&self, server: &ServerHandle) -> Result<(), HookError>;

    /// Called after the listener closed. Must not fail.
    fn on_stop(&self, server: &ServerHandle);

    /// Critical hooks gate server creation.
    fn is_critical(&self) -> bool {
        false
    }
}

/// Runs Start over `hooks` in registration order.
///
/// On a critical failure, the already-started prefix is stopped in reverse
/// order and the failure is surfaced as [`Error::Lifecycle`].
pub(crate) fn run_start(
    hooks: &[Box<dyn LifecycleHook>],
    server: &ServerHandle,
) -> Result<(), Error> {
    for (idx, hook) in hooks.iter().enumerate() {
        match hook.on_start(server) {
            Ok(()) => {}
            Err(source) if hook.is_critical() => {
                error!("critical service {} failed to start: {}", hook.name(), source);
                run_stop(&hooks[..idx], server);
                return Err(Error::Lifecycle {
                    service: hook.name().to_owned(),
                    source,
                });
            }
            Err(source) => {
                warn!("lifecycle hook {} failed to start: {}", hook.name(), source);
            }
        }
    }
    Ok(())
}

/// Runs Stop over `hooks` in reverse registration order.
pub(crate) fn run_stop(hooks: &[Box<dyn LifecycleHook>], server: &ServerHandle) {
    for hook in hooks.iter().rev() {
        hook.on_stop(server);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Recorder {
        label: &'static str,
        critical: bool,
        fail_start: bool,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl LifecycleHook for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        fn on_start(&self, _server: &ServerHandle) -> Result<(), HookError> {
            self.events.lock().unwrap().push(format!("start:{}", self.label));
            if self.fail_start {
                return Err("boom".into());
            }
            Ok(())
        }

        fn on_stop(&self, _server: &ServerHandle) {
            self.events.lock().unwrap().push(format!("stop:{}", self.label));
        }

        fn is_critical(&self) -> bool {
            self.critical
        }
    }

    fn hook(
        label: &'static str,
        critical: bool,
        fail_start: bool,
        events: &Arc<Mutex<Vec<String>>>,
    ) -> Box<dyn LifecycleHook> {
        Box::new(Recorder {
            label,
            critical,
            fail_start,
            events: events.clone(),
        })
    }

    #[test]
    fn start_ordered_stop_reversed() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let hooks = vec![
            hook("a", false, false, &events),
            hook("b", false, false, &events),
        ];
        let server = ServerHandle::detached();

        run_start(&hooks, &server).unwrap();
        run_stop(&hooks, &server);

        assert_eq!(
            *events.lock().unwrap(),
            vec!["start:a", "start:b", "stop:b", "stop:a"]
        );
    }

    #[test]
    fn critical_failure_unwinds_started_prefix() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let hooks = vec![
            hook("a", false, false, &events),
            hook("b", true, true, &events),
            hook("c", false, false, &events),
        ];
        let server = ServerHandle::detached();

        let err = run_start(&hooks, &server).unwrap_err();
        assert!(matches!(err, Error::Lifecycle { ref service, .. } if service == "b"));
        assert_eq!(*events.lock().unwrap(), vec!["start:a", "start:b", "stop:a"]);
    }

    #[test]
    fn non_critical_failure_is_ignored() {
        let events = Arc::new(Mutex::new(Vec::new()));
        static STARTS: AtomicUsize = AtomicUsize::new(0);

        struct Counting;
        impl LifecycleHook for Counting {
            fn on_start(&self, _server: &ServerHandle) -> Result<(), HookError> {
                STARTS.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            fn on_stop(&self, _server: &ServerHandle) {}
        }

        let hooks: Vec<Box<dyn LifecycleHook>> = vec![
            hook("flaky", false, true, &events),
            Box::new(Counting),
        ];
        let server = ServerHandle::detached();
        run_start(&hooks, &server).unwrap();
        assert_eq!(STARTS.load(Ordering::SeqCst), 1);
    }
}
