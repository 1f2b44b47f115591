// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The client's pool of idle persistent connections.
//!
//! Entries are tagged `(secure, host, port)` and held exclusively by the
//! pool; a check-out transfers ownership to the caller until the connection
//! is returned or closed. While a connection is out of the pool, the
//! eviction task cannot observe it, which is the whole of the close-guard:
//! in-flight and upgraded connections are simply not the pool's to dispose.
//!
//! A cooperative eviction task wakes on an interval, drops entries past the
//! idle timeout, trims the oldest entries down to the size cap, and dies
//! when the pool is empty. It is restarted by the next insertion.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::connection::BufferedConnection;

/// Tag identifying which origin an idle connection can serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OriginKey {
    pub secure: bool,
    pub host: String,
    pub port: u16,
}

struct IdleEntry {
    key: OriginKey,
    conn: BufferedConnection,
    queued_at: Instant,
}

struct PoolState {
    entries: VecDeque<IdleEntry>,
    evictor_running: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    idle_timeout: Duration,
    eviction_interval: Duration,
    queue_size: usize,
}

/// The per-client connection pool. All operations serialize on one mutex;
/// lookup is FIFO within a tag.
pub(crate) struct ConnectionManager {
    shared: Arc<PoolShared>,
}

impl ConnectionManager {
    pub fn new(
        idle_timeout: Duration,
        eviction_interval: Duration,
        queue_size: usize,
    ) -> ConnectionManager {
        ConnectionManager {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    entries: VecDeque::new(),
                    evictor_running: false,
                }),
                idle_timeout,
                eviction_interval,
                queue_size,
            }),
        }
    }

    /// Takes the oldest healthy idle connection for `key`, if any.
    ///
    /// Entries that dwelled past the idle timeout or fail the non-blocking
    /// liveness probe are disposed of and the lookup continues.
    pub fn checkout(&self, key: &OriginKey) -> Option<BufferedConnection> {
        let mut state = self.shared.state.lock().unwrap_or_else(|p| p.into_inner());

        loop {
            let idx = state.entries.iter().position(|e| &e.key == key)?;
            let mut entry = state.entries.remove(idx)?;

            if entry.queued_at.elapsed() >= self.shared.idle_timeout {
                trace!("pool: dropping stale connection to {}:{}", key.host, key.port);
                let _ = entry.conn.shutdown();
                continue;
            }
            if !entry.conn.probe_healthy() {
                trace!("pool: dropping dead connection to {}:{}", key.host, key.port);
                let _ = entry.conn.shutdown();
                continue;
            }

            debug!("pool: reusing connection to {}:{}", key.host, key.port);
            return Some(entry.conn);
        }
    }

    /// Returns a connection after a cleanly finished round-trip on which the
    /// response permitted keep-alive.
    pub fn checkin(&self, key: OriginKey, conn: BufferedConnection) {
        let mut state = self.shared.state.lock().unwrap_or_else(|p| p.into_inner());
        debug!("pool: parking connection to {}:{}", key.host, key.port);
        state.entries.push_back(IdleEntry {
            key,
            conn,
            queued_at: Instant::now(),
        });

        if !state.evictor_running {
            state.evictor_running = true;
            spawn_evictor(Arc::downgrade(&self.shared));
        }
    }

    /// Current number of idle entries.
    #[cfg(test)]
    pub fn idle_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entries
            .len()
    }

    /// One eviction pass: drop timed-out entries, then trim the oldest until
    /// the size cap holds.
    #[cfg(test)]
    pub fn evict_now(&self) {
        evict_once(&self.shared);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap_or_else(|p| p.into_inner());
        for entry in state.entries.drain(..) {
            let _ = entry.conn.shutdown();
        }
    }
}

fn spawn_evictor(shared: Weak<PoolShared>) {
    thread::Builder::new()
        .name("scamper-pool-evictor".into())
        .spawn(move || loop {
            let interval = match shared.upgrade() {
                Some(shared) => shared.eviction_interval,
                None => return,
            };
            thread::sleep(interval);

            let shared = match shared.upgrade() {
                Some(shared) => shared,
                None => return,
            };
            if !evict_once(&shared) {
                return;
            }
        })
        .ok();
}

// Returns false when the pool drained and the evictor should terminate.
fn evict_once(shared: &PoolShared) -> bool {
    let mut state = shared.state.lock().unwrap_or_else(|p| p.into_inner());

    let before = state.entries.len();
    let mut kept = VecDeque::with_capacity(before);
    for entry in state.entries.drain(..) {
        if entry.queued_at.elapsed() >= shared.idle_timeout {
            let _ = entry.conn.shutdown();
        } else {
            kept.push_back(entry);
        }
    }
    state.entries = kept;

    while state.entries.len() > shared.queue_size {
        if let Some(oldest) = state.entries.pop_front() {
            let _ = oldest.conn.shutdown();
        }
    }

    if before != state.entries.len() {
        debug!("pool: evicted {} connection(s)", before - state.entries.len());
    }

    if state.entries.is_empty() {
        state.evictor_running = false;
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::pipe;
    use std::io::Write;

    fn key() -> OriginKey {
        OriginKey {
            secure: false,
            host: "localhost".into(),
            port: 80,
        }
    }

    fn idle_conn() -> BufferedConnection {
        // Keep the far end alive so the probe sees a quiet, open pipe.
        let (tx, rx) = pipe();
        std::mem::forget(tx);
        BufferedConnection::new(Box::new(rx), 4096)
    }

    #[test]
    fn checkout_is_fifo_within_tag() {
        let pool = ConnectionManager::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
            8,
        );
        let first = idle_conn();
        let first_id = first.handle().id();
        pool.checkin(key(), first);
        pool.checkin(key(), idle_conn());

        let got = pool.checkout(&key()).unwrap();
        assert_eq!(got.handle().id(), first_id);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn miss_on_other_origin() {
        let pool = ConnectionManager::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
            8,
        );
        pool.checkin(key(), idle_conn());

        let other = OriginKey {
            secure: true,
            host: "localhost".into(),
            port: 443,
        };
        assert!(pool.checkout(&other).is_none());
    }

    #[test]
    fn unsolicited_bytes_fail_the_probe() {
        let pool = ConnectionManager::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
            8,
        );
        let (mut tx, rx) = pipe();
        let conn = BufferedConnection::new(Box::new(rx), 4096);
        pool.checkin(key(), conn);
        tx.write_all(b"unsolicited").unwrap();
        std::mem::forget(tx);

        assert!(pool.checkout(&key()).is_none());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn stale_entries_dropped_on_checkout() {
        let pool = ConnectionManager::new(
            Duration::from_millis(0),
            Duration::from_secs(60),
            8,
        );
        pool.checkin(key(), idle_conn());
        assert!(pool.checkout(&key()).is_none());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn eviction_trims_to_cap() {
        let pool = ConnectionManager::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
            2,
        );
        for _ in 0..5 {
            pool.checkin(key(), idle_conn());
        }
        assert_eq!(pool.idle_count(), 5);
        pool.evict_now();
        assert_eq!(pool.idle_count(), 2);
    }
}
