// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The HTTP server.
//!
//! A [`ServerApplication`] collects handlers, filters, error handlers and
//! lifecycle hooks, then [`ServerApplication::create`] binds the listener,
//! runs the Start hooks and begins accepting. The runtime server is
//! immutable; [`HttpServer::close`] stops accepting, drains in-flight
//! requests best-effort and runs the Stop hooks in reverse order.
//!
//! # Example
//!
//! ```no_run
//! use scamper::server::ServerApplication;
//! use scamper::{Handled, HttpResponse};
//!
//! let server = ServerApplication::new()
//!     .incoming(|_req: scamper::HttpRequest| Ok(Handled::Done(HttpResponse::text("hello world"))))
//!     .create("127.0.0.1:8080")
//!     .unwrap();
//! println!("listening on {}", server.addr());
//! ```

pub(crate) mod acceptor;
pub mod lifecycle;
pub(crate) mod pipeline;
pub(crate) mod task_pool;

use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use log::{debug, info};

use crate::codec::CodecLimits;
use crate::connection::{Stream as _, TlsAcceptor};
use crate::error::{Error, Result};
use crate::filters::{ErrorHandler, RequestHandler, ResponseFilter};
use crate::router::Router;

use self::lifecycle::LifecycleHook;
use self::task_pool::TaskPool;

/// Keep-alive policy: idle timeout between requests and the request cap
/// per connection.
#[derive(Debug, Clone, Copy)]
pub struct KeepAlive {
    pub idle_timeout: Duration,
    pub max_requests: u32,
}

/// Where a server is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Configuring,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl ServerState {
    fn from_u8(v: u8) -> ServerState {
        match v {
            0 => ServerState::Configuring,
            1 => ServerState::Starting,
            2 => ServerState::Running,
            3 => ServerState::Stopping,
            _ => ServerState::Stopped,
        }
    }
}

/// A cheap, cloneable reference to a running server, carried in request
/// attributes and handed to lifecycle hooks.
#[derive(Clone)]
pub struct ServerHandle {
    addr: Option<SocketAddr>,
    state: Arc<AtomicU8>,
}

impl ServerHandle {
    /// The bound address.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// A handle bound to nothing, for exercising hooks in tests.
    #[cfg(test)]
    pub(crate) fn detached() -> ServerHandle {
        ServerHandle {
            addr: None,
            state: Arc::new(AtomicU8::new(ServerState::Configuring as u8)),
        }
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("addr", &self.addr)
            .field("state", &self.state())
            .finish()
    }
}

pub(crate) struct ServerConfig {
    pub backlog_size: u32,
    pub pool_size: usize,
    pub queue_size: usize,
    pub buffer_size: usize,
    pub read_timeout: Duration,
    pub keep_alive: Option<KeepAlive>,
    pub limits: CodecLimits,
}

pub(crate) struct ServerShared {
    pub addr: SocketAddr,
    pub state: Arc<AtomicU8>,
    pub config: ServerConfig,
    pub secure: Option<Arc<dyn TlsAcceptor>>,
    pub handlers: Vec<Box<dyn RequestHandler>>,
    pub response_filters: Vec<Box<dyn ResponseFilter>>,
    pub error_handlers: Vec<Box<dyn ErrorHandler>>,
    // Close-guard registry: sockets of in-flight connections, shut down on
    // close() so blocked workers drain promptly. Upgraded sockets leave
    // the registry when ownership transfers.
    pub connections: Mutex<HashMap<u64, Box<dyn crate::connection::Stream>>>,
    server_id: u16,
    sequence: AtomicU32,
}

impl ServerShared {
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            addr: Some(self.addr),
            state: self.state.clone(),
        }
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        matches!(self.state(), ServerState::Running)
    }

    // Same shape as the client's correlate, keyed by a per-server id.
    pub fn next_correlate(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) as u16;
        format!("{:x}-{:04x}-{:04x}", millis, self.server_id, seq)
    }
}

/// Configures and creates [`HttpServer`]s.
pub struct ServerApplication {
    backlog_size: u32,
    pool_size: usize,
    queue_size: usize,
    buffer_size: usize,
    read_timeout: Duration,
    keep_alive: Option<KeepAlive>,
    secure: Option<Arc<dyn TlsAcceptor>>,
    limits: CodecLimits,
    handlers: Vec<Box<dyn RequestHandler>>,
    response_filters: Vec<Box<dyn ResponseFilter>>,
    error_handlers: Vec<Box<dyn ErrorHandler>>,
    hooks: Vec<Box<dyn LifecycleHook>>,
}

impl Default for ServerApplication {
    fn default() -> ServerApplication {
        ServerApplication::new()
    }
}

impl ServerApplication {
    pub fn new() -> ServerApplication {
        let pool_size = num_cpus::get().max(1);
        ServerApplication {
            backlog_size: 50,
            pool_size,
            queue_size: pool_size * 4,
            buffer_size: 8 * 1024,
            read_timeout: Duration::from_secs(30),
            keep_alive: None,
            secure: None,
            limits: CodecLimits::default(),
            handlers: Vec::new(),
            response_filters: Vec::new(),
            error_handlers: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Listener backlog; connections beyond it are refused by the OS.
    pub fn backlog_size(mut self, size: u32) -> ServerApplication {
        self.backlog_size = size.max(1);
        self
    }

    /// Number of worker threads, i.e. max requests in flight.
    pub fn pool_size(mut self, size: usize) -> ServerApplication {
        self.pool_size = size.max(1);
        self
    }

    /// Bounded request queue; saturation turns into `503`s.
    pub fn queue_size(mut self, size: usize) -> ServerApplication {
        self.queue_size = size.max(1);
        self
    }

    pub fn buffer_size(mut self, size: usize) -> ServerApplication {
        self.buffer_size = size;
        self.limits.buffer_size = size;
        self
    }

    /// Time allowed for a request to arrive before `408` and close.
    pub fn read_timeout(mut self, timeout: Duration) -> ServerApplication {
        self.read_timeout = timeout;
        self
    }

    /// Max header count; breach answers `431`.
    pub fn header_limit(mut self, limit: usize) -> ServerApplication {
        self.limits.header_limit = limit;
        self
    }

    /// Read-side limits (start line, header bytes, body size).
    pub fn limits(mut self, limits: CodecLimits) -> ServerApplication {
        self.limits = limits;
        self
    }

    /// Enables keep-alive with the given idle timeout (seconds) and request
    /// cap per connection.
    pub fn keep_alive(mut self, idle_timeout_seconds: u64, max_requests: u32) -> ServerApplication {
        self.keep_alive = Some(KeepAlive {
            idle_timeout: Duration::from_secs(idle_timeout_seconds),
            max_requests: max_requests.max(1),
        });
        self
    }

    /// TLS wrap for accepted sockets. Context construction is external.
    pub fn secure(mut self, acceptor: Arc<dyn TlsAcceptor>) -> ServerApplication {
        self.secure = Some(acceptor);
        self
    }

    /// Appends a request handler. Handlers run in registration order; the
    /// first to return a response short-circuits the chain.
    pub fn incoming<H>(mut self, handler: H) -> ServerApplication
    where
        H: RequestHandler + 'static,
    {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Appends a response filter, run in registration order on the chosen
    /// response.
    pub fn outgoing<F>(mut self, filter: F) -> ServerApplication
    where
        F: ResponseFilter + 'static,
    {
        self.response_filters.push(Box::new(filter));
        self
    }

    /// Appends an error handler consulted, in order, when a request handler
    /// fails.
    pub fn recover<E>(mut self, handler: E) -> ServerApplication
    where
        E: ErrorHandler + 'static,
    {
        self.error_handlers.push(Box::new(handler));
        self
    }

    /// Appends a lifecycle hook.
    pub fn trigger<L>(mut self, hook: L) -> ServerApplication
    where
        L: LifecycleHook + 'static,
    {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Registers one service as both request handler and lifecycle hook.
    pub fn incoming_managed<T>(mut self, service: Arc<T>) -> ServerApplication
    where
        T: RequestHandler + LifecycleHook + 'static,
    {
        struct AsHandler<T>(Arc<T>);
        impl<T: RequestHandler> RequestHandler for AsHandler<T> {
            fn handle(&self, request: crate::HttpRequest) -> Result<crate::Handled> {
                self.0.handle(request)
            }
        }
        struct AsHook<T>(Arc<T>);
        impl<T: LifecycleHook> LifecycleHook for AsHook<T> {
            fn name(&self) -> &str {
                self.0.name()
            }
            fn on_start(&self, server: &ServerHandle) -> std::result::Result<(), lifecycle::HookError> {
                self.0.on_start(server)
            }
            fn on_stop(&self, server: &ServerHandle) {
                self.0.on_stop(server)
            }
            fn is_critical(&self) -> bool {
                self.0.is_critical()
            }
        }

        self.handlers.push(Box::new(AsHandler(service.clone())));
        self.hooks.push(Box::new(AsHook(service)));
        self
    }

    /// Mounts a router at `mount_path`. The router's own lifecycle hooks
    /// are adopted by the server.
    pub fn route(mut self, mount_path: &str, router: Router) -> Result<ServerApplication> {
        let (handler, hooks) = router.mount_at(mount_path)?;
        self.handlers.push(handler);
        self.hooks.extend(hooks);
        Ok(self)
    }

    /// Binds, runs Start hooks, and begins accepting.
    pub fn create<A>(self, addr: A) -> Result<HttpServer>
    where
        A: ToSocketAddrs,
    {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no address to bind",
            )))?;

        let listener = bind_with_backlog(addr, self.backlog_size)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(ServerShared {
            addr: local_addr,
            state: Arc::new(AtomicU8::new(ServerState::Starting as u8)),
            config: ServerConfig {
                backlog_size: self.backlog_size,
                pool_size: self.pool_size,
                queue_size: self.queue_size,
                buffer_size: self.buffer_size,
                read_timeout: self.read_timeout,
                keep_alive: self.keep_alive,
                limits: self.limits,
            },
            secure: self.secure,
            handlers: self.handlers,
            response_filters: self.response_filters,
            error_handlers: self.error_handlers,
            connections: Mutex::new(HashMap::new()),
            server_id: rand::random(),
            sequence: AtomicU32::new(0),
        });

        let handle = shared.handle();
        if let Err(e) = lifecycle::run_start(&self.hooks, &handle) {
            shared.set_state(ServerState::Stopped);
            return Err(e);
        }

        let pool = {
            let shared = shared.clone();
            TaskPool::new(self.pool_size, self.queue_size, move |conn| {
                pipeline::serve_connection(shared.clone(), conn)
            })
        };
        let acceptor = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("scamper-acceptor".into())
                .spawn(move || acceptor::run(shared, listener, pool))?
        };

        shared.set_state(ServerState::Running);
        info!("server listening on {}", local_addr);

        Ok(HttpServer {
            shared,
            hooks: self.hooks,
            acceptor: Some(acceptor),
        })
    }
}

/// A running server. Dropping it closes it.
pub struct HttpServer {
    shared: Arc<ServerShared>,
    hooks: Vec<Box<dyn LifecycleHook>>,
    acceptor: Option<thread::JoinHandle<()>>,
}

impl HttpServer {
    /// The bound address.
    pub fn addr(&self) -> SocketAddr {
        self.shared.addr
    }

    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    /// A cloneable reference to this server.
    pub fn handle(&self) -> ServerHandle {
        self.shared.handle()
    }

    /// Stops accepting, drains in-flight requests best-effort, closes the
    /// listener, then runs Stop hooks in reverse order. Idempotent.
    pub fn close(&mut self) {
        if matches!(self.state(), ServerState::Stopping | ServerState::Stopped) {
            return;
        }
        self.shared.set_state(ServerState::Stopping);
        debug!("server on {} stopping", self.shared.addr);

        // The acceptor blocks in accept(); poke it awake so it can observe
        // the state change.
        let _ = TcpStream::connect(self.shared.addr);

        // Unblock workers parked on idle keep-alive reads. In-flight
        // requests still finish; only the sockets' reads are interrupted.
        {
            let mut connections = self
                .shared
                .connections
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            for (_, socket) in connections.drain() {
                let _ = socket.shutdown();
            }
        }

        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }

        lifecycle::run_stop(&self.hooks, &self.shared.handle());
        self.shared.set_state(ServerState::Stopped);
        info!("server on {} stopped", self.shared.addr);
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.close();
    }
}

fn bind_with_backlog(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let domain = socket2::Domain::for_address(addr);
    let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    Ok(socket.into())
}
