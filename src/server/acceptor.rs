// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The accept loop.
//!
//! One thread accepts sockets, optionally wraps them in TLS, and enqueues
//! the connection on the bounded worker pool. When the queue is full the
//! next request on the socket is answered `503 Service Unavailable` and the
//! socket closed; when the listener backlog is also full the OS refuses the
//! connection before it gets here.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::connection::{BufferedConnection, TlsAcceptor as _};
use crate::server::pipeline;
use crate::server::task_pool::{Submit, TaskPool};
use crate::server::ServerShared;

pub(crate) fn run(shared: Arc<ServerShared>, listener: TcpListener, pool: TaskPool<BufferedConnection>) {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                if !shared.is_accepting() {
                    break;
                }
                warn!("accept failed: {}", e);
                continue;
            }
        };

        if !shared.is_accepting() {
            // The wake-up connection from close(), or a straggler.
            drop(stream);
            break;
        }

        trace!("accepted connection from {}", peer);
        match prepare(&shared, stream) {
            Ok(conn) => {
                if let Submit::Saturated(conn) = pool.try_execute(conn) {
                    debug!("request queue saturated, refusing {}", peer);
                    pipeline::serve_overloaded(&shared, conn);
                }
            }
            Err(e) => debug!("failed to prepare connection from {}: {}", peer, e),
        }
    }

    debug!("acceptor on {} exiting", shared.addr);
    // Dropping the pool closes the queue and waits for in-flight requests.
    drop(pool);
}

// TLS wrap (when configured) and socket setup.
fn prepare(shared: &ServerShared, stream: TcpStream) -> std::io::Result<BufferedConnection> {
    stream.set_read_timeout(Some(shared.config.read_timeout))?;

    let stream: Box<dyn crate::connection::Stream> = match &shared.secure {
        Some(acceptor) => acceptor.accept(stream)?,
        None => Box::new(stream),
    };

    Ok(BufferedConnection::new(stream, shared.config.buffer_size))
}
