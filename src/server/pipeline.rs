// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The per-connection request pipeline.
//!
//! Each accepted connection loops: read one request within its timeout,
//! decorate it, run the handler chain in registration order until one
//! produces a response, recover errors through the error handlers, apply
//! the response filters, write the response, and either keep the
//! connection alive or close it. A `101` response with an upgrade hook
//! transfers the socket out of HTTP entirely.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::codec::{self, BodyFraming};
use crate::connection::{BufferedConnection, UpgradedSocket};
use crate::error::Error;
use crate::filters::{ErrorHandler as _, Handled, RequestHandler as _, ResponseFilter as _};
use crate::message::Message;
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::server::{ServerShared, ServerState};
use crate::typed;

enum ReadOutcome {
    Request(HttpRequest),
    /// Peer went away or an idle keep-alive connection timed out.
    Closed,
    /// The request is unusable; answer with this status and close.
    Reject(u16),
}

enum ChainOutcome {
    Response(HttpResponse),
    /// `ResponseAborted`: drop the connection without writing anything.
    Abort,
}

/// Runs the keep-alive loop for one connection until it closes or is
/// upgraded away.
pub(crate) fn serve_connection(shared: Arc<ServerShared>, mut conn: BufferedConnection) {
    let socket = conn.handle().clone();
    let mut request_count: u32 = 0;

    loop {
        if !matches!(shared.state(), ServerState::Running) {
            break;
        }

        let first = request_count == 0;
        if !first {
            if let Some(keep_alive) = shared.config.keep_alive {
                if conn.set_read_timeout(Some(keep_alive.idle_timeout)).is_err() {
                    break;
                }
            }
        }

        // While parked waiting for a request, the socket sits in the
        // close-guard registry so close() can interrupt the read. It
        // leaves the registry before the request is processed; in-flight
        // work is drained, never cut.
        if let Ok(guard) = conn.try_clone_stream() {
            lock_connections(&shared).insert(socket.id(), guard);
        }
        let outcome = read_one_request(&shared, &mut conn, first);
        lock_connections(&shared).remove(&socket.id());

        let request = match outcome {
            ReadOutcome::Request(request) => request,
            ReadOutcome::Closed => break,
            ReadOutcome::Reject(status) => {
                let response = HttpResponse::empty(status);
                let response = typed::set_connection(response, &["close"]);
                let _ = write_out(&shared, &mut conn, &response, "GET");
                break;
            }
        };
        request_count += 1;

        let correlate = shared.next_correlate();
        trace!("{}: {} {}", correlate, request.method(), request.target());

        let server_handle = shared.handle();
        let socket_attr = socket.clone();
        let correlate_attr = correlate.clone();
        let request = request.map_attributes(move |a| {
            a.set_correlate(correlate_attr);
            a.set_server(server_handle);
            a.set_socket(socket_attr);
            a.set_request_count(request_count);
        });
        let method = request.method().to_owned();

        let (outcome, request) = run_handler_chain(&shared, request);
        let mut response = match outcome {
            ChainOutcome::Response(response) => response,
            ChainOutcome::Abort => {
                debug!("{}: response aborted, dropping connection", correlate);
                break;
            }
        };

        let server_handle = shared.handle();
        let socket_attr = socket.clone();
        let correlate_attr = correlate.clone();
        let snapshot = request.clone();
        response = response.map_attributes(move |a| {
            a.set_correlate(correlate_attr);
            a.set_server(server_handle);
            a.set_socket(socket_attr);
            a.set_request_count(request_count);
            a.set_request(snapshot);
        });

        response = apply_response_filters(&shared, response);
        response = stamp_server_headers(response);

        // An interim response written by a handler leaves the exchange
        // open; the final response is still to come.
        if response.is_interim() && response.code() != 101 {
            if write_out(&shared, &mut conn, &response, &method).is_err() {
                break;
            }
            request_count -= 1;
            continue;
        }

        let upgrading = response.has_upgrade() && response.code() == 101;
        let keep = !upgrading && permits_keep_alive(&shared, &request, &response, request_count);
        if !upgrading {
            response = typed::set_connection(response, &[if keep { "keep-alive" } else { "close" }]);
        }

        if let Err(e) = write_out(&shared, &mut conn, &response, &method) {
            debug!("{}: write failed: {}", correlate, e);
            break;
        }

        if upgrading {
            if let Some(upgrade) = response.take_upgrade() {
                trace!("{}: socket handed over to upgrade", correlate);
                upgrade.claim(UpgradedSocket::new(conn));
                return;
            }
            break;
        }

        if !keep {
            break;
        }
    }

    let _ = conn.shutdown();
}

/// Answers the next request on a connection the worker pool had no room
/// for: `503`, then close.
pub(crate) fn serve_overloaded(shared: &ServerShared, mut conn: BufferedConnection) {
    // Read and discard the request so the client sees a response to it.
    match read_one_request(shared, &mut conn, true) {
        ReadOutcome::Closed => {}
        _ => {
            let response = HttpResponse::empty(503);
            let response = typed::set_connection(response, &["close"]);
            let _ = write_out(shared, &mut conn, &response, "GET");
        }
    }
    let _ = conn.shutdown();
}

fn read_one_request(
    shared: &ServerShared,
    conn: &mut BufferedConnection,
    first: bool,
) -> ReadOutcome {
    let limits = &shared.config.limits;

    let (line, headers) = match codec::read_request_head(conn, limits) {
        Ok(head) => head,
        Err(Error::UnexpectedEof) | Err(Error::Io(_)) => return ReadOutcome::Closed,
        // Idle keep-alive connections time out quietly between requests.
        Err(Error::ReadTimeout) if !first => return ReadOutcome::Closed,
        Err(e) => return ReadOutcome::Reject(reject_status(&e)),
    };

    let framing = match codec::request_body_framing(&headers) {
        Ok(framing) => framing,
        Err(e) => return ReadOutcome::Reject(reject_status(&e)),
    };

    let expects_continue = headers
        .get("Expect")
        .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));
    if expects_continue && framing != BodyFraming::Empty && codec::write_interim(conn, 100).is_err()
    {
        return ReadOutcome::Closed;
    }

    let entity = match codec::read_body(conn, framing, limits) {
        Ok(entity) => entity,
        Err(Error::UnexpectedEof) | Err(Error::Io(_)) => return ReadOutcome::Closed,
        Err(e) => return ReadOutcome::Reject(reject_status(&e)),
    };

    ReadOutcome::Request(
        HttpRequest::new(line).with_headers(headers).with_entity(entity),
    )
}

// Status-code mapping for unusable requests.
fn reject_status(e: &Error) -> u16 {
    match e {
        Error::RequestTooLong { .. } => 414,
        Error::HeaderFieldsTooLarge => 431,
        Error::BodyTooLarge { .. } | Error::MessageTooBig { .. } => 413,
        Error::ReadTimeout => 408,
        _ => 400,
    }
}

// Runs the handler chain; returns the outcome and the request as it looked
// when the chain settled (for the response's request attribute).
fn run_handler_chain(
    shared: &ServerShared,
    request: HttpRequest,
) -> (ChainOutcome, HttpRequest) {
    let mut current = request;

    for handler in &shared.handlers {
        let snapshot = current.clone();
        let result = catch_unwind(AssertUnwindSafe(|| handler.handle(current)));
        match result {
            Ok(Ok(Handled::Next(next))) => current = next,
            Ok(Ok(Handled::Done(response))) => {
                return (ChainOutcome::Response(response), snapshot)
            }
            Ok(Err(Error::ResponseAborted)) => return (ChainOutcome::Abort, snapshot),
            Ok(Err(e)) => {
                return (recover(shared, e, &snapshot), snapshot);
            }
            Err(_) => {
                warn!("request handler panicked");
                return (
                    ChainOutcome::Response(HttpResponse::empty(500)),
                    snapshot,
                );
            }
        }
    }

    // No handler claimed the request.
    (ChainOutcome::Response(HttpResponse::empty(404)), current)
}

fn recover(shared: &ServerShared, error: Error, request: &HttpRequest) -> ChainOutcome {
    for handler in &shared.error_handlers {
        if let Some(response) = handler.recover(&error, request) {
            return ChainOutcome::Response(response);
        }
    }
    debug!("unhandled handler error: {}", error);
    ChainOutcome::Response(HttpResponse::empty(500))
}

fn apply_response_filters(shared: &ServerShared, mut response: HttpResponse) -> HttpResponse {
    for filter in &shared.response_filters {
        response = match catch_unwind(AssertUnwindSafe(|| filter.filter(response))) {
            Ok(Ok(filtered)) => filtered,
            Ok(Err(e)) => {
                warn!("response filter failed: {}", e);
                return HttpResponse::empty(500);
            }
            Err(_) => {
                warn!("response filter panicked");
                return HttpResponse::empty(500);
            }
        };
    }
    response
}

// Date and Server are stamped when the response carries neither.
fn stamp_server_headers(response: HttpResponse) -> HttpResponse {
    let response = if typed::has_date(&response) {
        response
    } else {
        typed::set_date(response, std::time::SystemTime::now())
    };
    if response.has_header("Server") {
        response
    } else {
        response.with_set_header(crate::headers::Header::known(
            "Server",
            concat!("scamper/", env!("CARGO_PKG_VERSION")),
        ))
    }
}

fn permits_keep_alive(
    shared: &ServerShared,
    request: &HttpRequest,
    response: &HttpResponse,
    request_count: u32,
) -> bool {
    let keep_alive = match shared.config.keep_alive {
        Some(keep_alive) => keep_alive,
        None => return false,
    };

    let client_close = typed::connection_has(request, "close")
        || (request.version() == (1, 0) && !typed::connection_has(request, "keep-alive"));

    !client_close
        && !typed::connection_has(response, "close")
        && request_count < keep_alive.max_requests
}

fn write_out(
    shared: &ServerShared,
    conn: &mut BufferedConnection,
    response: &HttpResponse,
    request_method: &str,
) -> crate::error::Result<()> {
    codec::write_response(conn, response, request_method, &shared.config.limits)
}

fn lock_connections(
    shared: &ServerShared,
) -> std::sync::MutexGuard<'_, std::collections::HashMap<u64, Box<dyn crate::connection::Stream>>> {
    shared.connections.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecLimits;
    use crate::connection::testing::pipe;
    use crate::filters::{ErrorHandler, RequestHandler, ResponseFilter};
    use crate::headers::Header;
    use crate::server::{KeepAlive, ServerConfig};
    use std::io::{Read, Write};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, AtomicU8};
    use std::time::Duration;

    fn shared_with(
        handlers: Vec<Box<dyn RequestHandler>>,
        response_filters: Vec<Box<dyn ResponseFilter>>,
        error_handlers: Vec<Box<dyn ErrorHandler>>,
        keep_alive: Option<KeepAlive>,
        limits: CodecLimits,
    ) -> Arc<ServerShared> {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        Arc::new(ServerShared {
            addr,
            state: Arc::new(AtomicU8::new(ServerState::Running as u8)),
            config: ServerConfig {
                backlog_size: 1,
                pool_size: 1,
                queue_size: 1,
                buffer_size: 4096,
                read_timeout: Duration::from_secs(5),
                keep_alive,
                limits,
            },
            secure: None,
            handlers,
            response_filters,
            error_handlers,
            connections: std::sync::Mutex::new(std::collections::HashMap::new()),
            server_id: 1,
            sequence: AtomicU32::new(0),
        })
    }

    // Drives `requests` into the pipeline over an in-memory socket and
    // returns everything the server wrote.
    fn drive(shared: Arc<ServerShared>, requests: &[u8]) -> String {
        let (mut client, server_side) = pipe();
        client.write_all(requests).unwrap();

        let server_conn = BufferedConnection::new(Box::new(server_side), 4096);
        let worker = std::thread::spawn(move || serve_connection(shared, server_conn));

        let mut out = Vec::new();
        client.read_to_end(&mut out).unwrap();
        worker.join().unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    fn echo_path_handler() -> Box<dyn RequestHandler> {
        Box::new(|req: HttpRequest| {
            Ok(Handled::Done(HttpResponse::text(req.path().to_owned())))
        })
    }

    #[test]
    fn serves_one_request_and_closes() {
        let shared = shared_with(
            vec![echo_path_handler()],
            vec![],
            vec![],
            None,
            CodecLimits::default(),
        );
        let out = drive(shared, b"GET /motd HTTP/1.1\r\nHost: x\r\n\r\n");

        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "{}", out);
        assert!(out.contains("Connection: close\r\n"));
        assert!(out.contains("Date: "));
        assert!(out.contains("Server: scamper/"));
        assert!(out.ends_with("/motd"));
    }

    #[test]
    fn default_response_is_404() {
        let shared = shared_with(vec![], vec![], vec![], None, CodecLimits::default());
        let out = drive(shared, b"GET /nowhere HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"), "{}", out);
    }

    #[test]
    fn header_limit_breach_is_431_without_handlers() {
        let invoked = Arc::new(AtomicU32::new(0));
        let count = invoked.clone();
        let handler: Box<dyn RequestHandler> = Box::new(move |req: HttpRequest| {
            count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Handled::Next(req))
        });

        let limits = CodecLimits {
            header_limit: 10,
            ..CodecLimits::default()
        };
        let shared = shared_with(vec![handler], vec![], vec![], None, limits);

        let mut wire = String::from("GET / HTTP/1.1\r\n");
        for n in 0..20 {
            wire.push_str(&format!("X-H{}: v\r\n", n));
        }
        wire.push_str("\r\n");

        let out = drive(shared, wire.as_bytes());
        assert!(
            out.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"),
            "{}",
            out
        );
        assert_eq!(invoked.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn oversized_request_line_is_414() {
        let limits = CodecLimits {
            start_line_limit: 32,
            ..CodecLimits::default()
        };
        let shared = shared_with(vec![], vec![], vec![], None, limits);
        let wire = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(100));
        let out = drive(shared, wire.as_bytes());
        assert!(out.starts_with("HTTP/1.1 414 URI Too Long\r\n"), "{}", out);
    }

    #[test]
    fn keep_alive_caps_requests() {
        let shared = shared_with(
            vec![echo_path_handler()],
            vec![],
            vec![],
            Some(KeepAlive {
                idle_timeout: Duration::from_secs(30),
                max_requests: 3,
            }),
            CodecLimits::default(),
        );

        let one = b"GET /a HTTP/1.1\r\n\r\n";
        let mut wire = Vec::new();
        for _ in 0..3 {
            wire.extend_from_slice(one);
        }
        let out = drive(shared, &wire);

        let keep_alives = out.matches("Connection: keep-alive\r\n").count();
        let closes = out.matches("Connection: close\r\n").count();
        assert_eq!(keep_alives, 2, "{}", out);
        assert_eq!(closes, 1, "{}", out);
    }

    #[test]
    fn client_close_is_honored() {
        let shared = shared_with(
            vec![echo_path_handler()],
            vec![],
            vec![],
            Some(KeepAlive {
                idle_timeout: Duration::from_secs(30),
                max_requests: 100,
            }),
            CodecLimits::default(),
        );
        let out = drive(shared, b"GET /a HTTP/1.1\r\nConnection: close\r\n\r\n");
        assert_eq!(out.matches("HTTP/1.1 200").count(), 1);
        assert!(out.contains("Connection: close\r\n"));
    }

    #[test]
    fn handler_error_recovered_in_order() {
        let failing: Box<dyn RequestHandler> =
            Box::new(|_req: HttpRequest| -> crate::error::Result<Handled> {
                Err(Error::ParameterNotConvertible { name: "id".into() })
            });
        let miss: Box<dyn ErrorHandler> =
            Box::new(|_e: &Error, _r: &HttpRequest| -> Option<HttpResponse> { None });
        let hit: Box<dyn ErrorHandler> = Box::new(|e: &Error, _r: &HttpRequest| {
            matches!(e, Error::ParameterNotConvertible { .. })
                .then(|| HttpResponse::empty(400))
        });

        let shared = shared_with(
            vec![failing],
            vec![],
            vec![miss, hit],
            None,
            CodecLimits::default(),
        );
        let out = drive(shared, b"GET / HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", out);
    }

    #[test]
    fn unrecovered_error_is_500() {
        let failing: Box<dyn RequestHandler> =
            Box::new(|_req: HttpRequest| -> crate::error::Result<Handled> {
                Err(Error::application(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "boom",
                )))
            });
        let shared = shared_with(vec![failing], vec![], vec![], None, CodecLimits::default());
        let out = drive(shared, b"GET / HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "{}", out);
    }

    #[test]
    fn aborted_response_writes_nothing() {
        let aborting: Box<dyn RequestHandler> =
            Box::new(|_req: HttpRequest| -> crate::error::Result<Handled> {
                Err(Error::ResponseAborted)
            });
        let shared = shared_with(vec![aborting], vec![], vec![], None, CodecLimits::default());
        let out = drive(shared, b"GET / HTTP/1.1\r\n\r\n");
        assert!(out.is_empty(), "{}", out);
    }

    #[test]
    fn handler_chain_passes_rewritten_requests() {
        let tagger: Box<dyn RequestHandler> = Box::new(|req: HttpRequest| {
            Ok(Handled::Next(
                req.with_header(Header::known("X-Tag", "seen")),
            ))
        });
        let reader: Box<dyn RequestHandler> = Box::new(|req: HttpRequest| {
            Ok(Handled::Done(HttpResponse::text(
                req.header("X-Tag").unwrap_or("missing").to_owned(),
            )))
        });
        let shared = shared_with(
            vec![tagger, reader],
            vec![],
            vec![],
            None,
            CodecLimits::default(),
        );
        let out = drive(shared, b"GET / HTTP/1.1\r\n\r\n");
        assert!(out.ends_with("seen"), "{}", out);
    }

    #[test]
    fn response_filters_run_in_order() {
        let first: Box<dyn ResponseFilter> = Box::new(|res: HttpResponse| {
            Ok(res.with_set_header(Header::known("X-Order", "first")))
        });
        let second: Box<dyn ResponseFilter> = Box::new(|res: HttpResponse| {
            let prior = res.header("X-Order").unwrap_or("none").to_owned();
            Ok(res.with_set_header(Header::known("X-Order", format!("{}-second", prior))))
        });
        let shared = shared_with(
            vec![echo_path_handler()],
            vec![first, second],
            vec![],
            None,
            CodecLimits::default(),
        );
        let out = drive(shared, b"GET / HTTP/1.1\r\n\r\n");
        assert!(out.contains("X-Order: first-second\r\n"), "{}", out);
    }

    #[test]
    fn head_gets_headers_only() {
        let handler: Box<dyn RequestHandler> = Box::new(|_req: HttpRequest| {
            Ok(Handled::Done(HttpResponse::text("hello")))
        });
        let shared = shared_with(
            vec![handler],
            vec![],
            vec![],
            None,
            CodecLimits::default(),
        );
        let out = drive(shared, b"HEAD / HTTP/1.1\r\n\r\n");
        assert!(out.contains("Content-Length: 5\r\n"), "{}", out);
        assert!(!out.contains("hello"), "{}", out);
    }

    #[test]
    fn expect_continue_gets_interim() {
        let handler: Box<dyn RequestHandler> = Box::new(|req: HttpRequest| {
            let body = req.entity().read_to_bytes(1024).map_err(Error::from)?;
            Ok(Handled::Done(HttpResponse::text(
                String::from_utf8_lossy(&body).into_owned(),
            )))
        });
        let shared = shared_with(
            vec![handler],
            vec![],
            vec![],
            None,
            CodecLimits::default(),
        );
        let out = drive(
            shared,
            b"POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\nhello",
        );
        assert!(out.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"), "{}", out);
        assert!(out.ends_with("hello"), "{}", out);
    }

    // MemoryStream is deliberately timeout-free, so the 408 path is
    // exercised through reject_status directly.
    #[test]
    fn timeout_maps_to_408() {
        assert_eq!(reject_status(&Error::ReadTimeout), 408);
        assert_eq!(reject_status(&Error::HeaderFieldsTooLarge), 431);
        assert_eq!(
            reject_status(&Error::RequestTooLong { limit: 1 }),
            414
        );
        assert_eq!(reject_status(&Error::MalformedStartLine("x".into())), 400);
    }

    #[test]
    fn overload_answers_503() {
        let shared = shared_with(vec![], vec![], vec![], None, CodecLimits::default());
        let (mut client, server_side) = pipe();
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

        let conn = BufferedConnection::new(Box::new(server_side), 4096);
        let worker = {
            let shared = shared.clone();
            std::thread::spawn(move || serve_overloaded(&shared, conn))
        };

        let mut out = Vec::new();
        client.read_to_end(&mut out).unwrap();
        worker.join().unwrap();

        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"), "{}", text);
        assert!(text.contains("Connection: close\r\n"));
    }
}
