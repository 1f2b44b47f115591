// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! WebSocket sessions.
//!
//! A session binds the frame codec to an upgraded socket and runs the
//! state machine `Pending → Open → Closed`. Handlers are registered while
//! `Pending`; [`WebSocket::open`] starts the reader task and reads flow
//! only while `Open`. Sends are permitted from `Pending` on, serialized by
//! a single writer lock so fragments of one message are contiguous on the
//! wire.
//!
//! The reader assembles continuations, enforces the frame constraints,
//! inflates compressed messages, and turns protocol violations into Close
//! frames with the appropriate status before ending the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::connection::{BufferedConnection, Stream, UpgradedSocket};
use crate::error::{Error, Result};
use crate::websocket::deflate;
use crate::websocket::frame::{read_frame, write_frame, Opcode, Role};
use crate::websocket::status;

/// Tunables of one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long the reader may sit without traffic; `None` waits forever.
    /// A timeout closes the session with `1001 Going Away`.
    pub idle_timeout: Option<Duration>,
    /// Outgoing messages larger than this are split across frames.
    pub payload_limit: usize,
    /// Cap on one incoming message after assembly and inflation.
    pub message_capacity: u64,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            idle_timeout: None,
            payload_limit: 64 * 1024,
            message_capacity: 8 * 1024 * 1024,
        }
    }
}

/// Where a session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Open,
    Closed,
}

// Handlers run only on the reader task, so Send is enough.
type DataHandler<T> = Box<dyn Fn(&WebSocket, T) + Send>;

#[derive(Default)]
struct Handlers {
    on_text: Option<DataHandler<String>>,
    on_binary: Option<DataHandler<Vec<u8>>>,
    on_ping: Option<DataHandler<Vec<u8>>>,
    on_pong: Option<DataHandler<Vec<u8>>>,
    on_close: Option<Box<dyn Fn(u16) + Send>>,
}

struct Session {
    role: Role,
    deflate: bool,
    config: SessionConfig,
    state: Mutex<SessionState>,
    reader: Mutex<Option<BufferedConnection>>,
    writer: Mutex<Option<Box<dyn Stream>>>,
    handlers: Mutex<Handlers>,
    sent_close: AtomicBool,
}

/// One WebSocket endpoint. Cheap to clone; all clones share the session.
#[derive(Clone)]
pub struct WebSocket {
    session: Arc<Session>,
}

impl WebSocket {
    pub(crate) fn new(
        socket: UpgradedSocket,
        role: Role,
        deflate: bool,
        config: SessionConfig,
    ) -> Result<WebSocket> {
        let (reader, writer) = socket.split()?;
        Ok(WebSocket {
            session: Arc::new(Session {
                role,
                deflate,
                config,
                state: Mutex::new(SessionState::Pending),
                reader: Mutex::new(Some(reader)),
                writer: Mutex::new(Some(writer)),
                handlers: Mutex::new(Handlers::default()),
                sent_close: AtomicBool::new(false),
            }),
        })
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.session.state)
    }

    /// True when permessage-deflate was negotiated.
    pub fn is_compressed(&self) -> bool {
        self.session.deflate
    }

    /// Registers the text-message handler. Handlers are registered while
    /// the session is `Pending`; later registrations are ignored.
    pub fn on_text<F>(&self, handler: F) -> &WebSocket
    where
        F: Fn(&WebSocket, String) + Send + 'static,
    {
        self.register(|h| h.on_text = Some(Box::new(handler)))
    }

    pub fn on_binary<F>(&self, handler: F) -> &WebSocket
    where
        F: Fn(&WebSocket, Vec<u8>) + Send + 'static,
    {
        self.register(|h| h.on_binary = Some(Box::new(handler)))
    }

    /// Registers the ping handler. The session does not pong on its own;
    /// echo with [`WebSocket::pong`] from here if desired.
    pub fn on_ping<F>(&self, handler: F) -> &WebSocket
    where
        F: Fn(&WebSocket, Vec<u8>) + Send + 'static,
    {
        self.register(|h| h.on_ping = Some(Box::new(handler)))
    }

    pub fn on_pong<F>(&self, handler: F) -> &WebSocket
    where
        F: Fn(&WebSocket, Vec<u8>) + Send + 'static,
    {
        self.register(|h| h.on_pong = Some(Box::new(handler)))
    }

    /// Registers the close handler, invoked with the peer's status code
    /// (or a local one on timeout/failure).
    pub fn on_close<F>(&self, handler: F) -> &WebSocket
    where
        F: Fn(u16) + Send + 'static,
    {
        self.register(|h| h.on_close = Some(Box::new(handler)))
    }

    fn register<F>(&self, set: F) -> &WebSocket
    where
        F: FnOnce(&mut Handlers),
    {
        if self.state() != SessionState::Pending {
            warn!("handler registered after open; ignored");
            return self;
        }
        set(&mut lock(&self.session.handlers));
        self
    }

    /// Transitions `Pending → Open` and starts the reader task.
    pub fn open(&self) -> Result<()> {
        {
            let mut state = lock(&self.session.state);
            if *state != SessionState::Pending {
                return Err(Error::Protocol(format!("cannot open from {:?}", *state)));
            }
            *state = SessionState::Open;
        }

        let reader = lock(&self.session.reader)
            .take()
            .ok_or_else(|| Error::Protocol("session has no socket".into()))?;
        let handlers = std::mem::take(&mut *lock(&self.session.handlers));

        let ws = self.clone();
        thread::Builder::new()
            .name("scamper-ws-reader".into())
            .spawn(move || reader_loop(ws, reader, handlers))?;
        Ok(())
    }

    /// Sends one text message, fragmenting and compressing as configured.
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send_data(Opcode::Text, text.as_bytes())
    }

    /// Sends one binary message.
    pub fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send_data(Opcode::Binary, data)
    }

    /// Sends a ping control frame (payload ≤ 125 bytes).
    pub fn ping(&self, data: &[u8]) -> Result<()> {
        self.send_control(Opcode::Ping, data)
    }

    /// Sends a pong control frame.
    pub fn pong(&self, data: &[u8]) -> Result<()> {
        self.send_control(Opcode::Pong, data)
    }

    /// Emits a Close frame with `code` (unless the peer closed first) and
    /// transitions to `Closed`.
    pub fn close(&self, code: u16) -> Result<()> {
        let result = if !self.session.sent_close.swap(true, Ordering::SeqCst) {
            self.write_close_frame(Some(code))
        } else {
            Ok(())
        };

        *lock(&self.session.state) = SessionState::Closed;
        if let Some(writer) = lock(&self.session.writer).take() {
            let _ = writer.shutdown();
        }
        result
    }

    fn send_data(&self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        self.ensure_writable()?;

        let (bytes, compressed) = if self.session.deflate {
            (deflate::compress(payload)?, true)
        } else {
            (payload.to_vec(), false)
        };

        let limit = self.session.config.payload_limit.max(1);
        let mut writer = lock(&self.session.writer);
        let stream = writer
            .as_mut()
            .ok_or_else(|| Error::Protocol("session closed".into()))?;

        if bytes.len() <= limit {
            return write_frame(stream, self.session.role, true, compressed, opcode, &bytes);
        }

        // Fragments of one message stay contiguous: the writer lock is
        // held across the whole split.
        let chunks: Vec<&[u8]> = bytes.chunks(limit).collect();
        let last = chunks.len() - 1;
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let opcode = if idx == 0 { opcode } else { Opcode::Continuation };
            write_frame(
                stream,
                self.session.role,
                idx == last,
                compressed && idx == 0,
                opcode,
                chunk,
            )?;
        }
        Ok(())
    }

    fn send_control(&self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let mut writer = lock(&self.session.writer);
        let stream = writer
            .as_mut()
            .ok_or_else(|| Error::Protocol("session closed".into()))?;
        write_frame(stream, self.session.role, true, false, opcode, payload)
    }

    // Sends are application-initiated and legal from Pending on.
    fn ensure_writable(&self) -> Result<()> {
        match self.state() {
            SessionState::Closed => Err(Error::Protocol("session closed".into())),
            _ => Ok(()),
        }
    }

    fn write_close_frame(&self, code: Option<u16>) -> Result<()> {
        let payload = match code {
            // 1005/1006/1015 are local-only and never put on the wire.
            Some(code) if !status::is_local_only(code) => code.to_be_bytes().to_vec(),
            _ => Vec::new(),
        };
        let mut writer = lock(&self.session.writer);
        match writer.as_mut() {
            Some(stream) => write_frame(
                stream,
                self.session.role,
                true,
                false,
                Opcode::Close,
                &payload,
            ),
            None => Ok(()),
        }
    }

    // Terminal transition from the reader: best-effort Close frame, state
    // flip, socket teardown.
    fn terminate(&self, code: u16) {
        if !self.session.sent_close.swap(true, Ordering::SeqCst) {
            let _ = self.write_close_frame(Some(code));
        }
        *lock(&self.session.state) = SessionState::Closed;
        if let Some(writer) = lock(&self.session.writer).take() {
            let _ = writer.shutdown();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Assembly {
    opcode: Opcode,
    compressed: bool,
    data: Vec<u8>,
}

fn reader_loop(ws: WebSocket, mut reader: BufferedConnection, handlers: Handlers) {
    let session = &ws.session;
    let _ = reader.set_read_timeout(session.config.idle_timeout);

    let mut assembly: Option<Assembly> = None;

    loop {
        if ws.state() != SessionState::Open {
            break;
        }

        let frame = match read_frame(
            &mut reader,
            session.role,
            session.deflate,
            session.config.message_capacity,
        ) {
            Ok(frame) => frame,
            Err(Error::ReadTimeout) | Err(Error::IdleTimeout) => {
                debug!("websocket idle timeout, going away");
                finish(&ws, &handlers, status::GOING_AWAY, true);
                break;
            }
            Err(Error::MessageTooBig { .. }) => {
                finish(&ws, &handlers, status::MESSAGE_TOO_BIG, true);
                break;
            }
            Err(Error::Protocol(reason)) => {
                debug!("websocket protocol error: {}", reason);
                finish(&ws, &handlers, status::PROTOCOL_ERROR, true);
                break;
            }
            Err(_) => {
                // Socket aborted. If the close was ours, this is routine.
                if !session.sent_close.load(Ordering::SeqCst) {
                    finish(&ws, &handlers, status::ABNORMAL_CLOSURE, false);
                }
                break;
            }
        };

        trace!("websocket frame: {:?} fin={}", frame.opcode, frame.fin);

        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if assembly.is_some() {
                    // Interleaved data frames.
                    finish(&ws, &handlers, status::PROTOCOL_ERROR, true);
                    break;
                }
                if frame.fin {
                    if let Some(code) =
                        dispatch_data(&ws, &handlers, frame.opcode, frame.compressed, frame.payload)
                    {
                        finish(&ws, &handlers, code, true);
                        break;
                    }
                } else {
                    assembly = Some(Assembly {
                        opcode: frame.opcode,
                        compressed: frame.compressed,
                        data: frame.payload,
                    });
                }
            }

            Opcode::Continuation => {
                let buffer = match assembly {
                    Some(ref mut buffer) => buffer,
                    None => {
                        finish(&ws, &handlers, status::PROTOCOL_ERROR, true);
                        break;
                    }
                };
                buffer.data.extend_from_slice(&frame.payload);
                if buffer.data.len() as u64 > session.config.message_capacity {
                    finish(&ws, &handlers, status::MESSAGE_TOO_BIG, true);
                    break;
                }
                if frame.fin {
                    if let Some(message) = assembly.take() {
                        if let Some(code) = dispatch_data(
                            &ws,
                            &handlers,
                            message.opcode,
                            message.compressed,
                            message.data,
                        ) {
                            finish(&ws, &handlers, code, true);
                            break;
                        }
                    }
                }
            }

            Opcode::Ping => {
                if let Some(handler) = &handlers.on_ping {
                    handler(&ws, frame.payload);
                }
            }

            Opcode::Pong => {
                if let Some(handler) = &handlers.on_pong {
                    handler(&ws, frame.payload);
                }
            }

            Opcode::Close => {
                let code = if frame.payload.len() >= 2 {
                    u16::from_be_bytes([frame.payload[0], frame.payload[1]])
                } else {
                    status::NO_STATUS
                };
                if let Some(handler) = &handlers.on_close {
                    handler(code);
                }
                // Mirror the close unless we already initiated one.
                if !session.sent_close.swap(true, Ordering::SeqCst) {
                    let mirror = (code != status::NO_STATUS).then_some(code);
                    let _ = ws.write_close_frame(mirror);
                }
                *lock(&session.state) = SessionState::Closed;
                if let Some(writer) = lock(&session.writer).take() {
                    let _ = writer.shutdown();
                }
                break;
            }
        }
    }

    let _ = reader.shutdown();
    trace!("websocket reader exiting");
}

// Inflate, validate and hand one complete message to its handler. Returns
// the close status on failure.
fn dispatch_data(
    ws: &WebSocket,
    handlers: &Handlers,
    opcode: Opcode,
    compressed: bool,
    payload: Vec<u8>,
) -> Option<u16> {
    let bytes = if compressed {
        match deflate::decompress(&payload, ws.session.config.message_capacity) {
            Ok(bytes) => bytes,
            Err(Error::MessageTooBig { .. }) => return Some(status::MESSAGE_TOO_BIG),
            Err(_) => return Some(status::PROTOCOL_ERROR),
        }
    } else {
        payload
    };

    match opcode {
        Opcode::Text => {
            let text = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => return Some(status::INVALID_PAYLOAD),
            };
            if let Some(handler) = &handlers.on_text {
                handler(ws, text);
            }
        }
        _ => {
            if let Some(handler) = &handlers.on_binary {
                handler(ws, bytes);
            }
        }
    }
    None
}

// Terminal path from the reader: optionally emit Close, then notify.
fn finish(ws: &WebSocket, handlers: &Handlers, code: u16, emit_close: bool) {
    if emit_close {
        ws.terminate(code);
    } else {
        *lock(&ws.session.state) = SessionState::Closed;
        if let Some(writer) = lock(&ws.session.writer).take() {
            let _ = writer.shutdown();
        }
    }
    if let Some(handler) = &handlers.on_close {
        handler(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::pipe;
    use crate::websocket::frame;
    use std::sync::mpsc;
    use std::time::Duration;

    // Builds a server-role session over an in-memory pipe; returns the
    // session plus the raw client end.
    fn server_session(deflate: bool) -> (WebSocket, crate::connection::testing::MemoryStream) {
        let (client_end, server_end) = pipe();
        let socket = UpgradedSocket::new(BufferedConnection::new(Box::new(server_end), 4096));
        let ws = WebSocket::new(socket, Role::Server, deflate, SessionConfig::default()).unwrap();
        (ws, client_end)
    }

    fn recv_timeout<T>(rx: &mpsc::Receiver<T>) -> T {
        rx.recv_timeout(Duration::from_secs(5)).expect("event")
    }

    #[test]
    fn lifecycle_states() {
        let (ws, _client) = server_session(false);
        assert_eq!(ws.state(), SessionState::Pending);
        ws.open().unwrap();
        assert_eq!(ws.state(), SessionState::Open);
        assert!(ws.open().is_err());
        ws.close(status::NORMAL).unwrap();
        assert_eq!(ws.state(), SessionState::Closed);
        assert!(ws.send_text("late").is_err());
    }

    #[test]
    fn dispatches_text_messages() {
        let (ws, mut client) = server_session(false);
        let (tx, rx) = mpsc::channel();
        ws.on_text(move |_ws, text| tx.send(text).unwrap());
        ws.open().unwrap();

        frame::write_frame(&mut client, Role::Client, true, false, Opcode::Text, b"hello").unwrap();
        assert_eq!(recv_timeout(&rx), "hello");
    }

    #[test]
    fn assembles_fragments() {
        let (ws, mut client) = server_session(false);
        let (tx, rx) = mpsc::channel();
        ws.on_text(move |_ws, text| tx.send(text).unwrap());
        ws.open().unwrap();

        frame::write_frame(&mut client, Role::Client, false, false, Opcode::Text, b"hel").unwrap();
        frame::write_frame(&mut client, Role::Client, false, false, Opcode::Continuation, b"lo ")
            .unwrap();
        frame::write_frame(&mut client, Role::Client, true, false, Opcode::Continuation, b"world")
            .unwrap();
        assert_eq!(recv_timeout(&rx), "hello world");
    }

    #[test]
    fn ping_reaches_handler_without_auto_pong() {
        let (ws, mut client) = server_session(false);
        let (ping_tx, ping_rx) = mpsc::channel();
        ws.on_ping(move |_ws, data| ping_tx.send(data).unwrap());
        ws.open().unwrap();

        frame::write_frame(&mut client, Role::Client, true, false, Opcode::Ping, b"tick").unwrap();
        assert_eq!(recv_timeout(&ping_rx), b"tick");

        // No pong was emitted on its own: the first frame the client sees
        // is the mirror of its own close, not a pong.
        frame::write_frame(
            &mut client,
            Role::Client,
            true,
            false,
            Opcode::Close,
            &status::NORMAL.to_be_bytes(),
        )
        .unwrap();
        let first = frame::read_frame(&mut client, Role::Client, false, 1 << 20).unwrap();
        assert_eq!(first.opcode, Opcode::Close);
    }

    #[test]
    fn peer_close_is_mirrored() {
        let (ws, mut client) = server_session(false);
        let (tx, rx) = mpsc::channel();
        ws.on_close(move |code| tx.send(code).unwrap());
        ws.open().unwrap();

        frame::write_frame(
            &mut client,
            Role::Client,
            true,
            false,
            Opcode::Close,
            &status::NORMAL.to_be_bytes(),
        )
        .unwrap();

        assert_eq!(recv_timeout(&rx), status::NORMAL);

        let mirrored =
            frame::read_frame(&mut client, Role::Client, false, 1 << 20).unwrap();
        assert_eq!(mirrored.opcode, Opcode::Close);
        assert_eq!(mirrored.payload, status::NORMAL.to_be_bytes());
    }

    #[test]
    fn invalid_utf8_closes_with_1007() {
        let (ws, mut client) = server_session(false);
        let (tx, rx) = mpsc::channel();
        ws.on_close(move |code| tx.send(code).unwrap());
        ws.open().unwrap();

        frame::write_frame(&mut client, Role::Client, true, false, Opcode::Text, &[0xff, 0xfe])
            .unwrap();
        assert_eq!(recv_timeout(&rx), status::INVALID_PAYLOAD);

        let close = frame::read_frame(&mut client, Role::Client, false, 1 << 20).unwrap();
        assert_eq!(close.opcode, Opcode::Close);
        assert_eq!(close.payload, status::INVALID_PAYLOAD.to_be_bytes());
    }

    #[test]
    fn interleaved_data_closes_with_1002() {
        let (ws, mut client) = server_session(false);
        let (tx, rx) = mpsc::channel();
        ws.on_close(move |code| tx.send(code).unwrap());
        ws.open().unwrap();

        frame::write_frame(&mut client, Role::Client, false, false, Opcode::Text, b"frag").unwrap();
        frame::write_frame(&mut client, Role::Client, true, false, Opcode::Text, b"new").unwrap();
        assert_eq!(recv_timeout(&rx), status::PROTOCOL_ERROR);
    }

    #[test]
    fn continuation_without_start_closes_with_1002() {
        let (ws, mut client) = server_session(false);
        let (tx, rx) = mpsc::channel();
        ws.on_close(move |code| tx.send(code).unwrap());
        ws.open().unwrap();

        frame::write_frame(&mut client, Role::Client, true, false, Opcode::Continuation, b"x")
            .unwrap();
        assert_eq!(recv_timeout(&rx), status::PROTOCOL_ERROR);
    }

    #[test]
    fn compressed_round_trip() {
        let (ws, mut client) = server_session(true);
        let (tx, rx) = mpsc::channel();
        ws.on_text(move |_ws, text| tx.send(text).unwrap());
        ws.open().unwrap();

        let packed = deflate::compress(b"compressed payload").unwrap();
        // RSV1 on the first (only) frame of the message.
        frame::write_frame(&mut client, Role::Client, true, true, Opcode::Text, &packed).unwrap();
        assert_eq!(recv_timeout(&rx), "compressed payload");
    }

    #[test]
    fn outgoing_fragmentation_is_contiguous() {
        let (client_end, server_end) = pipe();
        let socket = UpgradedSocket::new(BufferedConnection::new(Box::new(server_end), 4096));
        let config = SessionConfig {
            payload_limit: 4,
            ..SessionConfig::default()
        };
        let ws = WebSocket::new(socket, Role::Server, false, config).unwrap();
        ws.open().unwrap();

        ws.send_text("hello world").unwrap();

        let mut reader = client_end;
        let first = frame::read_frame(&mut reader, Role::Client, false, 1 << 20).unwrap();
        assert_eq!(first.opcode, Opcode::Text);
        assert!(!first.fin);

        let mut text = first.payload;
        loop {
            let next = frame::read_frame(&mut reader, Role::Client, false, 1 << 20).unwrap();
            assert_eq!(next.opcode, Opcode::Continuation);
            text.extend_from_slice(&next.payload);
            if next.fin {
                break;
            }
        }
        assert_eq!(text, b"hello world");
    }

    #[test]
    fn send_from_pending_is_permitted() {
        let (ws, mut client) = server_session(false);
        assert_eq!(ws.state(), SessionState::Pending);
        ws.send_text("early").unwrap();

        let frame = frame::read_frame(&mut client, Role::Client, false, 1 << 20).unwrap();
        assert_eq!(frame.payload, b"early");
        let _ = client;
    }
}
