// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Transport plumbing shared by the client, the server and WebSocket
//! sessions.
//!
//! A [`Stream`] is a bidirectional byte stream with socket-style controls; a
//! [`BufferedConnection`] layers the read buffer the codec scans over it.
//! TLS is an external collaborator: only the [`TlsAcceptor`] and
//! [`TlsConnector`] surfaces are defined here.

use std::io;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::message::SocketHandle;

/// A connected bidirectional byte stream.
///
/// Implemented for [`TcpStream`]; TLS wrappers implement it by delegation.
pub trait Stream: Read + Write + Send {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Shuts down both directions.
    fn shutdown(&self) -> io::Result<()>;

    /// A second handle onto the same underlying socket, so one side can
    /// read while the other writes. Both handles observe the same shutdown.
    fn try_clone(&self) -> io::Result<Box<dyn Stream>>;
}

impl Stream for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, std::net::Shutdown::Both)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Stream>> {
        Ok(Box::new(TcpStream::try_clone(self)?))
    }
}

/// Server-side TLS wrap point. Construction of the TLS context itself is
/// outside this library; the acceptor only turns an accepted TCP socket into
/// an encrypted [`Stream`].
pub trait TlsAcceptor: Send + Sync {
    fn accept(&self, stream: TcpStream) -> io::Result<Box<dyn Stream>>;
}

/// Client-side TLS wrap point, handed the host name for SNI/verification.
pub trait TlsConnector: Send + Sync {
    fn connect(&self, host: &str, stream: TcpStream) -> io::Result<Box<dyn Stream>>;
}

/// Outcome of reading one CRLF-terminated line.
pub(crate) enum LineRead {
    Line(Vec<u8>),
    TooLong,
}

/// A [`Stream`] plus the read buffer the codec works against.
///
/// Bytes read past the end of one message stay in the buffer and are served
/// to the next read, so keep-alive exchanges and protocol upgrades never
/// lose data.
pub struct BufferedConnection {
    stream: Box<dyn Stream>,
    handle: SocketHandle,
    buffer: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl BufferedConnection {
    pub fn new(stream: Box<dyn Stream>, buffer_size: usize) -> BufferedConnection {
        let peer = stream.peer_addr().ok();
        BufferedConnection {
            stream,
            handle: SocketHandle::next(peer),
            buffer: Vec::new(),
            pos: 0,
            chunk: buffer_size.max(512),
        }
    }

    /// Identity of the underlying socket, stable across the connection's
    /// lifetime.
    #[inline]
    pub fn handle(&self) -> &SocketHandle {
        &self.handle
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn shutdown(&self) -> io::Result<()> {
        self.stream.shutdown()
    }

    /// A second handle onto the underlying socket, for split read/write.
    pub(crate) fn try_clone_stream(&self) -> io::Result<Box<dyn Stream>> {
        self.stream.try_clone()
    }

    #[inline]
    fn buffered(&self) -> &[u8] {
        &self.buffer[self.pos..]
    }

    /// True if decoded-but-unconsumed bytes are pending.
    pub(crate) fn has_buffered(&self) -> bool {
        self.pos < self.buffer.len()
    }

    // Pulls more bytes from the stream into the buffer. Ok(0) means EOF.
    fn fill(&mut self) -> io::Result<usize> {
        if self.pos > 0 && self.pos == self.buffer.len() {
            self.buffer.clear();
            self.pos = 0;
        }
        let old_len = self.buffer.len();
        self.buffer.resize(old_len + self.chunk, 0);
        match self.stream.read(&mut self.buffer[old_len..]) {
            Ok(n) => {
                self.buffer.truncate(old_len + n);
                Ok(n)
            }
            Err(e) => {
                self.buffer.truncate(old_len);
                Err(e)
            }
        }
    }

    /// Reads one line terminated by CRLF, returning it without the
    /// terminator. Lines longer than `limit` bytes (terminator included)
    /// report [`LineRead::TooLong`] without consuming further input.
    pub(crate) fn read_line(&mut self, limit: usize) -> io::Result<LineRead> {
        let mut scanned: usize = 0;
        loop {
            let buf = self.buffered();
            if let Some(idx) = find_crlf(&buf[scanned.saturating_sub(1)..]) {
                let end = scanned.saturating_sub(1) + idx;
                if end + 2 > limit {
                    return Ok(LineRead::TooLong);
                }
                let line = buf[..end].to_vec();
                self.pos += end + 2;
                return Ok(LineRead::Line(line));
            }
            scanned = buf.len();
            if scanned > limit {
                return Ok(LineRead::TooLong);
            }
            if self.fill()? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "eof before end of line",
                ));
            }
        }
    }

    /// Hands back any bytes read ahead of the current position.
    #[cfg(test)]
    pub(crate) fn take_buffered(&mut self) -> Vec<u8> {
        let rest = self.buffer[self.pos..].to_vec();
        self.buffer.clear();
        self.pos = 0;
        rest
    }

    /// Non-blocking health probe run by the pool on check-out.
    ///
    /// A healthy idle connection has nothing to read: no unsolicited bytes,
    /// no EOF, no error. The connection is exclusively owned here, so the
    /// temporary non-blocking flip is not observable elsewhere.
    pub(crate) fn probe_healthy(&mut self) -> bool {
        if self.has_buffered() {
            return false;
        }
        if self.stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut probe = [0u8; 1];
        let healthy = match self.stream.read(&mut probe) {
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => true,
            // Anything readable here is unsolicited; Ok(0) is a closed peer.
            Ok(_) | Err(_) => false,
        };
        healthy && self.stream.set_nonblocking(false).is_ok()
    }
}

impl Read for BufferedConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.has_buffered() {
            let pending = &self.buffer[self.pos..];
            let n = pending.len().min(buf.len());
            buf[..n].copy_from_slice(&pending[..n]);
            self.pos += n;
            return Ok(n);
        }
        self.stream.read(buf)
    }
}

impl Write for BufferedConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// A connection released from HTTP framing by a `101` upgrade.
///
/// Whoever claims it owns the socket outright; read-ahead bytes from the
/// HTTP buffer are preserved.
pub struct UpgradedSocket {
    pub(crate) conn: BufferedConnection,
}

impl UpgradedSocket {
    pub(crate) fn new(conn: BufferedConnection) -> UpgradedSocket {
        UpgradedSocket { conn }
    }

    #[inline]
    pub fn handle(&self) -> &SocketHandle {
        self.conn.handle()
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.conn.set_read_timeout(timeout)
    }

    /// Splits into a buffered read half (keeping any read-ahead bytes) and
    /// an independent write handle on the same socket.
    pub(crate) fn split(self) -> io::Result<(BufferedConnection, Box<dyn Stream>)> {
        let writer = self.conn.try_clone_stream()?;
        Ok((self.conn, writer))
    }
}

impl Read for UpgradedSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.conn.read(buf)
    }
}

impl Write for UpgradedSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.conn.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.conn.flush()
    }
}
