// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Error types shared by every layer of the library.
//!
//! The codec raises the precise variants; the server pipeline maps them to
//! status codes unless a user error handler matches first, and the client
//! returns them to the caller unchanged.

use std::io;

/// Broad classification of an [`Error`].
///
/// Handlers that only care about the family of a failure (for example to map
/// every parse failure to a `400`) can match on this instead of the exact
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed start line, header, URI or chunk size.
    Parse,
    /// A configured limit was breached (header count/bytes, body bytes,
    /// URI length, frame length).
    LimitExceeded,
    /// A read, continue or idle timeout fired.
    Timeout,
    /// HTTP or WebSocket semantics were violated by well-formed input.
    Protocol,
    /// The transport failed: EOF mid-message, reset, TLS failure.
    Connection,
    /// Raised by a user handler.
    Application,
    /// A critical service failed to start.
    Lifecycle,
    /// Cooperative signal to drop a connection with no response.
    Abort,
}

/// Any error produced by this library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request line or status line did not match the HTTP grammar.
    #[error("malformed start line: {0}")]
    MalformedStartLine(String),

    /// A header line did not match `token ":" field-value`.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// A URI or request target could not be parsed.
    #[error("malformed uri: {0}")]
    MalformedUri(String),

    /// A chunk-size line of a chunked body could not be parsed.
    #[error("malformed chunk: {0}")]
    MalformedChunk(String),

    /// The request line exceeded the configured byte limit.
    #[error("request line longer than {limit} bytes")]
    RequestTooLong { limit: usize },

    /// The status line exceeded the configured byte limit.
    #[error("status line longer than {limit} bytes")]
    ResponseTooLong { limit: usize },

    /// Too many headers, or too many total header bytes.
    #[error("header fields too large")]
    HeaderFieldsTooLarge,

    /// A body or buffered message grew past the configured limit.
    #[error("body larger than {limit} bytes")]
    BodyTooLarge { limit: u64 },

    /// A WebSocket frame or assembled message was too large.
    #[error("frame of {length} bytes exceeds limit of {limit} bytes")]
    MessageTooBig { length: u64, limit: u64 },

    /// The peer closed the stream in the middle of a message.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// No byte of the expected data arrived within the read timeout.
    #[error("read timed out")]
    ReadTimeout,

    /// A WebSocket session saw no traffic within its idle timeout.
    #[error("idle timed out")]
    IdleTimeout,

    /// HTTP or WebSocket semantics were violated: conflicting
    /// `Transfer-Encoding` + `Content-Length`, reserved frame bits, a control
    /// frame longer than 125 bytes, wrong masking direction, and so on.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A typed accessor was invoked on a message lacking the header.
    #[error("header not found: {0}")]
    HeaderNotFound(&'static str),

    /// A path parameter could not be converted to the requested type.
    #[error("path parameter not convertible: {name}")]
    ParameterNotConvertible { name: String },

    /// Transport-level failure.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Raised by a user-supplied handler or filter.
    #[error("application error: {0}")]
    Application(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A hook tagged as a critical service failed during server start.
    #[error("critical service failed to start: {service}")]
    Lifecycle {
        service: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Instructs the pipeline to drop the connection without any response.
    /// Specifically caught there; never mapped to a `500`.
    #[error("response aborted")]
    ResponseAborted,
}

impl Error {
    /// The broad family this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedStartLine(_)
            | Error::MalformedHeader(_)
            | Error::MalformedUri(_)
            | Error::MalformedChunk(_) => ErrorKind::Parse,
            Error::RequestTooLong { .. }
            | Error::ResponseTooLong { .. }
            | Error::HeaderFieldsTooLarge
            | Error::BodyTooLarge { .. }
            | Error::MessageTooBig { .. } => ErrorKind::LimitExceeded,
            Error::ReadTimeout | Error::IdleTimeout => ErrorKind::Timeout,
            Error::Protocol(_)
            | Error::HeaderNotFound(_)
            | Error::ParameterNotConvertible { .. } => ErrorKind::Protocol,
            Error::UnexpectedEof | Error::Io(_) => ErrorKind::Connection,
            Error::Application(_) => ErrorKind::Application,
            Error::Lifecycle { .. } => ErrorKind::Lifecycle,
            Error::ResponseAborted => ErrorKind::Abort,
        }
    }

    /// Wraps an arbitrary error raised by user code.
    pub fn application<E>(err: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Application(Box::new(err))
    }

    /// Converts a socket-level error into the library's taxonomy, turning
    /// timeout kinds into [`Error::ReadTimeout`] and quiet disconnects into
    /// [`Error::UnexpectedEof`].
    pub(crate) fn from_read(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::ReadTimeout,
            io::ErrorKind::UnexpectedEof => Error::UnexpectedEof,
            _ => Error::Io(err),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(Error::MalformedHeader("x".into()).kind(), ErrorKind::Parse);
        assert_eq!(Error::HeaderFieldsTooLarge.kind(), ErrorKind::LimitExceeded);
        assert_eq!(Error::ReadTimeout.kind(), ErrorKind::Timeout);
        assert_eq!(Error::ResponseAborted.kind(), ErrorKind::Abort);
    }

    #[test]
    fn read_error_mapping() {
        let timeout = io::Error::new(io::ErrorKind::WouldBlock, "t");
        assert!(matches!(Error::from_read(timeout), Error::ReadTimeout));

        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(Error::from_read(eof), Error::UnexpectedEof));

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "rst");
        assert!(matches!(Error::from_read(reset), Error::Io(_)));
    }
}
