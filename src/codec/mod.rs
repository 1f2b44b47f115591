// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The HTTP/1.1 wire codec.
//!
//! Line-oriented start-line and header parsing with hard limits, body-length
//! resolution, chunked transfer coding, and write-out of outgoing messages
//! with the framing fixed up: a known-size body gets `Content-Length`, an
//! unknown-size body gets `Transfer-Encoding: chunked`, and bodyless methods
//! are stripped of both.

pub mod chunked;

use std::io::{Read, Write};

use crate::connection::{BufferedConnection, LineRead};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::headers::{Header, Headers};
use crate::message::Message;
use crate::request::{HttpRequest, RequestLine};
use crate::response::{HttpResponse, StatusLine};
use crate::uri::Target;

/// Limits enforced while reading a message.
#[derive(Debug, Clone)]
pub struct CodecLimits {
    /// Max bytes of a start line, terminator included.
    pub start_line_limit: usize,
    /// Max number of header fields.
    pub header_limit: usize,
    /// Max total header bytes.
    pub header_bytes_limit: usize,
    /// Max decoded body bytes.
    pub body_limit: u64,
    /// Max size of a single chunk.
    pub chunk_limit: u64,
    /// Target size of encoder chunks and socket buffers.
    pub buffer_size: usize,
}

impl Default for CodecLimits {
    fn default() -> CodecLimits {
        CodecLimits {
            start_line_limit: 8 * 1024,
            header_limit: 100,
            header_bytes_limit: 64 * 1024,
            body_limit: 8 * 1024 * 1024,
            chunk_limit: 1024 * 1024,
            buffer_size: 8 * 1024,
        }
    }
}

/// How the body of a message is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Fixed(u64),
    Chunked,
    UntilEof,
}

/// Reads and parses a request line plus header block.
pub fn read_request_head(
    conn: &mut BufferedConnection,
    limits: &CodecLimits,
) -> Result<(RequestLine, Headers)> {
    let line = match conn.read_line(limits.start_line_limit).map_err(Error::from_read)? {
        LineRead::Line(line) => line,
        LineRead::TooLong => {
            return Err(Error::RequestTooLong {
                limit: limits.start_line_limit,
            })
        }
    };

    let line = parse_request_line(&line)?;
    let headers = read_headers(conn, limits)?;
    Ok((line, headers))
}

/// Reads and parses a status line plus header block.
pub fn read_response_head(
    conn: &mut BufferedConnection,
    limits: &CodecLimits,
) -> Result<(StatusLine, Headers)> {
    let line = match conn.read_line(limits.start_line_limit).map_err(Error::from_read)? {
        LineRead::Line(line) => line,
        LineRead::TooLong => {
            return Err(Error::ResponseTooLong {
                limit: limits.start_line_limit,
            })
        }
    };

    let line = parse_status_line(&line)?;
    let headers = read_headers(conn, limits)?;
    Ok((line, headers))
}

/// Reads a complete request: head, framing resolution, body.
pub fn read_request(conn: &mut BufferedConnection, limits: &CodecLimits) -> Result<HttpRequest> {
    let (line, headers) = read_request_head(conn, limits)?;
    let framing = request_body_framing(&headers)?;
    let entity = read_body(conn, framing, limits)?;
    Ok(HttpRequest::new(line).with_headers(headers).with_entity(entity))
}

/// Reads a complete response to a request sent with `request_method`.
pub fn read_response(
    conn: &mut BufferedConnection,
    limits: &CodecLimits,
    request_method: &str,
) -> Result<HttpResponse> {
    let (line, headers) = read_response_head(conn, limits)?;
    let framing = response_body_framing(request_method, line.code(), &headers)?;
    let entity = read_body(conn, framing, limits)?;
    Ok(HttpResponse::new(line).with_headers(headers).with_entity(entity))
}

// `method SP target SP HTTP/M.N`, single spaces, token method, no CTL in
// the target.
fn parse_request_line(line: &[u8]) -> Result<RequestLine> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::MalformedStartLine(String::from_utf8_lossy(line).into_owned()))?;

    let bad = || Error::MalformedStartLine(text.to_owned());

    let mut parts = text.split(' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) if !m.is_empty() && !t.is_empty() => (m, t, v),
        _ => return Err(bad()),
    };

    if target.bytes().any(|b| b < 0x21 || b == 0x7f) {
        return Err(bad());
    }

    let version = parse_version(version).ok_or_else(bad)?;
    let target = Target::parse(target)?;
    RequestLine::new(method, target, version)
}

// `HTTP/M.N SP code [SP reason]`.
fn parse_status_line(line: &[u8]) -> Result<StatusLine> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::MalformedStartLine(String::from_utf8_lossy(line).into_owned()))?;

    let bad = || Error::MalformedStartLine(text.to_owned());

    let mut parts = text.splitn(3, ' ');
    let version = parts.next().and_then(parse_version).ok_or_else(bad)?;
    let code_str = parts.next().ok_or_else(bad)?;
    let reason = parts.next().unwrap_or("");

    if code_str.len() != 3 || !code_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let code: u16 = code_str.parse().map_err(|_| bad())?;

    StatusLine::new(version, code, reason)
}

fn parse_version(s: &str) -> Option<(u8, u8)> {
    let rest = s.strip_prefix("HTTP/")?;
    let (major, minor) = rest.split_once('.')?;
    if major.len() != 1 || minor.len() != 1 {
        return None;
    }
    Some((major.parse().ok()?, minor.parse().ok()?))
}

// Accumulates header lines (rejecting obs-fold via httparse), then parses
// the block in one shot.
fn read_headers(conn: &mut BufferedConnection, limits: &CodecLimits) -> Result<Headers> {
    let mut block: Vec<u8> = Vec::new();
    let mut count = 0usize;

    loop {
        let line = match conn.read_line(limits.header_bytes_limit).map_err(Error::from_read)? {
            LineRead::Line(line) => line,
            LineRead::TooLong => return Err(Error::HeaderFieldsTooLarge),
        };
        if line.is_empty() {
            break;
        }
        count += 1;
        if count > limits.header_limit {
            return Err(Error::HeaderFieldsTooLarge);
        }
        if block.len() + line.len() + 2 > limits.header_bytes_limit {
            return Err(Error::HeaderFieldsTooLarge);
        }
        block.extend_from_slice(&line);
        block.extend_from_slice(b"\r\n");
    }
    block.extend_from_slice(b"\r\n");

    let mut parsed = vec![httparse::EMPTY_HEADER; count.max(1)];
    let fields = match httparse::parse_headers(&block, &mut parsed) {
        Ok(httparse::Status::Complete((_, fields))) => fields,
        Ok(httparse::Status::Partial) => return Err(Error::UnexpectedEof),
        Err(e) => return Err(Error::MalformedHeader(e.to_string())),
    };

    let mut headers = Headers::new();
    for field in fields {
        let value = std::str::from_utf8(field.value)
            .map_err(|_| Error::MalformedHeader(field.name.to_owned()))?;
        headers = headers.with_added(Header::new(field.name, value.trim())?);
    }
    Ok(headers)
}

/// Resolves how a request body is framed.
///
/// `Transfer-Encoding` with `chunked` last wins; a `Transfer-Encoding`
/// that is not chunked-last is unreadable; conflicting `Transfer-Encoding`
/// plus `Content-Length` is rejected outright. Requests with neither carry
/// no body.
pub fn request_body_framing(headers: &Headers) -> Result<BodyFraming> {
    match common_framing(headers)? {
        Some(framing) => Ok(framing),
        None => Ok(BodyFraming::Empty),
    }
}

/// Resolves how a response body is framed, given the status code and the
/// method of the request it answers.
pub fn response_body_framing(
    request_method: &str,
    code: u16,
    headers: &Headers,
) -> Result<BodyFraming> {
    if request_method.eq_ignore_ascii_case("HEAD")
        || (100..200).contains(&code)
        || code == 204
        || code == 304
    {
        return Ok(BodyFraming::Empty);
    }
    match common_framing(headers)? {
        Some(framing) => Ok(framing),
        // No explicit framing: the body runs to end-of-stream and the
        // connection cannot be reused.
        None => Ok(BodyFraming::UntilEof),
    }
}

fn common_framing(headers: &Headers) -> Result<Option<BodyFraming>> {
    let te = headers.get_tokens("Transfer-Encoding");
    let has_cl = headers.contains("Content-Length");

    if !te.is_empty() {
        if has_cl {
            return Err(Error::Protocol(
                "conflicting Transfer-Encoding and Content-Length".into(),
            ));
        }
        let chunked_last = te
            .last()
            .is_some_and(|t| t.eq_ignore_ascii_case("chunked"));
        if !chunked_last {
            return Err(Error::Protocol(format!(
                "unreadable transfer coding: {}",
                te.join(", ")
            )));
        }
        return Ok(Some(BodyFraming::Chunked));
    }

    if has_cl {
        let mut values = headers.get_all("Content-Length");
        let first = values.next().unwrap_or("");
        if values.any(|v| v != first) {
            return Err(Error::Protocol("disagreeing Content-Length fields".into()));
        }
        let len = parse_decimal(first)
            .ok_or_else(|| Error::MalformedHeader(format!("Content-Length: {}", first)))?;
        return Ok(Some(BodyFraming::Fixed(len)));
    }

    Ok(None)
}

// Strictly decimal; anything signed, empty or non-numeric is rejected.
fn parse_decimal(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Reads a body according to its resolved framing, bounded by the limits.
pub fn read_body(
    conn: &mut BufferedConnection,
    framing: BodyFraming,
    limits: &CodecLimits,
) -> Result<Entity> {
    match framing {
        BodyFraming::Empty => Ok(Entity::empty()),
        BodyFraming::Fixed(0) => Ok(Entity::empty()),
        BodyFraming::Fixed(n) => {
            if n > limits.body_limit {
                return Err(Error::BodyTooLarge {
                    limit: limits.body_limit,
                });
            }
            let mut buf = vec![0u8; n as usize];
            conn.read_exact(&mut buf).map_err(Error::from_read)?;
            Ok(Entity::from_bytes(buf))
        }
        BodyFraming::Chunked => {
            let body = chunked::read_chunked(conn, limits.chunk_limit, limits.body_limit)?;
            Ok(if body.is_empty() {
                Entity::empty()
            } else {
                Entity::from_bytes(body)
            })
        }
        BodyFraming::UntilEof => {
            let mut buf = Vec::new();
            let mut take = conn.take(limits.body_limit + 1);
            take.read_to_end(&mut buf).map_err(Error::from_read)?;
            if buf.len() as u64 > limits.body_limit {
                return Err(Error::BodyTooLarge {
                    limit: limits.body_limit,
                });
            }
            Ok(if buf.is_empty() {
                Entity::empty()
            } else {
                Entity::from_bytes(buf)
            })
        }
    }
}

// Methods that logically carry no body on the wire.
fn is_bodyless_method(method: &str) -> bool {
    matches!(method, "GET" | "HEAD" | "DELETE" | "TRACE")
}

/// Writes a complete request with correct framing.
///
/// Bodyless methods are stripped of entity and framing headers. Otherwise a
/// missing `Content-Length`/`Transfer-Encoding: chunked` pair is filled in
/// from the entity's known size, falling back to chunked encoding.
pub fn write_request(
    conn: &mut BufferedConnection,
    request: &HttpRequest,
    limits: &CodecLimits,
) -> Result<()> {
    let framing = write_request_head(conn, request)?;
    write_request_body(conn, request, framing, limits)
}

/// Writes the start line and fixed-up headers of a request, returning the
/// framing plan the body must follow. Used directly by the client when it
/// waits for `100 Continue` between head and body.
pub(crate) fn write_request_head(
    conn: &mut BufferedConnection,
    request: &HttpRequest,
) -> Result<BodyFraming> {
    let (version_major, version_minor) = request.version();
    let mut head = Vec::with_capacity(256);
    write!(
        head,
        "{} {} HTTP/{}.{}\r\n",
        request.method(),
        request.target(),
        version_major,
        version_minor
    )?;

    let bodyless = is_bodyless_method(request.method());
    let mut headers = request.headers().clone();
    let framing;

    if bodyless {
        headers = headers
            .with_removed("Content-Length")
            .with_removed("Transfer-Encoding");
        framing = BodyFraming::Empty;
    } else {
        framing = plan_outgoing_body(&mut headers, request.entity());
    }

    write_header_block(&mut head, &headers)?;
    conn.write_all(&head)?;
    conn.flush()?;
    Ok(framing)
}

/// Writes the body previously planned by [`write_request_head`].
pub(crate) fn write_request_body(
    conn: &mut BufferedConnection,
    request: &HttpRequest,
    framing: BodyFraming,
    limits: &CodecLimits,
) -> Result<()> {
    write_planned_body(conn, request.entity(), framing, limits)?;
    conn.flush()?;
    Ok(())
}

/// Writes a complete response.
///
/// `request_method` is the method of the request being answered: `HEAD`
/// suppresses the body bytes while keeping the entity's framing headers.
/// `204`, `304` and interim responses never carry a body.
pub fn write_response(
    conn: &mut BufferedConnection,
    response: &HttpResponse,
    request_method: &str,
    limits: &CodecLimits,
) -> Result<()> {
    let (version_major, version_minor) = response.version();
    let mut head = Vec::with_capacity(256);
    write!(
        head,
        "HTTP/{}.{} {} {}\r\n",
        version_major,
        version_minor,
        response.code(),
        response.reason()
    )?;

    let code = response.code();
    let suppressed = (100..200).contains(&code) || code == 204 || code == 304;
    let head_only = request_method.eq_ignore_ascii_case("HEAD");

    let mut headers = response.headers().clone();
    let framing = if suppressed {
        BodyFraming::Empty
    } else {
        plan_outgoing_body(&mut headers, response.entity())
    };

    write_header_block(&mut head, &headers)?;
    conn.write_all(&head)?;
    if !head_only {
        write_planned_body(conn, response.entity(), framing, limits)?;
    }
    conn.flush()?;
    Ok(())
}

/// Writes a bare interim status line, e.g. `100 Continue`.
pub fn write_interim(conn: &mut BufferedConnection, code: u16) -> Result<()> {
    let line = format!(
        "HTTP/1.1 {} {}\r\n\r\n",
        code,
        crate::response::reason_phrase(code)
    );
    conn.write_all(line.as_bytes())?;
    conn.flush()?;
    Ok(())
}

// Decides the outgoing framing and patches the header list to match.
fn plan_outgoing_body(headers: &mut Headers, entity: &Entity) -> BodyFraming {
    let chunked = headers
        .get_tokens("Transfer-Encoding")
        .last()
        .is_some_and(|t| t.eq_ignore_ascii_case("chunked"));
    if chunked {
        return BodyFraming::Chunked;
    }
    if let Some(raw) = headers.get("Content-Length") {
        if let Some(len) = parse_decimal(raw) {
            return BodyFraming::Fixed(len);
        }
    }
    match entity.known_size() {
        Some(len) => {
            *headers = headers
                .clone()
                .with_set(Header::known("Content-Length", len.to_string()));
            BodyFraming::Fixed(len)
        }
        None => {
            *headers = headers
                .clone()
                .with_set(Header::known("Transfer-Encoding", "chunked"));
            BodyFraming::Chunked
        }
    }
}

fn write_header_block(out: &mut Vec<u8>, headers: &Headers) -> Result<()> {
    for header in headers {
        write!(out, "{}: {}\r\n", header.name(), header.value())?;
    }
    out.extend_from_slice(b"\r\n");
    Ok(())
}

fn write_planned_body(
    conn: &mut BufferedConnection,
    entity: &Entity,
    framing: BodyFraming,
    limits: &CodecLimits,
) -> Result<()> {
    match framing {
        BodyFraming::Empty | BodyFraming::Fixed(0) => Ok(()),
        BodyFraming::Fixed(_) | BodyFraming::UntilEof => {
            let mut reader = entity.reader()?;
            std::io::copy(&mut reader, conn)?;
            Ok(())
        }
        BodyFraming::Chunked => {
            let mut reader = entity.reader()?;
            chunked::write_chunked(&mut reader, conn, limits.buffer_size)
        }
    }
}
