// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Chunked transfer coding.
//!
//! Decodes `<hex-size>[;ext]CRLF <bytes> CRLF` sequences terminated by a
//! zero-size chunk and optional trailer fields; encodes entity readers the
//! same way. A maximum single-chunk size bounds the memory of intermediate
//! buffers.

use std::io::{Read, Write};

use crate::connection::{BufferedConnection, LineRead};
use crate::error::{Error, Result};

// Chunk-size lines are tiny; anything longer than this is garbage.
const CHUNK_SIZE_LINE_LIMIT: usize = 1024;

// A size over 16 hex digits cannot fit the accumulator.
const MAX_SIZE_DIGITS: usize = 16;

/// Reads a full chunked body, enforcing the per-chunk cap and `body_limit`
/// on the decoded total. Trailer headers are consumed and discarded.
pub fn read_chunked(
    conn: &mut BufferedConnection,
    chunk_limit: u64,
    body_limit: u64,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();

    loop {
        let size = read_chunk_size(conn)?;
        if size == 0 {
            break;
        }
        if size > chunk_limit {
            return Err(Error::BodyTooLarge { limit: chunk_limit });
        }
        if body.len() as u64 + size > body_limit {
            return Err(Error::BodyTooLarge { limit: body_limit });
        }

        let start = body.len();
        body.resize(start + size as usize, 0);
        conn.read_exact(&mut body[start..]).map_err(Error::from_read)?;

        expect_crlf(conn)?;
    }

    // Trailer section: header lines until the empty line.
    loop {
        match conn.read_line(CHUNK_SIZE_LINE_LIMIT).map_err(Error::from_read)? {
            LineRead::Line(line) if line.is_empty() => break,
            LineRead::Line(_) => {}
            LineRead::TooLong => return Err(Error::HeaderFieldsTooLarge),
        }
    }

    Ok(body)
}

fn read_chunk_size(conn: &mut BufferedConnection) -> Result<u64> {
    let line = match conn.read_line(CHUNK_SIZE_LINE_LIMIT).map_err(Error::from_read)? {
        LineRead::Line(line) => line,
        LineRead::TooLong => {
            return Err(Error::MalformedChunk("chunk-size line too long".into()))
        }
    };

    // The size ends at the first `;` (chunk extension, ignored).
    let size_part = match line.iter().position(|&b| b == b';') {
        Some(idx) => &line[..idx],
        None => &line[..],
    };
    let digits: &[u8] = trim_ascii(size_part);

    if digits.is_empty() || digits.len() > MAX_SIZE_DIGITS {
        return Err(Error::MalformedChunk(String::from_utf8_lossy(&line).into_owned()));
    }

    let mut size: u64 = 0;
    for &b in digits {
        let digit = match b {
            b'0'..=b'9' => (b - b'0') as u64,
            b'a'..=b'f' => (b - b'a' + 10) as u64,
            b'A'..=b'F' => (b - b'A' + 10) as u64,
            _ => {
                return Err(Error::MalformedChunk(
                    String::from_utf8_lossy(&line).into_owned(),
                ))
            }
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(digit))
            .ok_or_else(|| Error::MalformedChunk("chunk size overflow".into()))?;
    }

    // Sizes at or above 2^63 overflow downstream accumulation.
    if size >= 1 << 63 {
        return Err(Error::MalformedChunk("chunk size overflow".into()));
    }

    Ok(size)
}

fn expect_crlf(conn: &mut BufferedConnection) -> Result<()> {
    let mut crlf = [0u8; 2];
    conn.read_exact(&mut crlf).map_err(Error::from_read)?;
    if &crlf != b"\r\n" {
        return Err(Error::MalformedChunk("missing CRLF after chunk data".into()));
    }
    Ok(())
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace());
    match start {
        None => &[],
        Some(start) => {
            let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).unwrap_or(start);
            &bytes[start..=end]
        }
    }
}

/// Chunk-encodes everything `reader` yields into `out`, ending with the
/// zero chunk. `chunk_size` is the target payload size per chunk.
pub fn write_chunked<R, W>(reader: &mut R, out: &mut W, chunk_size: usize) -> Result<()>
where
    R: Read,
    W: Write,
{
    let mut buf = vec![0u8; chunk_size.max(256)];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        };
        write!(out, "{:x}\r\n", n)?;
        out.write_all(&buf[..n])?;
        out.write_all(b"\r\n")?;
    }
    out.write_all(b"0\r\n\r\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::pipe;
    use std::io::Cursor;

    fn conn_with(bytes: &[u8]) -> BufferedConnection {
        let (mut tx, rx) = pipe();
        tx.write_all(bytes).unwrap();
        drop(tx);
        BufferedConnection::new(Box::new(rx), 4096)
    }

    #[test]
    fn decode_two_chunks() {
        let mut conn = conn_with(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
        let body = read_chunked(&mut conn, 1 << 20, 1 << 20).unwrap();
        assert_eq!(body, b"hello world");
    }

    #[test]
    fn decode_with_extension_and_trailers() {
        let mut conn = conn_with(b"5;name=val\r\nhello\r\n0\r\nTrailer: x\r\n\r\n");
        let body = read_chunked(&mut conn, 1 << 20, 1 << 20).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn size_is_case_insensitive_hex() {
        let mut conn = conn_with(b"A\r\n0123456789\r\n0\r\n\r\n");
        assert_eq!(read_chunked(&mut conn, 1 << 20, 1 << 20).unwrap().len(), 10);

        let mut conn = conn_with(b"a\r\n0123456789\r\n0\r\n\r\n");
        assert_eq!(read_chunked(&mut conn, 1 << 20, 1 << 20).unwrap().len(), 10);
    }

    #[test]
    fn bad_size_rejected() {
        let mut conn = conn_with(b"xyz\r\n");
        assert!(matches!(
            read_chunked(&mut conn, 1 << 20, 1 << 20),
            Err(Error::MalformedChunk(_))
        ));
    }

    #[test]
    fn overflowing_size_rejected() {
        let mut conn = conn_with(b"FFFFFFFFFFFFFFFF\r\n");
        assert!(matches!(
            read_chunked(&mut conn, u64::MAX, u64::MAX),
            Err(Error::MalformedChunk(_))
        ));
    }

    #[test]
    fn chunk_cap_enforced() {
        let mut conn = conn_with(b"100\r\n");
        assert!(matches!(
            read_chunked(&mut conn, 0xff, 1 << 20),
            Err(Error::BodyTooLarge { limit: 0xff })
        ));
    }

    #[test]
    fn missing_terminator_rejected() {
        let mut conn = conn_with(b"5\r\nhelloXX0\r\n\r\n");
        assert!(matches!(
            read_chunked(&mut conn, 1 << 20, 1 << 20),
            Err(Error::MalformedChunk(_))
        ));
    }

    #[test]
    fn encode_round_trip() {
        let mut encoded = Vec::new();
        write_chunked(&mut Cursor::new(b"hello world".to_vec()), &mut encoded, 4).unwrap();

        let mut conn = conn_with(&encoded);
        let body = read_chunked(&mut conn, 1 << 20, 1 << 20).unwrap();
        assert_eq!(body, b"hello world");
    }
}
