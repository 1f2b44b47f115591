// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! permessage-deflate (RFC 7692), stateless variant.
//!
//! Both `client_no_context_takeover` and `server_no_context_takeover` are
//! in force, so every message compresses against a fresh raw-DEFLATE
//! stream. On send the trailing `00 00 FF FF` sync marker is stripped; on
//! receive it is appended back before inflating the concatenated
//! fragments.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};

const SYNC_MARKER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Deflates one message payload for the wire.
pub fn compress(payload: &[u8]) -> Result<Vec<u8>> {
    // Raw deflate: no zlib header.
    let mut deflater = Compress::new(Compression::default(), false);
    let mut out = Vec::with_capacity(payload.len() / 2 + 64);

    loop {
        let consumed = deflater.total_in() as usize;
        if out.len() == out.capacity() {
            out.reserve(4096);
        }
        let status = deflater
            .compress_vec(&payload[consumed..], &mut out, FlushCompress::Sync)
            .map_err(|e| Error::Protocol(format!("deflate failed: {}", e)))?;

        // The sync flush is complete once all input is consumed and the
        // output buffer was not filled to the brim.
        let consumed_all = deflater.total_in() as usize == payload.len();
        if matches!(status, Status::StreamEnd)
            || (consumed_all && out.len() < out.capacity())
        {
            break;
        }
    }

    // The sync flush always ends on the marker; strip it per RFC 7692.
    if out.ends_with(&SYNC_MARKER) {
        out.truncate(out.len() - SYNC_MARKER.len());
    }
    // An empty deflate stream still needs one byte to terminate a block.
    if out.is_empty() {
        out.push(0x00);
    }
    Ok(out)
}

/// Inflates the concatenated fragment payloads of one message, bounded by
/// `limit` decoded bytes.
pub fn decompress(payload: &[u8], limit: u64) -> Result<Vec<u8>> {
    let mut input = Vec::with_capacity(payload.len() + SYNC_MARKER.len());
    input.extend_from_slice(payload);
    input.extend_from_slice(&SYNC_MARKER);

    let mut inflater = Decompress::new(false);
    let mut out = Vec::with_capacity(payload.len() * 2 + 16);

    loop {
        let consumed = inflater.total_in() as usize;
        if out.len() == out.capacity() {
            out.reserve(4096);
        }
        let status = inflater
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)
            .map_err(|_| Error::Protocol("invalid deflate stream".into()))?;

        if out.len() as u64 > limit {
            return Err(Error::MessageTooBig {
                length: out.len() as u64,
                limit,
            });
        }

        let consumed_all = inflater.total_in() as usize == input.len();
        if matches!(status, Status::StreamEnd) || (consumed_all && out.len() < out.capacity()) {
            break;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let text = b"hello hello hello hello hello".repeat(10);
        let packed = compress(&text).unwrap();
        assert!(!packed.ends_with(&SYNC_MARKER));
        assert!(packed.len() < text.len());
        assert_eq!(decompress(&packed, 1 << 20).unwrap(), text);
    }

    #[test]
    fn empty_message() {
        let packed = compress(b"").unwrap();
        assert!(!packed.is_empty());
        assert_eq!(decompress(&packed, 1 << 20).unwrap(), b"");
    }

    #[test]
    fn stateless_messages_are_independent() {
        // No context takeover: each message decompresses on its own.
        let first = compress(b"first message").unwrap();
        let second = compress(b"second message").unwrap();
        assert_eq!(decompress(&second, 1 << 20).unwrap(), b"second message");
        assert_eq!(decompress(&first, 1 << 20).unwrap(), b"first message");
    }

    #[test]
    fn limit_enforced() {
        let text = vec![b'a'; 4096];
        let packed = compress(&text).unwrap();
        assert!(matches!(
            decompress(&packed, 100),
            Err(Error::MessageTooBig { .. })
        ));
    }

    #[test]
    fn garbage_rejects() {
        assert!(decompress(&[0xff, 0xff, 0xff, 0x01, 0x02], 1 << 20).is_err());
    }
}
