// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! RFC 6455 frame codec.
//!
//! ```text
//! Byte 0: FIN | RSV1 | RSV2 | RSV3 | Opcode(4)
//! Byte 1: MASK | PayloadLen7
//! Extended length: 0, 16 or 64 bits, network order
//! Masking-key: 0 or 32 bits
//! Payload: N bytes
//! ```
//!
//! Client-sent frames are masked, server-sent frames are not, and each
//! side enforces the opposite on read. RSV1 marks permessage-deflate on
//! the first frame of a data message; all other reserved bits reject.

use std::io::{Read, Write};

use rand::Rng;

use crate::error::{Error, Result};

/// Which end of the socket this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Frame opcodes. Anything else on the wire rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xa,
}

impl Opcode {
    fn from_wire(value: u8) -> Result<Opcode> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xa => Ok(Opcode::Pong),
            other => Err(Error::Protocol(format!("unknown opcode: {:#x}", other))),
        }
    }

    /// Close, Ping and Pong.
    #[inline]
    pub fn is_control(self) -> bool {
        (self as u8) >= 0x8
    }

    #[inline]
    pub fn is_data(self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary)
    }
}

/// One decoded frame. The payload is already unmasked.
#[derive(Debug)]
pub struct Frame {
    pub fin: bool,
    pub compressed: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn data(opcode: Opcode, payload: Vec<u8>) -> Frame {
        Frame {
            fin: true,
            compressed: false,
            opcode,
            payload,
        }
    }
}

/// Reads one frame, enforcing the reserved-bit, masking-direction, control
/// and length rules. `deflate_negotiated` permits RSV1 on data frames;
/// `max_payload` bounds a single frame's declared length.
pub fn read_frame<R: Read>(
    reader: &mut R,
    role: Role,
    deflate_negotiated: bool,
    max_payload: u64,
) -> Result<Frame> {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).map_err(Error::from_read)?;

    let fin = head[0] & 0x80 != 0;
    let rsv1 = head[0] & 0x40 != 0;
    if head[0] & 0x30 != 0 {
        return Err(Error::Protocol("reserved bits RSV2/RSV3 set".into()));
    }
    let opcode = Opcode::from_wire(head[0] & 0x0f)?;

    if rsv1 && (!deflate_negotiated || !opcode.is_data()) {
        return Err(Error::Protocol("unexpected RSV1".into()));
    }

    let masked = head[1] & 0x80 != 0;
    // The server reads client frames, which must be masked; the client
    // reads server frames, which must not be.
    if masked != (role == Role::Server) {
        return Err(Error::Protocol(match role {
            Role::Server => "unmasked frame from client".into(),
            Role::Client => "masked frame from server".into(),
        }));
    }

    let len7 = head[1] & 0x7f;
    let length = match len7 {
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).map_err(Error::from_read)?;
            u16::from_be_bytes(ext) as u64
        }
        127 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).map_err(Error::from_read)?;
            let length = u64::from_be_bytes(ext);
            if length >= 1 << 63 {
                return Err(Error::MessageTooBig {
                    length,
                    limit: max_payload,
                });
            }
            length
        }
        n => n as u64,
    };

    if opcode.is_control() {
        if !fin {
            return Err(Error::Protocol("fragmented control frame".into()));
        }
        if length > 125 {
            return Err(Error::Protocol(format!(
                "control frame of {} bytes",
                length
            )));
        }
    }

    if length > max_payload {
        return Err(Error::MessageTooBig {
            length,
            limit: max_payload,
        });
    }

    let mask_key = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).map_err(Error::from_read)?;
        if key == [0, 0, 0, 0] {
            return Err(Error::Protocol("zero masking key".into()));
        }
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).map_err(Error::from_read)?;
    if let Some(key) = mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Frame {
        fin,
        compressed: rsv1,
        opcode,
        payload,
    })
}

/// Writes one frame, masking when this endpoint is the client.
pub fn write_frame<W: Write>(
    writer: &mut W,
    role: Role,
    fin: bool,
    compressed: bool,
    opcode: Opcode,
    payload: &[u8],
) -> Result<()> {
    if opcode.is_control() && (!fin || payload.len() > 125) {
        return Err(Error::Protocol("unwritable control frame".into()));
    }

    let mut head = Vec::with_capacity(14);
    let mut first = opcode as u8;
    if fin {
        first |= 0x80;
    }
    if compressed {
        first |= 0x40;
    }
    head.push(first);

    let mask_bit = if role == Role::Client { 0x80 } else { 0x00 };
    let length = payload.len() as u64;
    if length <= 125 {
        head.push(mask_bit | length as u8);
    } else if length <= u16::MAX as u64 {
        head.push(mask_bit | 126);
        head.extend_from_slice(&(length as u16).to_be_bytes());
    } else {
        head.push(mask_bit | 127);
        head.extend_from_slice(&length.to_be_bytes());
    }

    match role {
        Role::Client => {
            let key = nonzero_mask_key();
            head.extend_from_slice(&key);
            writer.write_all(&head)?;
            let mut masked = payload.to_vec();
            apply_mask(&mut masked, key);
            writer.write_all(&masked)?;
        }
        Role::Server => {
            writer.write_all(&head)?;
            writer.write_all(payload)?;
        }
    }
    writer.flush()?;
    Ok(())
}

// Rolling 32-bit XOR with index `i mod 4`. Its own inverse.
fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

// A zero key means "no key" on the wire, so it is never generated.
fn nonzero_mask_key() -> [u8; 4] {
    let mut rng = rand::thread_rng();
    loop {
        let key: [u8; 4] = rng.gen();
        if key != [0, 0, 0, 0] {
            return key;
        }
    }
}
