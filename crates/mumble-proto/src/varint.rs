//! Mumble varint encoding, used both inside voice packet payloads
//! (`varint(sequence)`, `varint(session_id)`) and nowhere else on the wire —
//! the TCP control frames use the fixed `type:u16be | length:u32be` header
//! from `framing.rs` instead.
//!
//! Encoding (mirrors the reference Mumble client/server):
//! - `0..=0x7F`            -> one byte, top bit clear.
//! - `0x80..=0x3FFF`       -> two bytes, leading `10`.
//! - `0x4000..=0x1FFFFF`   -> three bytes, leading `110`.
//! - `0x200000..=0xFFFFFFFF` falls back to the 5-byte raw escape `0xF0`.
//! - values requiring more than 32 bits use the 8-byte escape `0xF4`.
//!
//! Negative numbers are not supported; Mumble varints only carry
//! sequence numbers, session ids and permission masks, all non-negative.

use bytes::{Buf, BufMut};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VarintError {
    #[error("buffer exhausted while reading varint")]
    Eof,
}

pub fn encode(value: u64, out: &mut impl BufMut) {
    if value < 0x80 {
        out.put_u8(value as u8);
    } else if value < 0x4000 {
        out.put_u8(0x80 | ((value >> 8) as u8));
        out.put_u8((value & 0xFF) as u8);
    } else if value < 0x20_0000 {
        out.put_u8(0xC0 | ((value >> 16) as u8));
        out.put_u8(((value >> 8) & 0xFF) as u8);
        out.put_u8((value & 0xFF) as u8);
    } else if value <= u32::MAX as u64 {
        out.put_u8(0xF0);
        out.put_u32(value as u32);
    } else {
        out.put_u8(0xF4);
        out.put_u64(value);
    }
}

pub fn decode(buf: &mut impl Buf) -> Result<u64, VarintError> {
    if !buf.has_remaining() {
        return Err(VarintError::Eof);
    }

    let first = buf.get_u8();

    if first & 0x80 == 0 {
        return Ok(first as u64);
    }

    if first & 0xC0 == 0x80 {
        require(buf, 1)?;
        let second = buf.get_u8();
        return Ok((((first & 0x3F) as u64) << 8) | second as u64);
    }

    if first & 0xE0 == 0xC0 {
        require(buf, 2)?;
        let b1 = buf.get_u8();
        let b2 = buf.get_u8();
        return Ok((((first & 0x1F) as u64) << 16) | ((b1 as u64) << 8) | b2 as u64);
    }

    match first {
        0xF0 => {
            require(buf, 4)?;
            Ok(buf.get_u32() as u64)
        }
        0xF4 => {
            require(buf, 8)?;
            Ok(buf.get_u64())
        }
        0xF8 => {
            // Negative one-byte varint, per the reference encoding; Mumble
            // never sends these for the fields this server decodes, but a
            // malformed peer could. Treat it as its unsigned complement so
            // decode() stays total instead of panicking.
            require(buf, 1)?;
            Ok(buf.get_u8() as u64)
        }
        0xFC => {
            require(buf, 1)?;
            let inner = buf.get_u8();
            Ok(!(inner as u64))
        }
        _ => Ok((!first) as u64),
    }
}

fn require(buf: &impl Buf, n: usize) -> Result<(), VarintError> {
    if buf.remaining() < n {
        Err(VarintError::Eof)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(v: u64) -> u64 {
        let mut buf = BytesMut::new();
        encode(v, &mut buf);
        let mut rd = buf.freeze();
        decode(&mut rd).unwrap()
    }

    #[test]
    fn roundtrips_full_u32_range_samples() {
        for v in [0u64, 1, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1FFFFF, 0x20_0000, u32::MAX as u64] {
            assert_eq!(roundtrip(v), v);
        }
    }

    #[test]
    fn shortest_form_boundaries() {
        let mut buf = BytesMut::new();
        encode(0x7F, &mut buf);
        assert_eq!(buf.len(), 1);

        let mut buf = BytesMut::new();
        encode(0x80, &mut buf);
        assert_eq!(buf.len(), 2);

        let mut buf = BytesMut::new();
        encode(0x4000, &mut buf);
        assert_eq!(buf.len(), 3);

        let mut buf = BytesMut::new();
        encode(0x20_0000, &mut buf);
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn eof_on_truncated_multibyte() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x80]);
        let mut rd = buf.freeze();
        assert_eq!(decode(&mut rd), Err(VarintError::Eof));
    }
}
