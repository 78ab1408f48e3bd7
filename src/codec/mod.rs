//! MQTT Packet Codec
//!
//! Byte-exact encoding and decoding of the control packets a mock peer
//! exchanges with the client under test. Decoding is strict: reserved
//! flag bits, non-minimal remaining lengths and trailing bytes are all
//! rejected, so a client that frames packets non-canonically never
//! decodes as if it were conformant.

mod decode;
mod encode;


pub use decode::Decoder;
pub use encode::Encoder;

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::{DecodeError, EncodeError, Packet};

/// Maximum remaining length (268,435,455 bytes = ~256 MB)
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Default cap on a single frame accepted from the client
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024; // 1 MB default

/// Read a Variable Byte Integer from buffer
/// Returns (value, bytes_consumed) or error
///
/// Running out of input is `TruncatedPayload`; more than four bytes, or a
/// value that would fit in fewer bytes, is `MalformedHeader`.
#[inline]
pub fn read_variable_int(buf: &[u8]) -> Result<(u32, usize), DecodeError> {
    let mut multiplier: u32 = 1;
    let mut value: u32 = 0;
    let mut pos = 0;

    loop {
        if pos >= 4 {
            return Err(DecodeError::MalformedHeader(
                "remaining length longer than 4 bytes",
            ));
        }
        if pos >= buf.len() {
            return Err(DecodeError::TruncatedPayload);
        }

        let byte = buf[pos];
        value += ((byte & 0x7F) as u32) * multiplier;
        pos += 1;

        if (byte & 0x80) == 0 {
            // A zero final byte after a continuation adds nothing
            if pos > 1 && byte == 0 {
                return Err(DecodeError::MalformedHeader(
                    "non-minimal remaining length encoding",
                ));
            }
            break;
        }

        multiplier *= 128;
    }

    Ok((value, pos))
}

/// Write a Variable Byte Integer to buffer
/// Returns bytes written
#[inline]
pub fn write_variable_int(buf: &mut BytesMut, mut value: u32) -> Result<usize, EncodeError> {
    if value > MAX_REMAINING_LENGTH as u32 {
        return Err(EncodeError::PacketTooLarge);
    }

    let mut count = 0;
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        count += 1;
        if value == 0 {
            break;
        }
    }
    Ok(count)
}

/// Calculate the number of bytes needed to encode a Variable Byte Integer
#[inline]
pub fn variable_int_len(value: u32) -> usize {
    if value < 128 {
        1
    } else if value < 16_384 {
        2
    } else if value < 2_097_152 {
        3
    } else {
        4
    }
}

/// Read a Two Byte Integer (u16 big-endian)
#[inline]
pub fn read_u16(buf: &[u8]) -> Result<u16, DecodeError> {
    if buf.len() < 2 {
        return Err(DecodeError::TruncatedPayload);
    }
    Ok(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Read a UTF-8 encoded string
/// Returns (string, bytes_consumed) or error
#[inline]
pub fn read_string(buf: &[u8]) -> Result<(&str, usize), DecodeError> {
    let (data, total_len) = read_binary(buf)?;
    let s = std::str::from_utf8(data)
        .map_err(|_| DecodeError::MalformedHeader("string is not valid UTF-8"))?;

    if s.contains('\0') {
        return Err(DecodeError::MalformedHeader(
            "string contains null character",
        ));
    }

    Ok((s, total_len))
}

/// Read binary data
/// Returns (data, bytes_consumed) or error
#[inline]
pub fn read_binary(buf: &[u8]) -> Result<(&[u8], usize), DecodeError> {
    let len = read_u16(buf)? as usize;
    let total_len = 2 + len;

    if buf.len() < total_len {
        return Err(DecodeError::TruncatedPayload);
    }

    Ok((&buf[2..total_len], total_len))
}

/// Write a UTF-8 encoded string
#[inline]
pub fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), EncodeError> {
    if s.contains('\0') {
        return Err(EncodeError::InvalidString);
    }
    write_binary(buf, s.as_bytes())
}

/// Write binary data
#[inline]
pub fn write_binary(buf: &mut BytesMut, data: &[u8]) -> Result<(), EncodeError> {
    let len = data.len();
    if len > 65535 {
        return Err(EncodeError::StringTooLong);
    }
    buf.put_u16(len as u16);
    buf.put_slice(data);
    Ok(())
}

/// Total length of the frame starting at `buf[0]`, once its fixed header
/// is complete.
///
/// Returns `Ok(None)` while the remaining length is still arriving.
/// Only framing is checked here; the packet type and body are not.
pub fn frame_len(buf: &[u8], max_packet_size: usize) -> Result<Option<usize>, DecodeError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
        Ok(r) => r,
        Err(DecodeError::TruncatedPayload) => return Ok(None),
        Err(e) => return Err(e),
    };

    if remaining_length as usize > max_packet_size {
        return Err(DecodeError::MalformedHeader(
            "remaining length exceeds maximum packet size",
        ));
    }

    Ok(Some(1 + len_bytes + remaining_length as usize))
}

/// Encode a single packet into a standalone buffer
pub fn encode(packet: &Packet) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::with_capacity(64);
    Encoder::new().encode(packet, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode a buffer holding exactly one packet
///
/// Missing bytes are `TruncatedPayload`; bytes past the end of the frame
/// are `MalformedHeader`.
pub fn decode(buf: &[u8]) -> Result<Packet, DecodeError> {
    match Decoder::new().decode(buf)? {
        Some((packet, consumed)) if consumed == buf.len() => Ok(packet),
        Some(_) => Err(DecodeError::MalformedHeader(
            "trailing bytes after packet",
        )),
        None => Err(DecodeError::TruncatedPayload),
    }
}
