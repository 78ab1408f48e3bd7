//! Protocol error types

use std::fmt;

/// Errors that can occur during packet decoding
///
/// Decoding bytes from a misbehaving client is an expected path, so every
/// malformed input maps to one of these instead of a panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fixed header, remaining length or variable header is invalid
    MalformedHeader(&'static str),
    /// Input ends before the packet does
    TruncatedPayload,
    /// Packet type nibble is not one this codec speaks
    UnknownType(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedHeader(msg) => write!(f, "malformed header: {}", msg),
            Self::TruncatedPayload => write!(f, "truncated payload"),
            Self::UnknownType(t) => write!(f, "unknown packet type: {}", t),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur during packet encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Remaining length exceeds the 4-byte variable integer range
    PacketTooLarge,
    /// String or binary field longer than 65535 bytes
    StringTooLong,
    /// Packet identifier missing for QoS > 0, present for QoS 0, or zero
    InvalidPacketId,
    /// DUP set on a QoS 0 PUBLISH
    InvalidFlags,
    /// String field contains a NUL character
    InvalidString,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketTooLarge => write!(f, "packet too large"),
            Self::StringTooLong => write!(f, "string too long"),
            Self::InvalidPacketId => write!(f, "invalid packet identifier for QoS"),
            Self::InvalidFlags => write!(f, "DUP must be 0 for QoS 0"),
            Self::InvalidString => write!(f, "string contains null character"),
        }
    }
}

impl std::error::Error for EncodeError {}
