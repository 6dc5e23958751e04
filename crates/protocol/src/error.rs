//! Error types for packet and message handling.

use thiserror::Error;

use crate::message::ValueKind;
use crate::packet::PacketType;

/// Error type for protocol operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer ended before a complete field could be read.
    #[error("insufficient data: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// The packet type byte is not a recognized value.
    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),

    /// The message element type byte is not a recognized value.
    #[error("unknown element type: {0}")]
    UnknownElementType(u8),

    /// The bytes are well-formed at the field level but structurally invalid.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A frame header announced more bytes than the receiver accepts.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// A key, name or value does not fit its length field.
    #[error("{what} of {len} bytes exceeds limit of {max}")]
    TooLong {
        what: &'static str,
        len: usize,
        max: usize,
    },

    /// A packet arrived that is not valid at this point of the exchange.
    #[error("unexpected {0} packet")]
    UnexpectedPacket(PacketType),
}

/// A message field was read with the wrong accessor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("key {key:?} holds a {found}, not a {expected}")]
pub struct TypeMismatch {
    pub key: String,
    pub expected: ValueKind,
    pub found: ValueKind,
}

/// The daemon answered a command with `success = no`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("command failed: {message}")]
pub struct CommandFailed {
    pub message: String,
}
