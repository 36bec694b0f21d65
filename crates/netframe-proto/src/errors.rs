//! Protocol-level error types.
//!
//! Framing and container errors are always recoverable at the codec layer:
//! a malformed frame resynchronizes the decoder rather than poisoning the
//! connection. Container (de)serialization errors surface to the caller so
//! the session can decide whether a bad payload is fatal for that message.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while framing or unframing the wire protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame header named an opcode this build doesn't recognize.
    #[error("unknown frame mode: {0:#04x}")]
    UnknownMode(u8),

    /// The end sentinel didn't match; the in-progress frame was discarded.
    #[error("end sentinel mismatch, frame discarded")]
    EndSentinelMismatch,

    /// A length-prefixed field inside a file/binary payload claimed more
    /// bytes than remain in the buffer.
    #[error("truncated field: expected {expected} bytes, found {actual}")]
    TruncatedField {
        /// Bytes the length prefix claimed.
        expected: u64,
        /// Bytes actually available.
        actual: u64,
    },

    /// A length-prefixed field's width makes the value unrepresentable
    /// on this platform (never happens with the fixed 8-byte width).
    #[error("field length {0} exceeds addressable size")]
    FieldTooLarge(u64),

    /// Container body failed to serialize to CBOR.
    #[error("container encode failed: {0}")]
    ContainerEncode(String),

    /// Container body failed to deserialize from CBOR.
    #[error("container decode failed: {0}")]
    ContainerDecode(String),

    /// A `binary_line` session received a message-shaped payload, or vice
    /// versa.
    #[error("payload shape {found:?} not accepted by a {expected:?} session")]
    WrongPayloadShape {
        /// The session type that rejected the payload.
        expected: &'static str,
        /// What actually arrived.
        found: &'static str,
    },
}
