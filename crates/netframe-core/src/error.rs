//! Error types for session and pipeline logic.

use thiserror::Error;

use crate::session::SessionState;

/// Errors produced by the session state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation attempted from a state that forbids it.
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// State the session was in when the operation was attempted.
        state: SessionState,
        /// Name of the attempted operation.
        operation: String,
    },

    /// Handshake rejected by server-side policy.
    #[error("connection rejected: {reason}")]
    Rejected {
        /// Human-readable rejection reason, echoed in `confirm_connection`.
        reason: String,
    },

    /// A `binary_line` session received a message-shaped payload, or a
    /// `message_line`/`file_line` session received a binary-shaped one.
    #[error("payload shape {found:?} not accepted by a {expected:?} session")]
    WrongPayloadShape {
        /// Session type that rejected the payload.
        expected: &'static str,
        /// Shape that actually arrived.
        found: &'static str,
    },

    /// A control message was missing a required field or had the wrong
    /// value type.
    #[error("malformed control message: {0}")]
    MalformedControlMessage(String),

    /// Underlying protocol (framing/container) error.
    #[error("protocol error: {0}")]
    Protocol(#[from] netframe_proto::ProtocolError),
}

impl From<SessionError> for netframe_proto::ProtocolError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Protocol(inner) => inner,
            other => netframe_proto::ProtocolError::ContainerDecode(other.to_string()),
        }
    }
}
