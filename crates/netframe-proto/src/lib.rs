//! Wire framing, structured message bodies, and control messages for the
//! netframe protocol.
//!
//! This crate has no I/O and no async runtime dependency — it is the part
//! of the stack a fuzzer, a simulation harness, or a non-Tokio client can
//! link against on its own. [`netframe_core`](../netframe_core/index.html)
//! builds the session and pipeline machinery on top of these types.

#![forbid(unsafe_code)]

mod container;
/// Well-known control message builders (`request_connection`,
/// `confirm_connection`, `echo`, `request_file(s)`,
/// `message_sending_response`).
pub mod control;
mod errors;
mod fields;
mod frame;

pub use container::{MessageBody, MessageHeader, Value};
pub use control::{
    confirm_connection_accepted, confirm_connection_rejected, echo, message_sending_response,
    request_connection, request_file, request_files, CONFIRM_CONNECTION, ECHO,
    MESSAGE_SENDING_RESPONSE, REQUEST_CONNECTION, REQUEST_FILE, REQUEST_FILES,
};
pub use errors::{ProtocolError, Result};
pub use fields::{decode_fields, encode_field, encode_fields};
pub use frame::{encode_frame, DecodedFrame, FrameDecoder, FrameSentinels, Mode, ProtocolEvent};
