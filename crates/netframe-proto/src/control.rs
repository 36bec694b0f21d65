//! Well-known `packet`-mode message types.
//!
//! These are the control messages the session layer recognizes by name;
//! everything else in [`crate::container`] is opaque application payload.
//! Kept as plain `&str` constants plus thin constructors rather than an
//! enum, since the set is open — an application is free to define its own
//! `message_type`s and the router only special-cases the ones listed here.

use crate::container::{MessageBody, MessageHeader, Value};

/// Client asks the server to open a session.
pub const REQUEST_CONNECTION: &str = "request_connection";
/// Server confirms (or rejects) a session.
pub const CONFIRM_CONNECTION: &str = "confirm_connection";
/// Either side pings the other; the receiver flips `response` and replies.
pub const ECHO: &str = "echo";
/// Client asks for a single named file.
pub const REQUEST_FILE: &str = "request_file";
/// Client asks for a set of named files.
pub const REQUEST_FILES: &str = "request_files";
/// Server acknowledges delivery of a prior message.
pub const MESSAGE_SENDING_RESPONSE: &str = "message_sending_response";

/// Build a `request_connection` body.
///
/// `connection_key` is the pre-shared secret the server checks before moving
/// the session to `confirmed`; `auto_echo_interval_seconds` of `0` disables
/// auto-echo for the session. `session_type` is the wire code (1/2/3) of
/// the payload shape this side intends to use; `bridge_mode` asks the server
/// to treat this session as a relay (forward regardless of target id
/// match); `snipping_targets` lists extra destinations this side wants
/// forwarded to it beyond its own id.
#[must_use]
pub fn request_connection(
    header: MessageHeader,
    connection_key: impl Into<String>,
    auto_echo_interval_seconds: u64,
    session_type: u64,
    bridge_mode: bool,
    snipping_targets: Vec<String>,
) -> MessageBody {
    MessageBody::new(REQUEST_CONNECTION, header)
        .with("connection_key", Value::Str(connection_key.into()))
        .with("auto_echo", Value::Bool(auto_echo_interval_seconds > 0))
        .with("auto_echo_interval_seconds", Value::U64(auto_echo_interval_seconds))
        .with("session_type", Value::U64(session_type))
        .with("bridge_mode", Value::Bool(bridge_mode))
        .with("snipping_targets", Value::StrArray(snipping_targets))
}

/// Build a rejecting `confirm_connection` body.
#[must_use]
pub fn confirm_connection_rejected(header: MessageHeader, reason: impl Into<String>) -> MessageBody {
    MessageBody::new(CONFIRM_CONNECTION, header)
        .with("confirm", Value::Bool(false))
        .with("reason", Value::Str(reason.into()))
}

/// Build an accepting `confirm_connection` body, carrying the negotiated
/// key material (when `encrypt_mode` is on) and the snipping targets the
/// server agreed to honor.
#[must_use]
pub fn confirm_connection_accepted(
    header: MessageHeader,
    encrypt_mode: bool,
    key: &[u8],
    iv: &[u8],
    snipping_targets: Vec<String>,
) -> MessageBody {
    MessageBody::new(CONFIRM_CONNECTION, header)
        .with("confirm", Value::Bool(true))
        .with("encrypt_mode", Value::Bool(encrypt_mode))
        .with("key", Value::Bytes(key.to_vec()))
        .with("iv", Value::Bytes(iv.to_vec()))
        .with("snipping_targets", Value::StrArray(snipping_targets))
}

/// Build an `echo` body. `response` is `false` on the initiating side; the
/// receiver swaps the header and sets it `true` before sending it back.
#[must_use]
pub fn echo(header: MessageHeader, response: bool) -> MessageBody {
    MessageBody::new(ECHO, header).with("response", Value::Bool(response))
}

/// Build a `request_file` body for a single named file.
#[must_use]
pub fn request_file(header: MessageHeader, file_name: impl Into<String>) -> MessageBody {
    MessageBody::new(REQUEST_FILE, header).with("file_name", Value::Str(file_name.into()))
}

/// Build a `request_files` body for a set of named files.
#[must_use]
pub fn request_files(header: MessageHeader, file_names: Vec<String>) -> MessageBody {
    MessageBody::new(REQUEST_FILES, header).with("file_names", Value::StrArray(file_names))
}

/// Build a `message_sending_response` acknowledgment.
///
/// `response` is whether at least one confirmed session was actually handed
/// the forwarded message; `message` is a short human-readable summary for
/// logging on the receiving side.
#[must_use]
pub fn message_sending_response(
    header: MessageHeader,
    indication_id: impl Into<String>,
    requestor_id: impl Into<String>,
    requestor_sub_id: impl Into<String>,
    original_message_type: impl Into<String>,
    message: impl Into<String>,
    response: bool,
) -> MessageBody {
    MessageBody::new(MESSAGE_SENDING_RESPONSE, header)
        .with("indication_id", Value::Str(indication_id.into()))
        .with("requestor_id", Value::Str(requestor_id.into()))
        .with("requestor_sub_id", Value::Str(requestor_sub_id.into()))
        .with("original_message_type", Value::Str(original_message_type.into()))
        .with("message", Value::Str(message.into()))
        .with("response", Value::Bool(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> MessageHeader {
        MessageHeader::default()
    }

    #[test]
    fn echo_round_trips_through_the_wire_container() {
        let body = echo(header(), false);
        let bytes = body.serialize_array().expect("encode");
        let decoded = MessageBody::from_bytes(&bytes, false).expect("decode");
        assert_eq!(decoded.message_type, ECHO);
        assert_eq!(decoded.get_value("response"), Some(&Value::Bool(false)));
    }

    #[test]
    fn message_sending_response_carries_delivery_outcome() {
        let body = message_sending_response(header(), "ind-1", "A", "1.2.3.4:1", ECHO, "delivered", true);
        assert_eq!(body.get_value("response"), Some(&Value::Bool(true)));
        assert_eq!(body.get_value("indication_id"), Some(&Value::Str("ind-1".into())));
        assert_eq!(body.get_value("original_message_type"), Some(&Value::Str(ECHO.into())));
    }
}
