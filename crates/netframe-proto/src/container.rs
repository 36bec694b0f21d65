//! Structured message container (`packet` channel payload).
//!
//! Implements the `value_container` collaborator contract
//! (`serialize_array`/`from_bytes`/`get_value`/`set_message_type`/
//! `swap_header`/streaming insert). Encoded with CBOR — self-describing,
//! compact, no code generation needed, and the same encoding used for
//! every payload past the fixed framing layer.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// A single named, typed value inside a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean field (`confirm`, `response`, `bridge_mode`, ...).
    Bool(bool),
    /// Signed integer field.
    I64(i64),
    /// Unsigned integer field (`auto_echo_interval_seconds`, ...).
    U64(u64),
    /// UTF-8 string field.
    Str(String),
    /// Opaque byte field.
    Bytes(Vec<u8>),
    /// Array of strings (`snipping_targets`, ...).
    StrArray(Vec<String>),
}

/// Routing header shared by every message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Identifier of the endpoint that produced this message.
    pub source_id: String,
    /// Sub-identifier (`<ip>:<port>`) of the producing endpoint.
    pub source_sub_id: String,
    /// Identifier of the intended recipient.
    pub target_id: String,
    /// Sub-identifier of the intended recipient, if known.
    pub target_sub_id: String,
}

impl MessageHeader {
    /// Swap source and target in place (used to turn a request into a
    /// reply, e.g. echo responses).
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.source_id, &mut self.target_id);
        std::mem::swap(&mut self.source_sub_id, &mut self.target_sub_id);
    }
}

/// A structured `packet`-mode message: header plus named typed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Well-known or application-defined message type.
    pub message_type: String,
    /// Routing header.
    pub header: MessageHeader,
    /// Named values, in insertion order (mirrors the source's streaming
    /// insert semantics — last write to a given name wins on lookup).
    values: Vec<(String, Value)>,
}

impl MessageBody {
    /// Create an empty body for the given message type.
    #[must_use]
    pub fn new(message_type: impl Into<String>, header: MessageHeader) -> Self {
        Self { message_type: message_type.into(), header, values: Vec::new() }
    }

    /// Append or replace a named value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(existing) = self.values.iter_mut().find(|(n, _)| *n == name) {
            existing.1 = value;
        } else {
            self.values.push((name, value));
        }
    }

    /// Builder-style variant of [`Self::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a named value.
    #[must_use]
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.values.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Overwrite `message_type`.
    pub fn set_message_type(&mut self, message_type: impl Into<String>) {
        self.message_type = message_type.into();
    }

    /// Swap source/target in the header (see [`MessageHeader::swap`]).
    pub fn swap_header(&mut self) {
        self.header.swap();
    }

    /// Clone the container.
    ///
    /// `deep` is accepted for interface parity with the source collaborator
    /// contract; every field here is already owned, so shallow and deep
    /// copies are identical.
    #[must_use]
    pub fn copy(&self, _deep: bool) -> Self {
        self.clone()
    }

    /// Serialize the whole container to bytes.
    pub fn serialize_array(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::ContainerEncode(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a container from bytes.
    ///
    /// `allow_compat` is reserved for accepting payloads produced by an
    /// older wire schema; the current schema has no prior version, so it
    /// has no effect yet.
    pub fn from_bytes(bytes: &[u8], _allow_compat: bool) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::ContainerDecode(e.to_string()))
    }

    /// Source identifier from the header.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.header.source_id
    }

    /// Target identifier from the header.
    #[must_use]
    pub fn target_id(&self) -> &str {
        &self.header.target_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> MessageHeader {
        MessageHeader {
            source_id: "A".into(),
            source_sub_id: "1.2.3.4:1".into(),
            target_id: "S".into(),
            target_sub_id: String::new(),
        }
    }

    #[test]
    fn round_trips_through_cbor() {
        let body = MessageBody::new("echo", header())
            .with("response", Value::Bool(true))
            .with("count", Value::U64(42));

        let bytes = body.serialize_array().expect("encode");
        let decoded = MessageBody::from_bytes(&bytes, false).expect("decode");

        assert_eq!(decoded.message_type, "echo");
        assert_eq!(decoded.get_value("response"), Some(&Value::Bool(true)));
        assert_eq!(decoded.get_value("count"), Some(&Value::U64(42)));
    }

    #[test]
    fn insert_replaces_existing_name() {
        let mut body = MessageBody::new("x", header());
        body.insert("n", Value::U64(1));
        body.insert("n", Value::U64(2));
        assert_eq!(body.get_value("n"), Some(&Value::U64(2)));
    }

    #[test]
    fn swap_header_exchanges_source_and_target() {
        let mut body = MessageBody::new("echo", header());
        body.swap_header();
        assert_eq!(body.source_id(), "S");
        assert_eq!(body.target_id(), "A");
    }
}
