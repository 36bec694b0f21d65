//! Fuzz target for `MessageBody` CBOR deserialization.
//!
//! `MessageBody` implements the `value_container` external collaborator
//! contract; this target hardens `MessageBody::from_bytes` against
//! adversarial CBOR the way the codec is hardened against adversarial
//! framing.
//!
//! # Strategy
//!
//! - Deeply nested arrays/maps (stack exhaustion)
//! - Huge claimed lengths on byte strings / text strings / arrays
//! - Fully arbitrary byte sequences
//!
//! # Invariants
//!
//! - `MessageBody::from_bytes` never panics on any input.
//! - A value that round-trips through `serialize_array` always decodes
//!   back to the same body.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use netframe_proto::{MessageBody, MessageHeader, Value};

#[derive(Debug, Clone, Arbitrary)]
enum CborAttack {
    DeeplyNested { depth: u8, kind: NestedKind },
    HugeLength { claimed_len_exponent: u8, kind: HugeKind },
    RandomBytes { bytes: Vec<u8> },
    RoundTrip { message_type: String, values: Vec<(String, FuzzValue)> },
}

#[derive(Debug, Clone, Arbitrary)]
enum NestedKind {
    Array,
    Map,
}

#[derive(Debug, Clone, Arbitrary)]
enum HugeKind {
    ByteString,
    TextString,
    Array,
}

#[derive(Debug, Clone, Arbitrary)]
enum FuzzValue {
    Bool(bool),
    I64(i64),
    U64(u64),
    Str(String),
    Bytes(Vec<u8>),
    StrArray(Vec<String>),
}

impl From<FuzzValue> for Value {
    fn from(v: FuzzValue) -> Self {
        match v {
            FuzzValue::Bool(b) => Value::Bool(b),
            FuzzValue::I64(i) => Value::I64(i),
            FuzzValue::U64(u) => Value::U64(u),
            FuzzValue::Str(s) => Value::Str(s),
            FuzzValue::Bytes(b) => Value::Bytes(b),
            FuzzValue::StrArray(a) => Value::StrArray(a),
        }
    }
}

fn nested_cbor(depth: usize, kind: &NestedKind) -> Vec<u8> {
    let mut bytes = Vec::new();
    match kind {
        NestedKind::Array => {
            for _ in 0..depth {
                bytes.push(0x81); // array of length 1
            }
            bytes.push(0x01);
        },
        NestedKind::Map => {
            for _ in 0..depth {
                bytes.push(0xA1); // map with 1 entry
                bytes.push(0x61); // text string length 1
                bytes.push(b'a');
            }
            bytes.push(0x01);
        },
    }
    bytes
}

fn huge_length_cbor(exponent: u8, kind: &HugeKind) -> Vec<u8> {
    let exponent = u32::from(exponent % 21);
    let claimed: u32 = if exponent < 20 { 1u32 << exponent } else { u32::MAX };
    let mut bytes = match kind {
        HugeKind::ByteString => vec![0x5A],
        HugeKind::TextString => vec![0x7A],
        HugeKind::Array => vec![0x9A],
    };
    bytes.extend_from_slice(&claimed.to_be_bytes());
    bytes.extend(std::iter::repeat(0xAAu8).take((claimed as usize).min(16)));
    bytes
}

fuzz_target!(|attack: CborAttack| {
    match attack {
        CborAttack::DeeplyNested { depth, kind } => {
            let bytes = nested_cbor((depth % 64) as usize, &kind);
            let _ = MessageBody::from_bytes(&bytes, false);
        },
        CborAttack::HugeLength { claimed_len_exponent, kind } => {
            let bytes = huge_length_cbor(claimed_len_exponent, &kind);
            let _ = MessageBody::from_bytes(&bytes, false);
        },
        CborAttack::RandomBytes { bytes } => {
            let _ = MessageBody::from_bytes(&bytes, false);
        },
        CborAttack::RoundTrip { message_type, values } => {
            let header = MessageHeader {
                source_id: "A".to_string(),
                source_sub_id: "1.2.3.4:1".to_string(),
                target_id: "S".to_string(),
                target_sub_id: String::new(),
            };
            let mut body = MessageBody::new(message_type, header);
            for (i, (name, value)) in values.into_iter().enumerate().take(64) {
                body.insert(format!("{name}-{i}"), value.into());
            }
            if let Ok(bytes) = body.serialize_array() {
                if let Ok(decoded) = MessageBody::from_bytes(&bytes, false) {
                    assert_eq!(decoded.message_type, body.message_type);
                }
            }
        },
    }
});
