//! Fuzz target for `decode_fields`, the length-prefixed field layout used
//! by `file`- and `binary`-mode payloads.
//!
//! # Invariants
//!
//! - `decode_fields` never panics on any byte sequence, including a claimed
//!   length that exceeds the remaining buffer or the platform's `usize`.
//! - Fields produced by `encode_fields` always round-trip byte-for-byte
//!   through `decode_fields`.

#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use netframe_proto::{decode_fields, encode_fields};

#[derive(Debug, Clone, Arbitrary)]
enum FieldFuzzInput {
    Arbitrary(Vec<u8>),
    RoundTrip(Vec<Vec<u8>>),
}

fuzz_target!(|input: FieldFuzzInput| {
    match input {
        FieldFuzzInput::Arbitrary(bytes) => {
            let _ = decode_fields(Bytes::from(bytes));
        },
        FieldFuzzInput::RoundTrip(fields) => {
            let refs: Vec<&[u8]> = fields.iter().map(Vec::as_slice).take(32).collect();
            let encoded = encode_fields(&refs);
            let decoded = decode_fields(encoded).expect("fields produced by encode_fields always decode");
            assert_eq!(decoded.len(), refs.len());
            for (field, expected) in decoded.iter().zip(refs.iter()) {
                assert_eq!(&field[..], *expected);
            }
        },
    }
});
