//! Length-prefixed field encoding for `file` and `binary` mode payloads.
//!
//! A frame's payload in these modes is a flat sequence of fields, each
//! `[length: 8B LE][bytes: length B]`. Eight bytes rather than four keeps
//! the field width wide enough for whole-file transfer in one field without
//! inventing a second framing scheme for large payloads (resolves the
//! prefix-width question left open upstream).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};

const LENGTH_WIDTH: usize = 8;

/// Encode a single field: its length prefix followed by its bytes.
pub fn encode_field(buf: &mut BytesMut, field: &[u8]) {
    buf.put_u64_le(field.len() as u64);
    buf.put_slice(field);
}

/// Concatenate several fields into one payload (e.g. file name + file
/// bytes, or a binary header + a binary body).
#[must_use]
pub fn encode_fields(fields: &[&[u8]]) -> Bytes {
    let total: usize = fields.iter().map(|f| LENGTH_WIDTH + f.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for field in fields {
        encode_field(&mut buf, field);
    }
    buf.freeze()
}

/// Read every length-prefixed field out of a payload.
///
/// Fails with [`ProtocolError::TruncatedField`] if a prefix claims more
/// bytes than remain in `payload`.
pub fn decode_fields(mut payload: Bytes) -> Result<Vec<Bytes>> {
    let mut fields = Vec::new();
    while !payload.is_empty() {
        if payload.len() < LENGTH_WIDTH {
            return Err(ProtocolError::TruncatedField { expected: LENGTH_WIDTH as u64, actual: payload.len() as u64 });
        }
        let length = payload.get_u64_le();
        if (length as usize) > payload.len() {
            return Err(ProtocolError::TruncatedField { expected: length, actual: payload.len() as u64 });
        }
        fields.push(payload.split_to(length as usize));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_field_round_trips() {
        let encoded = encode_fields(&[b"hello world"]);
        let fields = decode_fields(encoded).expect("decode");
        assert_eq!(fields, vec![Bytes::from_static(b"hello world")]);
    }

    #[test]
    fn multiple_fields_round_trip_in_order() {
        let encoded = encode_fields(&[b"readme.txt", b"file contents here"]);
        let fields = decode_fields(encoded).expect("decode");
        assert_eq!(fields[0], Bytes::from_static(b"readme.txt"));
        assert_eq!(fields[1], Bytes::from_static(b"file contents here"));
    }

    #[test]
    fn empty_field_is_valid() {
        let encoded = encode_fields(&[b""]);
        let fields = decode_fields(encoded).expect("decode");
        assert_eq!(fields, vec![Bytes::new()]);
    }

    #[test]
    fn truncated_length_prefix_is_rejected() {
        let mut short = BytesMut::new();
        short.put_slice(&[0, 0, 0]);
        let err = decode_fields(short.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedField { .. }));
    }

    #[test]
    fn claimed_length_beyond_buffer_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u64_le(100);
        buf.put_slice(b"too short");
        let err = decode_fields(buf.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedField { expected: 100, .. }));
    }
}
