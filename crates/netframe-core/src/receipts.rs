//! Receipt types handed to application callbacks once a file or binary
//! transfer's inbound pipeline reaches its terminal `Notify` stage.
//!
//! Shared by `netframe-server` and `netframe-client` so both sides expose
//! the same callback shape.

use crate::pipeline::Envelope;

/// Fired once a `file`-mode transfer has been written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReceipt {
    /// Caller-supplied correlation id from the originating request, if any.
    pub indication_id: String,
    /// Sender identity.
    pub source_id: String,
    /// Sender's bound endpoint.
    pub source_sub_id: String,
    /// Path the file was written to on this side.
    pub target_path: String,
    /// Number of bytes written.
    pub bytes_written: usize,
}

impl FileReceipt {
    /// Build a receipt from the envelope carried through the pipeline and
    /// the number of bytes actually persisted.
    #[must_use]
    pub fn from_envelope(envelope: &Envelope, bytes_written: usize) -> Self {
        Self {
            indication_id: envelope.indication_id.clone(),
            source_id: envelope.source_id.clone(),
            source_sub_id: envelope.source_sub_id.clone(),
            target_path: envelope.target_path.clone(),
            bytes_written,
        }
    }
}

/// Fired once a `binary`-mode blob has been fully reassembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryReceipt {
    /// Sender identity.
    pub source_id: String,
    /// Sender's bound endpoint.
    pub source_sub_id: String,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl BinaryReceipt {
    /// Build a receipt from the envelope and payload carried through the
    /// pipeline's terminal `Notify` stage.
    #[must_use]
    pub fn from_envelope(envelope: &Envelope, payload: Vec<u8>) -> Self {
        Self { source_id: envelope.source_id.clone(), source_sub_id: envelope.source_sub_id.clone(), payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_receipt_carries_envelope_fields() {
        let envelope = Envelope {
            indication_id: "ind-1".into(),
            source_id: "A".into(),
            source_sub_id: "1.2.3.4:1".into(),
            target_id: "S".into(),
            target_sub_id: String::new(),
            source_path: "src.bin".into(),
            target_path: "dst.bin".into(),
        };
        let receipt = FileReceipt::from_envelope(&envelope, 42);
        assert_eq!(receipt.indication_id, "ind-1");
        assert_eq!(receipt.target_path, "dst.bin");
        assert_eq!(receipt.bytes_written, 42);
    }
}
