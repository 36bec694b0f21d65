//! Sentinel-delimited frame codec.
//!
//! Wire layout: `[start-tag: 4B][mode: 1B][length: 4B LE][payload: length
//! B][end-tag: 4B]`. Both tags are a single configured byte repeated four
//! times (`start_code_value`/`end_code_value`, defaults 231/67).
//!
//! [`FrameDecoder`] is a pure byte-stream state machine: it never blocks,
//! never allocates more than one in-progress payload, and never delivers a
//! partial frame. Feed it whatever bytes a socket read produced (any
//! fragmentation, including single bytes) via [`FrameDecoder::decode`]; it
//! resynchronizes on any sentinel mismatch instead of erroring out, per the
//! protocol's resync policy. Protocol-level anomalies (unknown mode, end
//! sentinel mismatch) are recorded as [`ProtocolEvent`]s rather than
//! returned as errors, since they never terminate the connection — only
//! [`crate::errors::ProtocolError`] conditions raised elsewhere (container
//! decode, payload shape) are fatal to a single message.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

/// Logical channel a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Structured key/value message.
    Packet,
    /// File chunk transfer.
    File,
    /// Opaque binary blob.
    Binary,
}

impl Mode {
    /// Decode the one-byte wire representation.
    #[must_use]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Packet),
            1 => Some(Self::File),
            2 => Some(Self::Binary),
            _ => None,
        }
    }

    /// Encode as the one-byte wire representation.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Packet => 0,
            Self::File => 1,
            Self::Binary => 2,
        }
    }
}

/// Configured sentinel bytes and send chunk size.
///
/// `start_code_value` and `end_code_value` are each repeated four times to
/// form the start/end tags. `send_chunk_size` bounds the per-write slice
/// size on the send path (not a protocol limit — purely to bound syscall
/// size, usually set equal to `compress_block_size`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSentinels {
    /// Byte repeated four times to form the start tag.
    pub start_code_value: u8,
    /// Byte repeated four times to form the end tag.
    pub end_code_value: u8,
    /// Maximum bytes written per send-path syscall.
    pub send_chunk_size: usize,
}

impl Default for FrameSentinels {
    fn default() -> Self {
        Self { start_code_value: 231, end_code_value: 67, send_chunk_size: 1024 }
    }
}

/// A protocol-level anomaly observed while decoding, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// The mode byte didn't match a known [`Mode`]; decoder resynchronized.
    UnknownMode(u8),
    /// The end tag didn't match; the in-progress frame was discarded.
    EndSentinelMismatch,
}

/// A fully reassembled frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Logical channel.
    pub mode: Mode,
    /// Opaque payload bytes (not yet decompressed/decrypted/deserialized).
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DecodeState {
    AwaitStart { matched: u8 },
    AwaitMode,
    AwaitLength { mode: Mode, buf: [u8; 4], filled: u8 },
    AwaitPayload { mode: Mode, remaining: u32, payload: BytesMut },
    AwaitEnd { mode: Mode, payload: BytesMut, matched: u8 },
}

/// Streaming frame decoder.
///
/// One instance per connection — it owns the in-progress reassembly
/// buffer. Call [`FrameDecoder::decode`] with newly-arrived bytes each time
/// the socket yields data; it returns every frame that became complete.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    sentinels: FrameSentinels,
    state: DecodeState,
    events: VecDeque<ProtocolEvent>,
}

impl FrameDecoder {
    /// Create a decoder for the given sentinel configuration.
    #[must_use]
    pub fn new(sentinels: FrameSentinels) -> Self {
        Self { sentinels, state: DecodeState::AwaitStart { matched: 0 }, events: VecDeque::new() }
    }

    /// Feed newly-read bytes, draining `src`, returning every frame that
    /// became complete in the process.
    ///
    /// Never delivers a partial frame. Sentinel mismatches resynchronize
    /// internally and are recorded as [`ProtocolEvent`]s retrievable via
    /// [`Self::take_events`]; they never stall or poison the decoder.
    pub fn decode(&mut self, src: &mut BytesMut) -> Vec<DecodedFrame> {
        let mut out = Vec::new();

        while !src.is_empty() {
            match &mut self.state {
                DecodeState::AwaitStart { matched } => {
                    let byte = src[0];
                    src.advance(1);
                    if byte == self.sentinels.start_code_value {
                        *matched += 1;
                        if *matched == 4 {
                            self.state = DecodeState::AwaitMode;
                        }
                    } else {
                        *matched = 0;
                    }
                },
                DecodeState::AwaitMode => {
                    let byte = src[0];
                    src.advance(1);
                    match Mode::from_u8(byte) {
                        Some(mode) => {
                            self.state = DecodeState::AwaitLength { mode, buf: [0; 4], filled: 0 };
                        },
                        None => {
                            self.events.push_back(ProtocolEvent::UnknownMode(byte));
                            self.state = DecodeState::AwaitStart { matched: 0 };
                        },
                    }
                },
                DecodeState::AwaitLength { mode, buf, filled } => {
                    buf[*filled as usize] = src[0];
                    src.advance(1);
                    *filled += 1;
                    if *filled == 4 {
                        let length = u32::from_le_bytes(*buf);
                        let mode = *mode;
                        self.state = DecodeState::AwaitPayload {
                            mode,
                            remaining: length,
                            payload: BytesMut::with_capacity(length as usize),
                        };
                    }
                },
                DecodeState::AwaitPayload { mode, remaining, payload } => {
                    let take = (*remaining as usize).min(src.len());
                    payload.extend_from_slice(&src[..take]);
                    src.advance(take);
                    *remaining -= take as u32;
                    if *remaining == 0 {
                        let mode = *mode;
                        let payload = std::mem::take(payload);
                        self.state = DecodeState::AwaitEnd { mode, payload, matched: 0 };
                    }
                },
                DecodeState::AwaitEnd { mode, payload, matched } => {
                    let byte = src[0];
                    src.advance(1);
                    if byte == self.sentinels.end_code_value {
                        *matched += 1;
                        if *matched == 4 {
                            out.push(DecodedFrame { mode: *mode, payload: payload.split().freeze() });
                            self.state = DecodeState::AwaitStart { matched: 0 };
                        }
                    } else {
                        self.events.push_back(ProtocolEvent::EndSentinelMismatch);
                        self.state = DecodeState::AwaitStart { matched: 0 };
                    }
                },
            }
        }

        out
    }

    /// Drain accumulated protocol events (for logging at the session
    /// layer).
    pub fn take_events(&mut self) -> Vec<ProtocolEvent> {
        self.events.drain(..).collect()
    }
}

/// Encode a complete frame onto the wire.
#[must_use]
pub fn encode_frame(sentinels: &FrameSentinels, mode: Mode, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + 1 + 4 + payload.len() + 4);
    buf.extend_from_slice(&[sentinels.start_code_value; 4]);
    buf.extend_from_slice(&[mode.to_u8()]);
    #[allow(clippy::cast_possible_truncation)]
    let len = payload.len() as u32;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&[sentinels.end_code_value; 4]);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn roundtrip(sentinels: FrameSentinels, mode: Mode, payload: &[u8]) -> Vec<DecodedFrame> {
        let wire = encode_frame(&sentinels, mode, payload);
        let mut decoder = FrameDecoder::new(sentinels);
        let mut buf = BytesMut::from(&wire[..]);
        decoder.decode(&mut buf)
    }

    #[test]
    fn single_frame_round_trip() {
        let sentinels = FrameSentinels::default();
        let frames = roundtrip(sentinels, Mode::Packet, b"hello");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].mode, Mode::Packet);
        assert_eq!(&frames[0].payload[..], b"hello");
    }

    #[test]
    fn empty_payload_round_trips() {
        let sentinels = FrameSentinels::default();
        let frames = roundtrip(sentinels, Mode::Binary, b"");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn byte_at_a_time_feed_reassembles() {
        let sentinels = FrameSentinels::default();
        let wire = encode_frame(&sentinels, Mode::File, b"chunked payload");
        let mut decoder = FrameDecoder::new(sentinels);
        let mut frames = Vec::new();
        for byte in &wire {
            let mut one = BytesMut::from(&[*byte][..]);
            frames.extend(decoder.decode(&mut one));
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"chunked payload");
    }

    #[test]
    fn two_frames_back_to_back() {
        let sentinels = FrameSentinels::default();
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode_frame(&sentinels, Mode::Packet, b"one"));
        wire.extend_from_slice(&encode_frame(&sentinels, Mode::Packet, b"two"));
        let mut decoder = FrameDecoder::new(sentinels);
        let frames = decoder.decode(&mut wire);
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].payload[..], b"one");
        assert_eq!(&frames[1].payload[..], b"two");
    }

    #[test]
    fn bad_end_sentinel_resyncs_and_recovers_next_frame() {
        let sentinels = FrameSentinels::default();
        let mut wire = BytesMut::new();
        let mut corrupt = encode_frame(&sentinels, Mode::Packet, b"broken").to_vec();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF; // corrupt one byte of the end tag
        wire.extend_from_slice(&corrupt);
        wire.extend_from_slice(&encode_frame(&sentinels, Mode::Packet, b"ok"));

        let mut decoder = FrameDecoder::new(sentinels);
        let frames = decoder.decode(&mut wire);

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"ok");
        assert!(
            decoder.take_events().iter().any(|e| *e == ProtocolEvent::EndSentinelMismatch)
        );
    }

    #[test]
    fn unknown_mode_resyncs() {
        let sentinels = FrameSentinels::default();
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&[sentinels.start_code_value; 4]);
        wire.extend_from_slice(&[0xEE]); // invalid mode
        wire.extend_from_slice(&encode_frame(&sentinels, Mode::Binary, b"recovered"));

        let mut decoder = FrameDecoder::new(sentinels);
        let frames = decoder.decode(&mut wire);

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"recovered");
        assert!(decoder.take_events().iter().any(|e| matches!(e, ProtocolEvent::UnknownMode(0xEE))));
    }

    #[test]
    fn stray_start_bytes_inside_payload_are_harmless() {
        let sentinels = FrameSentinels::default();
        let payload = vec![sentinels.start_code_value; 10];
        let frames = roundtrip(sentinels, Mode::Binary, &payload);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.len(), 10);
    }

    proptest! {
        #[test]
        fn arbitrary_payload_round_trips(payload in prop::collection::vec(any::<u8>(), 0..4096)) {
            let sentinels = FrameSentinels::default();
            let frames = roundtrip(sentinels, Mode::Packet, &payload);
            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(&frames[0].payload[..], payload.as_slice());
        }

        #[test]
        fn boundary_sizes_around_chunk_size(extra in -1i32..=1i32) {
            let sentinels = FrameSentinels::default();
            let size = (sentinels.send_chunk_size as i32 + extra).max(0) as usize;
            let payload = vec![0x42u8; size];
            let frames = roundtrip(sentinels, Mode::File, &payload);
            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(frames[0].payload.len(), size);
        }
    }
}
