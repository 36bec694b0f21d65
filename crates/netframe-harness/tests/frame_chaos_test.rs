//! Wire codec resilience under corruption, driven over a turmoil-simulated
//! TCP link. No session or pipeline logic is involved here: this exercises
//! [`netframe_proto::FrameDecoder`]'s resync policy directly over turmoil's
//! TCP simulation, before any higher layer is involved.

use netframe_harness::corrupt_deterministic;
use netframe_proto::{encode_frame, FrameDecoder, FrameSentinels, Mode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use turmoil::net::{TcpListener, TcpStream};

/// One corrupted frame followed by one intact frame: the decoder must
/// resync off the corruption and still deliver the second frame's payload.
#[test]
fn corrupted_frame_is_skipped_and_the_next_frame_still_recovers() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("server", || async {
        let listener = TcpListener::bind("0.0.0.0:9000").await?;
        let (mut stream, _) = listener.accept().await?;

        let mut decoder = FrameDecoder::new(FrameSentinels::default());
        let mut frames = Vec::new();
        let mut buf = [0u8; 256];
        while frames.is_empty() {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let mut chunk = bytes::BytesMut::from(&buf[..n]);
            frames.extend(decoder.decode(&mut chunk));
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"recovered after corruption");
        Ok(())
    });

    sim.client("client", async {
        let sentinels = FrameSentinels::default();
        let mut stream = TcpStream::connect("server:9000").await?;

        // Corrupt only the end tag: the decoder resyncs on the first
        // mismatched tag byte regardless of length/payload, so this
        // reliably discards exactly this one frame (mirrors
        // `bad_end_sentinel_resyncs_and_recovers_next_frame` in
        // `netframe_proto::frame`'s own test suite).
        let mut corrupted_frame = encode_frame(&sentinels, Mode::Packet, b"this one gets mangled").to_vec();
        let end_tag_start = corrupted_frame.len() - 4;
        let noised_tag = corrupt_deterministic(42, &corrupted_frame[end_tag_start..], 1.0);
        corrupted_frame[end_tag_start..].copy_from_slice(&noised_tag);

        let good_frame = encode_frame(&sentinels, Mode::Packet, b"recovered after corruption");

        let mut wire = Vec::new();
        wire.extend_from_slice(&corrupted_frame);
        wire.extend_from_slice(&good_frame);
        stream.write_all(&wire).await?;

        Ok(())
    });

    sim.run().expect("simulation failed");
}

/// A corruption rate of zero must never perturb a clean stream of frames —
/// a baseline sanity check for [`corrupt_deterministic`] itself, run over
/// the simulated link rather than in-process.
#[test]
fn zero_corruption_rate_round_trips_multiple_frames_untouched() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("server", || async {
        let listener = TcpListener::bind("0.0.0.0:9001").await?;
        let (mut stream, _) = listener.accept().await?;

        let mut decoder = FrameDecoder::new(FrameSentinels::default());
        let mut frames = Vec::new();
        let mut buf = [0u8; 256];
        while frames.len() < 3 {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let mut chunk = bytes::BytesMut::from(&buf[..n]);
            frames.extend(decoder.decode(&mut chunk));
        }

        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0].payload[..], b"one");
        assert_eq!(&frames[1].payload[..], b"two");
        assert_eq!(&frames[2].payload[..], b"three");
        Ok(())
    });

    sim.client("client", async {
        let sentinels = FrameSentinels::default();
        let mut wire = Vec::new();
        for payload in [b"one".as_slice(), b"two".as_slice(), b"three".as_slice()] {
            let frame = encode_frame(&sentinels, Mode::Packet, payload);
            wire.extend_from_slice(&corrupt_deterministic(7, &frame, 0.0));
        }
        let mut stream = TcpStream::connect("server:9001").await?;
        stream.write_all(&wire).await?;
        Ok(())
    });

    sim.run().expect("simulation failed");
}
