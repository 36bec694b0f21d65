//! Test-only support code shared by this crate's `tests/` suites.
//!
//! The suites themselves cover two different things: `frame_chaos_test`
//! drives the wire codec directly over a turmoil-simulated network (byte
//! reordering, partial reads, link latency) without any session logic
//! involved, while `e2e_scenarios_test` drives the real
//! [`netframe_server`]/[`netframe_client`] stack end to end over loopback
//! TCP, exercising the six scenarios a client/server pair must handle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_client;
pub mod sim_connection;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministically corrupt a byte string by XOR-ing a subset of bytes
/// (selected and XORed by a seeded RNG) with nonzero noise.
///
/// Used by the chaos suite to probe the frame decoder's resync behavior
/// without relying on true randomness, so a failing case is reproducible
/// from its seed alone.
#[must_use]
pub fn corrupt_deterministic(seed: u64, bytes: &[u8], corruption_rate: f64) -> Vec<u8> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    bytes
        .iter()
        .map(|&b| {
            if rng.next_u32() as f64 / f64::from(u32::MAX) < corruption_rate {
                let noise = (rng.next_u32() % 255) as u8 + 1;
                b ^ noise
            } else {
                b
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_corrupts_identically() {
        let a = corrupt_deterministic(7, b"hello world", 0.5);
        let b = corrupt_deterministic(7, b"hello world", 0.5);
        assert_eq!(a, b);
    }

    #[test]
    fn zero_rate_never_corrupts() {
        let out = corrupt_deterministic(1, b"untouched", 0.0);
        assert_eq!(out, b"untouched");
    }
}
