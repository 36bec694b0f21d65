//! Environment abstraction for deterministic testing.
//!
//! Decouples session and pipeline logic from system resources (time,
//! randomness) so the same code drives both production sockets and a
//! turmoil-based simulation.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async primitives.
///
/// Implementations MUST guarantee:
/// - `now()` never goes backwards.
/// - `random_bytes()` uses cryptographically secure entropy in production.
/// - Methods are infallible except in exceptional circumstances (OS entropy
///   exhaustion, misconfigured simulation).
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; simulation
    /// environments use virtual time (e.g. `turmoil::Instant`).
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the given duration. The only async method on this trait;
    /// driver code calls it, protocol logic never does.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random key/iv pair for a newly confirmed encrypted
    /// session: 32-byte key, 24-byte nonce (XChaCha20-Poly1305 widths).
    fn create_key(&self) -> (Vec<u8>, Vec<u8>) {
        let mut key = vec![0u8; 32];
        let mut iv = vec![0u8; 24];
        self.random_bytes(&mut key);
        self.random_bytes(&mut iv);
        (key, iv)
    }
}

/// Production [`Environment`]: real wall-clock time via `tokio::time` and
/// cryptographically secure randomness via `rand::rngs::OsRng`.
///
/// Shared by `netframe-server` and `netframe-client` — the trait and its one
/// production implementation both live here since neither crate depends on
/// the other and both need the same concrete environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Construct a new production environment. Stateless; every instance is
    /// interchangeable.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let env = SystemEnv::new();
        let a = env.now();
        let b = env.now();
        assert!(b >= a);
    }

    #[test]
    fn random_bytes_are_not_all_zero() {
        let env = SystemEnv::new();
        let mut buf = [0u8; 32];
        env.random_bytes(&mut buf);
        assert!(buf.iter().any(|&b| b != 0));
    }
}
