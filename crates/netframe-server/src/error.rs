//! Server-level error type.

use thiserror::Error;

/// Errors raised while binding or running the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that failed to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Accepting a new connection failed in a way that is not a transient
    /// per-connection error (the acceptor itself is broken).
    #[error("listener accept failed: {0}")]
    Accept(#[source] std::io::Error),
}
