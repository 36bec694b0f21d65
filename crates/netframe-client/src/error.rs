//! Client-level error type.

use thiserror::Error;

/// Errors raised while dialing or driving the client session.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The connect attempt itself failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address that was dialed.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A send was rejected because its payload shape or filters were
    /// invalid (e.g. an empty binary blob, or a target this session does
    /// not accept).
    #[error("send refused: {0}")]
    SendRefused(String),

    /// Loading a file to push over the file channel failed.
    #[error("failed to read {path}: {source}")]
    FileRead {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
