//! netframe client: dialer, handshake, and read/write driver for one
//! outbound connection.
//!
//! Production "glue" wrapping [`netframe_core`]'s Sans-IO session state
//! machine and pipeline with real Tokio I/O. [`Client::connect`] dials,
//! sends `request_connection`, and starts the background read/write/tick
//! loop; the public `send_*`/`echo`/`request_file*` methods push onto that
//! connection's own outbound channel.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;

pub use client::Client;
pub use config::{Callbacks, ClientConfig};
pub use error::ClientError;
