//! Session state machine, transform pipeline, and priority worker pool for
//! the netframe protocol.
//!
//! This crate has no socket dependency: it is driven by an
//! [`env::Environment`] and returns actions for a driver (in
//! `netframe-server`/`netframe-client`) to execute against real or
//! simulated I/O.

#![forbid(unsafe_code)]

/// Time, randomness, and async-sleep abstraction shared by production and
/// simulated drivers.
pub mod env;
/// Session and pipeline error types.
pub mod error;
/// Per-channel transform stages and the priority-scheduled pipeline job
/// shape.
pub mod pipeline;
/// File/binary receipt types delivered to application callbacks.
pub mod receipts;
/// Per-connection session state machine.
pub mod session;
/// Concrete compression/encryption `Transforms` builders.
pub mod transforms;
/// Priority-scheduled worker pool.
pub mod workers;

pub use env::{Environment, SystemEnv};
pub use error::SessionError;
pub use pipeline::{drive, Channel, Direction, Envelope, PipelineAction, PipelineJob, Priority, StageKind, Transforms};
pub use receipts::{BinaryReceipt, FileReceipt};
pub use session::{Session, SessionAction, SessionConfig, SessionState, SessionType};
pub use workers::{Job, PoolConfig, WorkerPool};
