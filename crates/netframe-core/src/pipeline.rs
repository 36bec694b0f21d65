//! Per-channel transform pipeline.
//!
//! Each channel (message/file/binary) has a fixed ordered list of stages
//! for each direction. A stage never calls the next stage directly — it
//! returns [`PipelineAction::Enqueue`], which the driver re-submits to the
//! worker pool at the stage's priority, the same action-returning,
//! no-direct-call shape as the session state machine's
//! [`crate::session::SessionAction`], applied to a multi-stage job instead
//! of a single request/response.
//!
//! Compress/decompress and encrypt/decrypt stages run as identity when the
//! corresponding mode is disabled (or, for decrypt, while the session is
//! not yet confirmed) — callers configure this via [`Transforms`], which
//! also carries the optional custom stage override hooks
//! (`specific_compress_sequence`/`specific_encrypt_sequence`).

use std::sync::Arc;

use netframe_proto::Mode;

/// Worker-pool scheduling priority. Ordered `Top > High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Lowest priority: file I/O.
    Low,
    /// Default priority: (de)compression, auto-echo sends.
    Normal,
    /// Above normal: (en/de)cryption.
    High,
    /// Highest priority: send-terminal stages, echo replies, handshake
    /// replies — never blocked behind CPU-heavy transforms.
    Top,
}

/// Logical channel a pipeline job belongs to. Maps 1:1 to
/// [`netframe_proto::Mode`]; kept distinct so pipeline code never has to
/// import the wire layer's naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Structured message (`packet` mode).
    Message,
    /// File transfer (`file` mode).
    File,
    /// Opaque blob (`binary` mode).
    Binary,
}

impl Channel {
    /// Corresponding wire [`Mode`].
    #[must_use]
    pub fn mode(self) -> Mode {
        match self {
            Self::Message => Mode::Packet,
            Self::File => Mode::File,
            Self::Binary => Mode::Binary,
        }
    }
}

/// Transfer direction through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Application data moving toward the wire.
    Outbound,
    /// Wire bytes moving toward the application.
    Inbound,
}

/// One step in a channel's fixed stage plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Encode a [`netframe_proto::MessageBody`] to bytes.
    Serialize,
    /// Decode bytes to a [`netframe_proto::MessageBody`].
    Deserialize,
    /// Prefix file/binary fields and the payload body (see
    /// [`netframe_proto::fields`]).
    PrefixHeader,
    /// Split a received file/binary payload back into its fields.
    SplitHeader,
    /// Run `Transforms::compress`, identity if `compress_mode` is off.
    Compress,
    /// Run `Transforms::decompress`, identity if `compress_mode` is off.
    Decompress,
    /// Run `Transforms::encrypt`, identity if `encrypt_mode` is off.
    Encrypt,
    /// Run `Transforms::decrypt`, identity if not yet confirmed or
    /// `encrypt_mode` is off.
    Decrypt,
    /// Hand bytes to the codec's send path (terminal, outbound only).
    FrameSend,
    /// Hand a decoded message to the application message callback
    /// (terminal, inbound `Message` only).
    Dispatch,
    /// Write file bytes to disk (terminal, inbound `File` only).
    WriteFile,
    /// Invoke the file-receipt or binary-receipt notification (terminal).
    Notify,
}

impl StageKind {
    /// Scheduling priority for this stage: send-terminal stages run at
    /// `top`, encrypt/decrypt at `high`, (de)compression at `normal`, file
    /// I/O at `low`.
    #[must_use]
    pub fn priority(self) -> Priority {
        match self {
            Self::FrameSend | Self::Dispatch | Self::Notify => Priority::Top,
            Self::Encrypt | Self::Decrypt => Priority::High,
            Self::Serialize | Self::Deserialize | Self::Compress | Self::Decompress | Self::PrefixHeader | Self::SplitHeader => {
                Priority::Normal
            },
            Self::WriteFile => Priority::Low,
        }
    }
}

/// Default outbound stage plan for a channel.
#[must_use]
pub fn outbound_stages(channel: Channel) -> Vec<StageKind> {
    match channel {
        Channel::Message => vec![StageKind::Serialize, StageKind::Encrypt, StageKind::Compress, StageKind::FrameSend],
        Channel::File => vec![StageKind::PrefixHeader, StageKind::Encrypt, StageKind::Compress, StageKind::FrameSend],
        Channel::Binary => vec![StageKind::PrefixHeader, StageKind::Encrypt, StageKind::Compress, StageKind::FrameSend],
    }
}

/// Default inbound stage plan for a channel.
#[must_use]
pub fn inbound_stages(channel: Channel) -> Vec<StageKind> {
    match channel {
        Channel::Message => vec![StageKind::Decompress, StageKind::Decrypt, StageKind::Deserialize, StageKind::Dispatch],
        Channel::File => vec![StageKind::Decompress, StageKind::Decrypt, StageKind::SplitHeader, StageKind::WriteFile, StageKind::Notify],
        Channel::Binary => vec![StageKind::Decompress, StageKind::Decrypt, StageKind::SplitHeader, StageKind::Notify],
    }
}

/// A `(bytes, direction) -> bytes` override, replacing a default stage's
/// transform while leaving the stage's position in the plan unchanged.
pub type StageFn = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Concrete transforms a pipeline job runs at each `Compress`/`Decompress`/
/// `Encrypt`/`Decrypt` stage. `None` means identity — either because the
/// mode is disabled, or (for decrypt) because the session is not yet
/// confirmed.
#[derive(Clone, Default)]
pub struct Transforms {
    /// Compression function, or identity.
    pub compress: Option<StageFn>,
    /// Decompression function, or identity.
    pub decompress: Option<StageFn>,
    /// Encryption function, or identity.
    pub encrypt: Option<StageFn>,
    /// Decryption function, or identity.
    pub decrypt: Option<StageFn>,
}

fn apply(transform: &Option<StageFn>, bytes: Vec<u8>) -> Vec<u8> {
    match transform {
        Some(f) => f(&bytes),
        None => bytes,
    }
}

/// Destination fields carried alongside file/binary payloads, reused by
/// both the `PrefixHeader` and terminal `WriteFile`/`Notify` stages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Caller-supplied correlation id, echoed in receipt notifications.
    pub indication_id: String,
    /// Sender identity.
    pub source_id: String,
    /// Sender's bound endpoint.
    pub source_sub_id: String,
    /// Recipient identity.
    pub target_id: String,
    /// Recipient's bound endpoint.
    pub target_sub_id: String,
    /// Source-side file path (file channel only).
    pub source_path: String,
    /// Destination-side file path (file channel only).
    pub target_path: String,
}

/// An in-flight unit of pipeline work. Cheap to move between the driver
/// and the worker pool: it owns its bytes and a cursor into its fixed
/// stage plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineJob {
    /// Logical channel.
    pub channel: Channel,
    /// Direction through the pipeline.
    pub direction: Direction,
    /// Fixed stage plan, computed once at job creation.
    pub stages: Arc<[StageKind]>,
    /// Index of the next stage to run.
    pub cursor: usize,
    /// Current payload bytes.
    pub bytes: Vec<u8>,
    /// File/binary routing envelope, set for those channels.
    pub envelope: Option<Envelope>,
    /// When set, every stage of this job runs at this priority instead of
    /// its own [`StageKind::priority`]. Used for session-management traffic
    /// (handshake confirmations, echo replies) that must never queue behind
    /// a bulk transfer's Normal-priority compress/encrypt stages.
    pub priority_override: Option<Priority>,
}

impl PipelineJob {
    /// Start a new outbound job for `channel` carrying `bytes`.
    #[must_use]
    pub fn outbound(channel: Channel, bytes: Vec<u8>, envelope: Option<Envelope>) -> Self {
        Self { channel, direction: Direction::Outbound, stages: outbound_stages(channel).into(), cursor: 0, bytes, envelope, priority_override: None }
    }

    /// Start a new inbound job for `channel` carrying raw frame payload
    /// `bytes`.
    #[must_use]
    pub fn inbound(channel: Channel, bytes: Vec<u8>) -> Self {
        Self { channel, direction: Direction::Inbound, stages: inbound_stages(channel).into(), cursor: 0, bytes, envelope: None, priority_override: None }
    }

    /// Force every stage of this job to run at `priority`, overriding each
    /// stage's own default.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority_override = Some(priority);
        self
    }

    fn current_stage(&self) -> Option<StageKind> {
        self.stages.get(self.cursor).copied()
    }
}

/// What the driver must do after a stage ran.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineAction {
    /// Re-submit the (mutated) job to the worker pool at the next stage's
    /// priority.
    Enqueue {
        /// Priority for the next stage.
        priority: Priority,
        /// The job, advanced past the stage that just ran.
        job: PipelineJob,
    },
    /// Terminal: hand bytes to the codec's send path for `channel`.
    SendFrame {
        /// Channel the bytes belong to.
        channel: Channel,
        /// Framed payload bytes.
        bytes: Vec<u8>,
    },
    /// Terminal: a structured message is ready for the application
    /// message callback.
    Dispatch {
        /// Decoded message body, as raw bytes (the caller deserializes
        /// with [`netframe_proto::MessageBody::from_bytes`]).
        bytes: Vec<u8>,
    },
    /// Terminal: write received file bytes to disk.
    WriteFile {
        /// Routing/correlation envelope.
        envelope: Envelope,
        /// File contents.
        bytes: Vec<u8>,
    },
    /// Terminal: fire the file-receipt or binary-receipt notification.
    Notify {
        /// Routing/correlation envelope.
        envelope: Envelope,
        /// Payload bytes (empty for a pure file-receipt notification,
        /// since the bytes were already consumed by `WriteFile`).
        bytes: Vec<u8>,
    },
    /// Terminal no-op: empty input at a stage is swallowed, never
    /// surfaced to the peer or the application.
    Drop,
}

/// Run the job's current stage and return what the driver should do next.
///
/// Empty `job.bytes` at any stage is a no-op terminator
/// ([`PipelineAction::Drop`]): a resource error at this layer is swallowed,
/// never surfaced to the peer.
#[must_use]
pub fn step(mut job: PipelineJob, transforms: &Transforms) -> PipelineAction {
    let Some(stage) = job.current_stage() else {
        return PipelineAction::Drop;
    };

    if job.bytes.is_empty() && !matches!(stage, StageKind::Serialize | StageKind::PrefixHeader) {
        return PipelineAction::Drop;
    }

    match stage {
        StageKind::Serialize | StageKind::PrefixHeader | StageKind::Deserialize | StageKind::SplitHeader => {
            // Shaping stages are payload-format-specific and are applied by
            // the caller before/after invoking `step` (they need access to
            // `MessageBody`/`Envelope` construction that lives in
            // `netframe-proto`); here they are transparent cursor advances.
            job.cursor += 1;
            advance(job, transforms)
        },
        StageKind::Compress => {
            job.bytes = apply(&transforms.compress, job.bytes);
            job.cursor += 1;
            advance(job, transforms)
        },
        StageKind::Decompress => {
            job.bytes = apply(&transforms.decompress, job.bytes);
            job.cursor += 1;
            advance(job, transforms)
        },
        StageKind::Encrypt => {
            job.bytes = apply(&transforms.encrypt, job.bytes);
            job.cursor += 1;
            advance(job, transforms)
        },
        StageKind::Decrypt => {
            job.bytes = apply(&transforms.decrypt, job.bytes);
            job.cursor += 1;
            advance(job, transforms)
        },
        StageKind::FrameSend => PipelineAction::SendFrame { channel: job.channel, bytes: job.bytes },
        StageKind::Dispatch => PipelineAction::Dispatch { bytes: job.bytes },
        StageKind::WriteFile => {
            let envelope = job.envelope.clone().unwrap_or_default();
            PipelineAction::WriteFile { envelope, bytes: job.bytes }
        },
        StageKind::Notify => {
            let envelope = job.envelope.clone().unwrap_or_default();
            PipelineAction::Notify { envelope, bytes: job.bytes }
        },
    }
}

fn advance(job: PipelineJob, _transforms: &Transforms) -> PipelineAction {
    match job.current_stage() {
        Some(next) => {
            let priority = job.priority_override.unwrap_or_else(|| next.priority());
            PipelineAction::Enqueue { priority, job }
        },
        None => PipelineAction::Drop,
    }
}

/// Drive a job through every stage of its plan, handing each stage off to
/// `pool` at its priority and awaiting completion before enqueuing the
/// next one.
///
/// `step` never calls itself directly across stage boundaries; `drive` is
/// the driver loop that re-submits the advanced job to the pool each time,
/// so a long-running stage can never run back-to-back with another on the
/// same call stack and starve the reactor that's awaiting this future.
pub async fn drive(mut job: PipelineJob, transforms: Transforms, pool: &crate::workers::WorkerPool) -> PipelineAction {
    loop {
        let priority = job.priority_override.unwrap_or_else(|| job.current_stage().map_or(Priority::Top, StageKind::priority));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let transforms = transforms.clone();
        pool.push(
            priority,
            Box::new(move || {
                let action = step(job, &transforms);
                let _ = tx.send(action);
            }),
        );
        match rx.await {
            Ok(PipelineAction::Enqueue { job: next, .. }) => job = next,
            Ok(terminal) => return terminal,
            // Pool shut down before the job ran: a resource error,
            // swallowed rather than surfaced to the peer.
            Err(_) => return PipelineAction::Drop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_completion(mut job: PipelineJob, transforms: &Transforms) -> PipelineAction {
        loop {
            match step(job, transforms) {
                PipelineAction::Enqueue { job: next, .. } => job = next,
                terminal => return terminal,
            }
        }
    }

    #[test]
    fn message_outbound_with_identity_transforms_reaches_frame_send() {
        let job = PipelineJob::outbound(Channel::Message, b"hello".to_vec(), None);
        let action = run_to_completion(job, &Transforms::default());
        match action {
            PipelineAction::SendFrame { channel, bytes } => {
                assert_eq!(channel, Channel::Message);
                assert_eq!(bytes, b"hello");
            },
            other => panic!("unexpected terminal action: {other:?}"),
        }
    }

    #[test]
    fn message_outbound_runs_custom_compress_override() {
        let transforms = Transforms {
            compress: Some(Arc::new(|b: &[u8]| {
                let mut v = b.to_vec();
                v.push(0xFF);
                v
            })),
            ..Transforms::default()
        };
        let job = PipelineJob::outbound(Channel::Message, b"hi".to_vec(), None);
        let action = run_to_completion(job, &transforms);
        match action {
            PipelineAction::SendFrame { bytes, .. } => assert_eq!(bytes, vec![b'h', b'i', 0xFF]),
            other => panic!("unexpected terminal action: {other:?}"),
        }
    }

    #[test]
    fn file_inbound_reaches_write_file_then_would_notify() {
        let job = PipelineJob::inbound(Channel::File, b"filebytes".to_vec());
        let action = run_to_completion(job, &Transforms::default());
        assert!(matches!(action, PipelineAction::WriteFile { .. }));
    }

    #[test]
    fn priority_override_wins_over_every_stage_default() {
        let job = PipelineJob::outbound(Channel::Message, b"hi".to_vec(), None).with_priority(Priority::Top);
        let mut job = Some(job);
        while let Some(current) = job.take() {
            match step(current, &Transforms::default()) {
                PipelineAction::Enqueue { priority, job: next } => {
                    assert_eq!(priority, Priority::Top);
                    job = Some(next);
                },
                _ => break,
            }
        }
    }

    #[test]
    fn empty_bytes_at_a_later_stage_drops_silently() {
        let mut job = PipelineJob::outbound(Channel::Binary, Vec::new(), None);
        job.cursor = 1; // skip PrefixHeader, land on Encrypt with empty bytes
        let action = step(job, &Transforms::default());
        assert_eq!(action, PipelineAction::Drop);
    }
}
