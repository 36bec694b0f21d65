//! Server configuration and application callback wiring.

use std::sync::Arc;

use netframe_core::{session::SessionType, BinaryReceipt, FileReceipt, PoolConfig};
use netframe_proto::{FrameSentinels, MessageBody};

/// `Fn(source_id, source_sub_id)`, fired once a session reaches `confirmed`.
pub type ConnectHandler = Arc<dyn Fn(String, String) + Send + Sync>;
/// `Fn(source_id, source_sub_id)`, fired once a session is removed from the
/// registry.
pub type DisconnectHandler = Arc<dyn Fn(String, String) + Send + Sync>;
/// Fired for every `packet`-mode message addressed to this server's own
/// `source_id` (local delivery, as opposed to a forwarded fan-out).
pub type MessageHandler = Arc<dyn Fn(MessageBody) + Send + Sync>;
/// Fired once a `file`-mode transfer has been written to disk.
pub type FileHandler = Arc<dyn Fn(FileReceipt) + Send + Sync>;
/// Fired once a `binary`-mode blob has been fully reassembled.
pub type BinaryHandler = Arc<dyn Fn(BinaryReceipt) + Send + Sync>;

/// Application notification callbacks. All optional; an unset callback is a
/// no-op.
#[derive(Clone, Default)]
pub struct Callbacks {
    /// Fired on successful handshake.
    pub on_connect: Option<ConnectHandler>,
    /// Fired once a session is torn down.
    pub on_disconnect: Option<DisconnectHandler>,
    /// Fired for locally-addressed `packet` messages.
    pub on_message: Option<MessageHandler>,
    /// Fired once a file transfer completes.
    pub on_file_received: Option<FileHandler>,
    /// Fired once a binary blob completes.
    pub on_binary_received: Option<BinaryHandler>,
}

/// Server-wide configuration: accept policy, negotiated defaults, worker
/// pool sizing, and callback wiring.
///
/// Every field is a setter on the public surface, consulted only before
/// `bind`/`run`: external callers mutate it only through setters that
/// execute before the server starts.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the listener to.
    pub bind_address: String,
    /// This server's own `(id, sub_id)` — `source_id` is compared against
    /// incoming `target_id` to decide local delivery vs. fan-out.
    pub source_id: String,
    /// Pre-shared key every session must present in `request_connection`.
    pub connection_key: String,
    /// Caps the number of simultaneously `waiting`/`confirmed` sessions;
    /// `0` means unlimited.
    pub session_limit_count: usize,
    /// Session types this server accepts; empty means any.
    pub possible_session_types: Vec<SessionType>,
    /// Non-empty: only these peer ids may complete the handshake.
    pub acceptable_target_ids: Vec<String>,
    /// Peer ids that are unconditionally rejected.
    pub ignore_target_ids: Vec<String>,
    /// Snipping targets the server refuses to honor even if requested.
    pub ignore_snipping_targets: Vec<String>,
    /// Whether payloads are end-to-end encrypted once confirmed.
    pub encrypt_mode: bool,
    /// Whether payloads are compressed.
    pub compress_mode: bool,
    /// Chunk size used by compression and the codec's send path.
    pub compress_block_size: u16,
    /// Seconds from accept until a still-`waiting` session expires.
    pub drop_connection_time: u16,
    /// Whether the router synthesizes `message_sending_response` acks for
    /// forwarded (non-local) messages.
    pub use_message_response: bool,
    /// Degenerate routing policy: when set, every message whose source is
    /// not this server is re-emitted to every confirmed session regardless
    /// of `target_id`, bypassing the type filter and each session's own
    /// `allows_send_to` check.
    pub broadcast_mode: bool,
    /// When set, every handshake is rejected (e.g. during graceful drain).
    pub kill_code: bool,
    /// Worker pool sizing.
    pub pool: PoolConfig,
    /// Wire sentinel/chunk configuration.
    pub sentinels: FrameSentinels,
    /// Base directory file transfers are written under; a `target_path`
    /// field is resolved relative to this.
    pub file_storage_dir: std::path::PathBuf,
    /// Application notification callbacks.
    pub callbacks: Callbacks,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            source_id: "server".to_string(),
            connection_key: String::new(),
            session_limit_count: 0,
            possible_session_types: Vec::new(),
            acceptable_target_ids: Vec::new(),
            ignore_target_ids: Vec::new(),
            ignore_snipping_targets: Vec::new(),
            encrypt_mode: false,
            compress_mode: false,
            compress_block_size: 1024,
            drop_connection_time: 5,
            use_message_response: false,
            broadcast_mode: false,
            kill_code: false,
            pool: PoolConfig::default(),
            sentinels: FrameSentinels::default(),
            file_storage_dir: std::path::PathBuf::from("."),
            callbacks: Callbacks::default(),
        }
    }
}

impl ServerConfig {
    /// Register the connect notification.
    #[must_use]
    pub fn on_connect<F: Fn(String, String) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.callbacks.on_connect = Some(Arc::new(f));
        self
    }

    /// Register the disconnect notification.
    #[must_use]
    pub fn on_disconnect<F: Fn(String, String) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.callbacks.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register the local-delivery message callback.
    #[must_use]
    pub fn on_message<F: Fn(MessageBody) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.callbacks.on_message = Some(Arc::new(f));
        self
    }

    /// Register the file-receipt callback.
    #[must_use]
    pub fn on_file_received<F: Fn(FileReceipt) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.callbacks.on_file_received = Some(Arc::new(f));
        self
    }

    /// Register the binary-receipt callback.
    #[must_use]
    pub fn on_binary_received<F: Fn(BinaryReceipt) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.callbacks.on_binary_received = Some(Arc::new(f));
        self
    }
}
