//! Client configuration and application callback wiring.

use std::{sync::Arc, time::Duration};

use netframe_core::{session::SessionType, BinaryReceipt, FileReceipt, PoolConfig};
use netframe_proto::{FrameSentinels, MessageBody};

/// `Fn(connected)`, fired exactly once per dial attempt once the handshake
/// resolves (accepted or rejected).
pub type ConnectResultHandler = Arc<dyn Fn(bool) + Send + Sync>;
/// Fired once the session is removed (peer closed, drop timer, kill code).
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;
/// Fired for every `packet`-mode application message received.
pub type MessageHandler = Arc<dyn Fn(MessageBody) + Send + Sync>;
/// Fired once a `file`-mode transfer addressed to this client has been
/// written to disk.
pub type FileHandler = Arc<dyn Fn(FileReceipt) + Send + Sync>;
/// Fired once a `binary`-mode blob addressed to this client has been fully
/// reassembled.
pub type BinaryHandler = Arc<dyn Fn(BinaryReceipt) + Send + Sync>;

/// Application notification callbacks. All optional; an unset callback is a
/// no-op.
#[derive(Clone, Default)]
pub struct Callbacks {
    /// Fired once the handshake resolves.
    pub on_connect_result: Option<ConnectResultHandler>,
    /// Fired once the session is torn down.
    pub on_disconnect: Option<DisconnectHandler>,
    /// Fired for locally-addressed `packet` messages.
    pub on_message: Option<MessageHandler>,
    /// Fired once a file transfer completes.
    pub on_file_received: Option<FileHandler>,
    /// Fired once a binary blob completes.
    pub on_binary_received: Option<BinaryHandler>,
}

/// Client-wide configuration: dial target, negotiated defaults, and
/// callback wiring.
///
/// Mirrors `ServerConfig`'s shape (§6: "the configuration surface is the
/// API" — builder structs with `Default` and setters, consulted only
/// before `connect()`).
#[derive(Clone)]
pub struct ClientConfig {
    /// Address to dial.
    pub server_address: String,
    /// This client's own id, sent as `source_id` in `request_connection`.
    pub id: String,
    /// The server's id, sent as `target_id` in `request_connection`.
    pub server_id: String,
    /// Pre-shared key presented in `request_connection`.
    pub connection_key: String,
    /// Payload shape this session declares to the server.
    pub session_type: SessionType,
    /// Whether payloads are end-to-end encrypted once confirmed.
    pub encrypt_mode: bool,
    /// Whether payloads are compressed.
    pub compress_mode: bool,
    /// Chunk size used by compression and the codec's send path.
    pub compress_block_size: u16,
    /// Extra destinations this session asks the server to also forward to
    /// it, beyond its own peer id.
    pub snipping_targets: Vec<String>,
    /// When set, this session accepts fan-out regardless of target id
    /// (relay mode).
    pub bridge_line: bool,
    /// Auto-echo interval; `None` disables auto-echo.
    pub auto_echo_interval: Option<Duration>,
    /// Seconds from connect until a still-`waiting` session self-expires
    /// if no `confirm_connection` arrives.
    pub drop_connection_time: u16,
    /// Worker pool sizing for this connection's pipeline stages.
    pub pool: PoolConfig,
    /// Wire sentinel/chunk configuration; must match the server's.
    pub sentinels: FrameSentinels,
    /// Base directory file transfers are written under.
    pub file_storage_dir: std::path::PathBuf,
    /// Application notification callbacks.
    pub callbacks: Callbacks,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:4433".to_string(),
            id: "client".to_string(),
            server_id: "server".to_string(),
            connection_key: String::new(),
            session_type: SessionType::Message,
            encrypt_mode: false,
            compress_mode: false,
            compress_block_size: 1024,
            snipping_targets: Vec::new(),
            bridge_line: false,
            auto_echo_interval: None,
            drop_connection_time: 5,
            pool: PoolConfig::default(),
            sentinels: FrameSentinels::default(),
            file_storage_dir: std::path::PathBuf::from("."),
            callbacks: Callbacks::default(),
        }
    }
}

impl ClientConfig {
    /// Register the connect-result notification.
    #[must_use]
    pub fn on_connect_result<F: Fn(bool) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.callbacks.on_connect_result = Some(Arc::new(f));
        self
    }

    /// Register the disconnect notification.
    #[must_use]
    pub fn on_disconnect<F: Fn() + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.callbacks.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register the application message callback.
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
