//! Dialer, handshake, read/write loop, and public send API for one
//! outbound connection.

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use netframe_core::{
    pipeline::{Channel, Envelope, PipelineAction, PipelineJob, Priority, Transforms},
    session::{SessionConfig, SessionState, SessionType},
    transforms, BinaryReceipt, Environment, FileReceipt, Session, SessionAction, SystemEnv, WorkerPool,
};
use netframe_proto::{
    control, decode_fields, encode_fields, FrameDecoder, MessageBody, MessageHeader, Mode, Value, REQUEST_FILE,
    REQUEST_FILES,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};

use crate::{config::ClientConfig, error::ClientError};

/// Peer routing facts the public send API needs, kept current by the
/// background driver task and read by synchronous callers. Duplicates
/// [`netframe_core::session::Session::allows_send_to`]'s predicate the same
/// way `netframe-server`'s own `RouteEntry` does, since the session itself
/// is only ever touched by its owning task.
struct PeerState {
    peer_id: Option<String>,
    peer_sub_id: Option<String>,
    bridge_line: bool,
    snipping_targets: Vec<String>,
    transforms: Transforms,
}

impl PeerState {
    fn allows_send_to(&self, target_id: &str, target_sub_id: Option<&str>) -> bool {
        if self.bridge_line {
            return true;
        }
        let is_named_target =
            self.peer_id.as_deref() == Some(target_id) || self.snipping_targets.iter().any(|t| t == target_id);
        if !is_named_target {
            return false;
        }
        match target_sub_id {
            Some(sub) if !sub.is_empty() => {
                self.peer_sub_id.as_deref() == Some(sub) || self.snipping_targets.iter().any(|t| t == target_id)
            },
            _ => true,
        }
    }
}

/// A connected session to a `netframe-server`. Construct via [`Client::connect`].
pub struct Client {
    local_id: String,
    sentinels: netframe_proto::FrameSentinels,
    file_storage_dir: std::path::PathBuf,
    state: Arc<Mutex<PeerState>>,
    pool: Arc<WorkerPool>,
    outbound: mpsc::UnboundedSender<Bytes>,
    driver: JoinHandle<()>,
}

impl Client {
    /// Dial `config.server_address`, send `request_connection`, and start
    /// the background read/write/tick loop. Returns as soon as the socket
    /// is connected and the background task is running; the handshake
    /// result itself arrives asynchronously via `config.on_connect_result`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if the TCP connect fails.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let socket = TcpStream::connect(&config.server_address)
            .await
            .map_err(|source| ClientError::Connect { addr: config.server_address.clone(), source })?;

        let local_addr = socket.local_addr().ok();
        let local_sub_id = local_addr.map_or_else(String::new, |a| a.to_string());
        let (mut read_half, write_half) = socket.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();
        tokio::spawn(write_loop(write_half, outbound_rx));

        let pool = Arc::new(WorkerPool::start(config.pool));
        let state = Arc::new(Mutex::new(PeerState {
            peer_id: None,
            peer_sub_id: None,
            bridge_line: config.bridge_line,
            snipping_targets: config.snipping_targets.clone(),
            transforms: Transforms::default(),
        }));

        let env = SystemEnv::new();
        let session_config = SessionConfig {
            drop_connection_time: std::time::Duration::from_secs(u64::from(config.drop_connection_time)),
            encrypt_mode: config.encrypt_mode,
            compress_mode: config.compress_mode,
            compress_block_size: config.compress_block_size,
            connection_key: config.connection_key.clone(),
            session_type: config.session_type,
            bridge_line: config.bridge_line,
            snipping_targets: config.snipping_targets.clone(),
            auto_echo_interval: config.auto_echo_interval,
            ..SessionConfig::default()
        };
        let mut session = Session::new(env.now(), config.id.clone(), local_sub_id, session_config);

        let actions = session
            .client_request_connection(&config.server_id)
            .map_err(|err| ClientError::SendRefused(err.to_string()))?;
        execute(actions, &config, &state, &pool, &outbound_tx, &mut session).await;

        let local_id = config.id.clone();
        let file_storage_dir = config.file_storage_dir.clone();
        let sentinels = config.sentinels;
        let driver_state = Arc::clone(&state);
        let driver_pool = Arc::clone(&pool);
        let driver_outbound = outbound_tx.clone();

        let driver = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new(config.sentinels);
            let mut read_buf = BytesMut::with_capacity(8 * 1024);

            'connection: loop {
                let tick_sleep = tokio::time::sleep(std::time::Duration::from_millis(250));
                tokio::select! {
                    result = read_half.read_buf(&mut read_buf) => {
                        match result {
                            Ok(0) => {
                                execute(session.expire("peer closed connection".to_string()), &config, &driver_state, &driver_pool, &driver_outbound, &mut session).await;
                                break 'connection;
                            }
                            Ok(_) => {
                                let frames = decoder.decode(&mut read_buf);
                                for event in decoder.take_events() {
                                    tracing::debug!(?event, "protocol event");
                                }
                                for frame in frames {
                                    handle_frame(frame.mode, frame.payload, &mut session, &config, &driver_state, &driver_pool, &driver_outbound).await;
                                    if session.state() == SessionState::Expired {
                                        break 'connection;
                                    }
                                }
                            }
                            Err(err) => {
                                tracing::debug!(%err, "read failed");
                                execute(session.expire(format!("read error: {err}")), &config, &driver_state, &driver_pool, &driver_outbound, &mut session).await;
                                break 'connection;
                            }
                        }
                    }
                    () = tick_sleep => {
                        let mut actions = session.tick(env.now());
                        actions.extend(session.maybe_auto_echo(env.now()));
                        execute(actions, &config, &driver_state, &driver_pool, &driver_outbound, &mut session).await;
                        if session.state() == SessionState::Expired {
                            break 'connection;
                        }
                    }
                }
            }
        });

        Ok(Self { local_id, sentinels, file_storage_dir, state, pool, outbound: outbound_tx, driver })
    }

    /// Send an `echo` to the confirmed peer. No-op if the peer hasn't been
    /// learned yet.
    pub async fn echo(&self) -> Result<(), ClientError> {
        let Some((peer_id, peer_sub_id, transforms)) = self.peer_and_transforms() else { return Ok(()) };
        let header = MessageHeader { source_id: self.local_id.clone(), source_sub_id: String::new(), target_id: peer_id, target_sub_id: peer_sub_id };
        emit_message(control::echo(header, false), None, &transforms, &self.pool, &self.sentinels, &self.outbound).await;
        Ok(())
    }

    /// Send a structured application message.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SendRefused`] if this session does not
    /// currently accept `target_id`/`target_sub_id` (see
    /// [`netframe_core::session::Session::allows_send_to`]).
    pub async fn send_message(
        &self,
        target_id: &str,
        target_sub_id: &str,
        message_type: &str,
        fields: Vec<(String, Value)>,
    ) -> Result<(), ClientError> {
        self.check_send(target_id, target_sub_id)?;
        let transforms = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).transforms.clone();
        let header = MessageHeader {
            source_id: self.local_id.clone(),
            source_sub_id: String::new(),
            target_id: target_id.to_string(),
            target_sub_id: target_sub_id.to_string(),
        };
        let mut body = MessageBody::new(message_type, header);
        for (name, value) in fields {
            body.insert(name, value);
        }
        emit_message(body, None, &transforms, &self.pool, &self.sentinels, &self.outbound).await;
        Ok(())
    }

    /// Send an opaque binary blob.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SendRefused`] if `payload` is empty (per
    /// the boundary behavior that an empty binary blob is rejected at the
    /// send call) or the target is not currently accepted.
    pub async fn send_binary(&self, target_id: &str, target_sub_id: &str, payload: Vec<u8>) -> Result<(), ClientError> {
        if payload.is_empty() {
            return Err(ClientError::SendRefused("binary payload must be non-empty".to_string()));
        }
        self.check_send(target_id, target_sub_id)?;
        let transforms = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).transforms.clone();

        let fields = encode_fields(&[self.local_id.as_bytes(), b"", target_id.as_bytes(), target_sub_id.as_bytes(), &payload]);
        let job = PipelineJob::outbound(Channel::Binary, fields.to_vec(), None);
        if let PipelineAction::SendFrame { bytes, .. } = netframe_core::drive(job, transforms, &self.pool).await {
            let _ = self.outbound.send(netframe_proto::encode_frame(&self.sentinels, Mode::Binary, &bytes));
        }
        Ok(())
    }

    /// Read `source_path` from disk and push it over the file channel to
    /// `target_id`/`target_sub_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::FileRead`] if `source_path` cannot be read, or
    /// [`ClientError::SendRefused`] if the target is not currently
    /// accepted.
    pub async fn send_file(
        &self,
        indication_id: &str,
        target_id: &str,
        target_sub_id: &str,
        source_path: &std::path::Path,
        target_path: &str,
    ) -> Result<(), ClientError> {
        self.check_send(target_id, target_sub_id)?;
        let file_bytes = tokio::fs::read(source_path)
            .await
            .map_err(|source| ClientError::FileRead { path: source_path.display().to_string(), source })?;

        let transforms = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).transforms.clone();
        let fields = encode_fields(&[
            indication_id.as_bytes(),
            self.local_id.as_bytes(),
            b"",
            target_id.as_bytes(),
            target_sub_id.as_bytes(),
            source_path.display().to_string().as_bytes(),
            target_path.as_bytes(),
            &file_bytes,
        ]);
        let job = PipelineJob::outbound(Channel::File, fields.to_vec(), None);
        if let PipelineAction::SendFrame { bytes, .. } = netframe_core::drive(job, transforms, &self.pool).await {
            let _ = self.outbound.send(netframe_proto::encode_frame(&self.sentinels, Mode::File, &bytes));
        }
        Ok(())
    }

    /// Ask the peer for a single named file; it answers over the file
    /// channel, handled by [`Client::connect`]'s background loop and
    /// surfaced via `on_file_received`.
    pub async fn request_file(&self, file_name: &str) -> Result<(), ClientError> {
        let Some((peer_id, peer_sub_id, transforms)) = self.peer_and_transforms() else { return Ok(()) };
        let header = MessageHeader { source_id: self.local_id.clone(), source_sub_id: String::new(), target_id: peer_id, target_sub_id: peer_sub_id };
        emit_message(control::request_file(header, file_name), None, &transforms, &self.pool, &self.sentinels, &self.outbound).await;
        Ok(())
    }

    /// Ask the peer for a set of named files.
    pub async fn request_files(&self, file_names: Vec<String>) -> Result<(), ClientError> {
        let Some((peer_id, peer_sub_id, transforms)) = self.peer_and_transforms() else { return Ok(()) };
        let header = MessageHeader { source_id: self.local_id.clone(), source_sub_id: String::new(), target_id: peer_id, target_sub_id: peer_sub_id };
        emit_message(control::request_files(header, file_names), None, &transforms, &self.pool, &self.sentinels, &self.outbound).await;
        Ok(())
    }

    /// Close the connection: stop the background driver task, which in
    /// turn drops the outbound channel and stops the write loop.
    pub fn stop(self) {
        self.driver.abort();
    }

    /// Directory file-channel receipts, and `request_file`/`request_files`
    /// responses this client serves, are read from and written under.
    #[must_use]
    pub fn file_storage_dir(&self) -> &std::path::Path {
        &self.file_storage_dir
    }

    fn check_send(&self, target_id: &str, target_sub_id: &str) -> Result<(), ClientError> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let sub = (!target_sub_id.is_empty()).then_some(target_sub_id);
        if state.allows_send_to(target_id, sub) {
            Ok(())
        } else {
            Err(ClientError::SendRefused(format!("session does not accept target {target_id}")))
        }
    }

    fn peer_and_transforms(&self) -> Option<(String, String, Transforms)> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let peer_id = state.peer_id.clone()?;
        let peer_sub_id = state.peer_sub_id.clone().unwrap_or_default();
        Some((peer_id, peer_sub_id, state.transforms.clone()))
    }
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(bytes) = rx.recv().await {
        if let Err(err) = write_half.write_all(&bytes).await {
            tracing::debug!(%err, "write failed, closing connection");
            break;
        }
    }
}

/// Run `body` through the outbound `Message` pipeline and push the framed
/// bytes onto this connection's own outbound channel.
///
/// `priority_override` forces every stage of the job to run at a single
/// priority; session-management replies (handshake confirmation, echo ack)
/// pass the urgency [`Session`] already classified them with, so they never
/// queue behind a bulk transfer's Normal-priority compress/encrypt stages.
/// Ordinary application sends pass `None` and take each stage's own default.
async fn emit_message(
    body: MessageBody,
    priority_override: Option<Priority>,
    transforms: &Transforms,
    pool: &WorkerPool,
    sentinels: &netframe_proto::FrameSentinels,
    outbound: &mpsc::UnboundedSender<Bytes>,
) {
    let Ok(bytes) = body.serialize_array() else { return };
    let mut job = PipelineJob::outbound(Channel::Message, bytes, None);
    if let Some(priority) = priority_override {
        job = job.with_priority(priority);
    }
    if let PipelineAction::SendFrame { bytes, .. } = netframe_core::drive(job, transforms.clone(), pool).await {
        let _ = outbound.send(netframe_proto::encode_frame(sentinels, Mode::Packet, &bytes));
    }
}

async fn execute(
    actions: Vec<SessionAction>,
    config: &ClientConfig,
    state: &Arc<Mutex<PeerState>>,
    pool: &WorkerPool,
    outbound: &mpsc::UnboundedSender<Bytes>,
    session: &mut Session<tokio::time::Instant>,
) {
    for action in actions {
        match action {
            SessionAction::Emit { body, priority } => {
                let transforms = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).transforms.clone();
                emit_message(body, Some(priority), &transforms, pool, &config.sentinels, outbound).await;
            },
            SessionAction::Expire { reason } => {
                tracing::debug!(%reason, "session expired");
            },
            SessionAction::NotifyConnectResult { connected: true } => {
                if let Ok(mut guard) = state.lock() {
                    guard.transforms = transforms::build(
                        session.compress_mode(),
                        session.encrypt_mode(),
                        session.key_material().map(|(k, _)| k),
                        session.key_material().map(|(_, i)| i),
                    );
                    if let Some((peer_id, peer_sub_id)) = session.peer() {
                        guard.peer_id = Some(peer_id.to_string());
                        guard.peer_sub_id = Some(peer_sub_id.to_string());
                    }
                    guard.snipping_targets = session.accepted_snipping_targets().to_vec();
                }
                if let Some(on_connect_result) = &config.callbacks.on_connect_result {
                    on_connect_result(true);
                }
            },
            SessionAction::NotifyConnectResult { connected: false } => {
                if let Some(on_connect_result) = &config.callbacks.on_connect_result {
                    on_connect_result(false);
                }
            },
            SessionAction::NotifyDisconnected => {
                if let Some(on_disconnect) = &config.callbacks.on_disconnect {
                    on_disconnect();
                }
            },
        }
    }
}

fn bytes_field(fields: &[bytes::Bytes], index: usize) -> String {
    fields.get(index).map(|b| String::from_utf8_lossy(b).into_owned()).unwrap_or_default()
}

async fn handle_frame(
    mode: Mode,
    payload: Bytes,
    session: &mut Session<tokio::time::Instant>,
    config: &ClientConfig,
    state: &Arc<Mutex<PeerState>>,
    pool: &WorkerPool,
    outbound: &mpsc::UnboundedSender<Bytes>,
) {
    let transforms = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).transforms.clone();
    match mode {
        Mode::Packet => {
            let job = PipelineJob::inbound(Channel::Message, payload.to_vec());
            let PipelineAction::Dispatch { bytes } = netframe_core::drive(job, transforms, pool).await else { return };
            let Ok(body) = MessageBody::from_bytes(&bytes, false) else {
                tracing::debug!("malformed packet payload, dropped");
                return;
            };
            handle_message(body, session, config, state, pool, outbound).await;
        },
        Mode::File => {
            let job = PipelineJob::inbound(Channel::File, payload.to_vec());
            let action = netframe_core::drive(job, transforms, pool).await;
            let PipelineAction::WriteFile { bytes, .. } = action else { return };
            handle_file(bytes, config).await;
        },
        Mode::Binary => {
            if session.check_payload_shape(true).is_err() {
                tracing::debug!("binary payload rejected by session shape filter");
                return;
            }
            let job = PipelineJob::inbound(Channel::Binary, payload.to_vec());
            let action = netframe_core::drive(job, transforms, pool).await;
            let PipelineAction::Notify { bytes, .. } = action else { return };
            handle_binary(bytes, config);
        },
    }
}

async fn handle_message(
    body: MessageBody,
    session: &mut Session<tokio::time::Instant>,
    config: &ClientConfig,
    state: &Arc<Mutex<PeerState>>,
    pool: &WorkerPool,
    outbound: &mpsc::UnboundedSender<Bytes>,
) {
    match body.message_type.as_str() {
        control::CONFIRM_CONNECTION => {
            if let Ok(actions) = session.client_handle_confirm_connection(&body) {
                execute(actions, config, state, pool, outbound, session).await;
            }
        },
        control::ECHO => {
            if session.state() != SessionState::Confirmed {
                tracing::debug!("echo before confirm, dropped");
                return;
            }
            let actions = session.handle_echo(&body);
            execute(actions, config, state, pool, outbound, session).await;
            tracing::info!("received echo");
        },
        REQUEST_FILE => {
            if session.state() != SessionState::Confirmed {
                tracing::debug!("request_file before confirm, dropped");
                return;
            }
            if let Some(Value::Str(file_name)) = body.get_value("file_name").cloned() {
                send_file_response(&file_name, &body, config, state, pool, outbound).await;
            }
        },
        REQUEST_FILES => {
            if session.state() != SessionState::Confirmed {
                tracing::debug!("request_files before confirm, dropped");
                return;
            }
            if let Some(Value::StrArray(names)) = body.get_value("file_names").cloned() {
                for name in names {
                    send_file_response(&name, &body, config, state, pool, outbound).await;
                }
            }
        },
        control::MESSAGE_SENDING_RESPONSE => {
            if session.state() != SessionState::Confirmed {
                tracing::debug!("message sending response before confirm, dropped");
                return;
            }
            tracing::debug!("message sending response received");
        },
        _ => {
            if session.state() != SessionState::Confirmed || session.check_payload_shape(false).is_err() {
                return;
            }
            if let Some(on_message) = &config.callbacks.on_message {
                on_message(body);
            }
        },
    }
}

async fn send_file_response(
    file_name: &str,
    request: &MessageBody,
    config: &ClientConfig,
    state: &Arc<Mutex<PeerState>>,
    pool: &WorkerPool,
    outbound: &mpsc::UnboundedSender<Bytes>,
) {
    let path = config.file_storage_dir.join(file_name);
    let (target_path, file_bytes) = match tokio::fs::read(&path).await {
        Ok(bytes) => (file_name.to_string(), bytes),
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "file load failed, replying with empty target_path");
            (String::new(), Vec::new())
        },
    };
    let fields_bytes = encode_fields(&[
        b"",
        config.id.as_bytes(),
        b"",
        request.source_id().as_bytes(),
        request.header.source_sub_id.as_bytes(),
        file_name.as_bytes(),
        target_path.as_bytes(),
        &file_bytes,
    ]);
    let transforms = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).transforms.clone();
    let job = PipelineJob::outbound(Channel::File, fields_bytes.to_vec(), None);
    if let PipelineAction::SendFrame { bytes, .. } = netframe_core::drive(job, transforms, pool).await {
        let _ = outbound.send(netframe_proto::encode_frame(&config.sentinels, Mode::File, &bytes));
    }
}

async fn handle_file(bytes: Vec<u8>, config: &ClientConfig) {
    let Ok(fields) = decode_fields(Bytes::from(bytes)) else {
        tracing::debug!("malformed file payload, dropped");
        return;
    };
    if fields.len() != 8 {
        tracing::debug!(count = fields.len(), "file payload has the wrong field count");
        return;
    }
    let envelope = Envelope {
        indication_id: bytes_field(&fields, 0),
        source_id: bytes_field(&fields, 1),
        source_sub_id: bytes_field(&fields, 2),
        target_id: bytes_field(&fields, 3),
        target_sub_id: bytes_field(&fields, 4),
        source_path: bytes_field(&fields, 5),
        target_path: bytes_field(&fields, 6),
    };
    let file_bytes = fields[7].to_vec();

    if envelope.target_id != config.id {
        tracing::debug!(target = %envelope.target_id, "file payload not addressed to this client, dropped");
        return;
    }
    let dest = config.file_storage_dir.join(&envelope.target_path);
    match tokio::fs::write(&dest, &file_bytes).await {
        Ok(()) => {
            if let Some(on_file_received) = &config.callbacks.on_file_received {
                on_file_received(FileReceipt::from_envelope(&envelope, file_bytes.len()));
            }
        },
        Err(err) => tracing::warn!(%err, path = %dest.display(), "failed to persist received file"),
    }
}

fn handle_binary(bytes: Vec<u8>, config: &ClientConfig) {
    let Ok(fields) = decode_fields(Bytes::from(bytes)) else {
        tracing::debug!("malformed binary payload, dropped");
        return;
    };
    if fields.len() != 5 {
        tracing::debug!(count = fields.len(), "binary payload has the wrong field count");
        return;
    }
    let source_id = bytes_field(&fields, 0);
    let source_sub_id = bytes_field(&fields, 1);
    let target_id = bytes_field(&fields, 2);
    let payload = fields[4].to_vec();

    if target_id != config.id {
        tracing::debug!(target = %target_id, "binary payload not addressed to this client, dropped");
        return;
    }
    if let Some(on_binary_received) = &config.callbacks.on_binary_received {
        let envelope = Envelope {
            indication_id: String::new(),
            source_id,
            source_sub_id,
            target_id,
            target_sub_id: String::new(),
            source_path: String::new(),
            target_path: String::new(),
        };
        on_binary_received(BinaryReceipt::from_envelope(&envelope, payload));
    }
}
