//! Turmoil-backed counterpart of `netframe_client::Client`.
//!
//! Reuses the real session state machine and pipeline unchanged, the same
//! way [`crate::sim_connection`] does for the server side; only the dial
//! and the read/write halves are swapped to `turmoil::net::TcpStream`.

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use netframe_client::{config::ClientConfig, error::ClientError};
use netframe_core::{
    pipeline::{Channel, PipelineAction, PipelineJob, Priority, Transforms},
    session::{SessionConfig, SessionState},
    transforms, Environment, Session, SessionAction, SystemEnv, WorkerPool,
};
use netframe_proto::{control, FrameDecoder, MessageBody, MessageHeader, Mode, Value};
use tokio::{
    io::{split, AsyncReadExt, AsyncWriteExt, WriteHalf},
    sync::mpsc,
    task::JoinHandle,
};
use turmoil::net::TcpStream;

/// Peer routing facts kept current by the background driver, mirroring
/// `netframe_client::client::PeerState`.
struct PeerState {
    peer_id: Option<String>,
    peer_sub_id: Option<String>,
    transforms: Transforms,
}

/// A connected session to a simulated `netframe-server`, driven over
/// turmoil's network. Construct via [`SimClient::connect`].
pub struct SimClient {
    local_id: String,
    state: Arc<Mutex<PeerState>>,
    pool: Arc<WorkerPool>,
    outbound: mpsc::UnboundedSender<Bytes>,
    driver: JoinHandle<()>,
}

impl SimClient {
    /// Dial `config.server_address` over the simulated network, send
    /// `request_connection`, and start the background read/write/tick
    /// loop. The handshake result arrives asynchronously via
    /// `config.on_connect_result`, exactly as with the real client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if the simulated TCP connect fails.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let socket = TcpStream::connect(config.server_address.clone())
            .await
            .map_err(|source| ClientError::Connect { addr: config.server_address.clone(), source })?;

        let local_sub_id = socket.local_addr().ok().map_or_else(String::new, |a| a.to_string());
        let (mut read_half, write_half) = split(socket);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();
        tokio::spawn(write_loop(write_half, outbound_rx));

        let pool = Arc::new(WorkerPool::start(config.pool));
        let state = Arc::new(Mutex::new(PeerState { peer_id: None, peer_sub_id: None, transforms: Transforms::default() }));

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
        let driver_state = Arc::clone(&state);
        let driver_pool = Arc::clone(&pool);
        let driver_outbound = outbound_tx.clone();

        let driver = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new(config.sentinels);
            let mut read_buf = BytesMut::with_capacity(8 * 1024);

            'connection: loop {
                let tick_sleep = tokio::time::sleep(std::time::Duration::from_millis(50));
                tokio::select! {
                    result = read_half.read_buf(&mut read_buf) => {
                        match result {
                            Ok(0) => {
                                execute(session.expire("peer closed connection".to_string()), &config, &driver_state, &driver_pool, &driver_outbound, &mut session).await;
                                break 'connection;
                            }
                            Ok(_) => {
                                let frames = decoder.decode(&mut read_buf);
                                for frame in frames {
                                    handle_frame(frame.mode, frame.payload, &mut session, &config, &driver_state, &driver_pool, &driver_outbound).await;
                                    if session.state() == SessionState::Expired {
                                        break 'connection;
                                    }
                                }
                            }
                            Err(_) => {
                                execute(session.expire("read error".to_string()), &config, &driver_state, &driver_pool, &driver_outbound, &mut session).await;
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

        Ok(Self { local_id, state, pool, outbound: outbound_tx, driver })
    }

    /// Send an `echo` to the confirmed peer. No-op if the peer hasn't been
    /// learned yet.
    pub async fn echo(&self, sentinels: &netframe_proto::FrameSentinels) -> Result<(), ClientError> {
        let Some((peer_id, peer_sub_id, transforms)) = self.peer_and_transforms() else { return Ok(()) };
        let header = MessageHeader { source_id: self.local_id.clone(), source_sub_id: String::new(), target_id: peer_id, target_sub_id: peer_sub_id };
        emit_message(control::echo(header, false), None, &transforms, &self.pool, sentinels, &self.outbound).await;
        Ok(())
    }

    /// Send a structured application message addressed to `target_id`,
    /// routed through the server exactly as the production client's
    /// `send_message` does — `target_id` need not be this connection's own
    /// confirmed peer (the server), since the server's router re-addresses
    /// the message to whichever other confirmed session matches.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SendRefused`] if the handshake hasn't
    /// confirmed yet (no negotiated transforms to send under).
    pub async fn send_message(
        &self,
        target_id: &str,
        target_sub_id: &str,
        message_type: &str,
        fields: Vec<(String, Value)>,
        sentinels: &netframe_proto::FrameSentinels,
    ) -> Result<(), ClientError> {
        let transforms = {
            let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if state.peer_id.is_none() {
                return Err(ClientError::SendRefused("handshake not confirmed yet".to_string()));
            }
            state.transforms.clone()
        };
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
        emit_message(body, None, &transforms, &self.pool, sentinels, &self.outbound).await;
        Ok(())
    }

    /// Whether the handshake has completed and a peer is known.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).peer_id.is_some()
    }

    /// Close the connection: stop the background driver task, which in
    /// turn drops the outbound channel and stops the write loop.
    pub fn stop(self) {
        self.driver.abort();
    }

    fn peer_and_transforms(&self) -> Option<(String, String, Transforms)> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let peer_id = state.peer_id.clone()?;
        let peer_sub_id = state.peer_sub_id.clone().unwrap_or_default();
        Some((peer_id, peer_sub_id, state.transforms.clone()))
    }
}

async fn write_loop(mut write_half: WriteHalf<TcpStream>, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(bytes) = rx.recv().await {
        if write_half.write_all(&bytes).await.is_err() {
            break;
        }
    }
}

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
            SessionAction::Expire { .. } => {},
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

async fn handle_frame(
    mode: Mode,
    payload: Bytes,
    session: &mut Session<tokio::time::Instant>,
    config: &ClientConfig,
    state: &Arc<Mutex<PeerState>>,
    pool: &WorkerPool,
    outbound: &mpsc::UnboundedSender<Bytes>,
) {
    if mode != Mode::Packet {
        // File/binary channels are exercised against the production client
        // directly; the simulated path only needs handshake/echo/message.
        return;
    }
    let transforms = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).transforms.clone();
    let job = PipelineJob::inbound(Channel::Message, payload.to_vec());
    let PipelineAction::Dispatch { bytes } = netframe_core::drive(job, transforms, pool).await else { return };
    let Ok(body) = MessageBody::from_bytes(&bytes, false) else { return };

    match body.message_type.as_str() {
        control::CONFIRM_CONNECTION => {
            if let Ok(actions) = session.client_handle_confirm_connection(&body) {
                execute(actions, config, state, pool, outbound, session).await;
            }
        },
        control::ECHO => {
            let actions = session.handle_echo(&body);
            execute(actions, config, state, pool, outbound, session).await;
        },
        control::MESSAGE_SENDING_RESPONSE => {},
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
