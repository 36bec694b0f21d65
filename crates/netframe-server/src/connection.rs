//! Per-connection task: handshake, read loop, write loop, and channel
//! dispatch for one accepted socket.

use std::{sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use netframe_core::{
    pipeline::{Channel, Envelope, PipelineAction, PipelineJob, Priority, Transforms},
    session::{SessionConfig, SessionState, SessionType},
    transforms, BinaryReceipt, Environment, FileReceipt, Session, SessionAction, SystemEnv, WorkerPool,
};
use netframe_proto::{
    control, decode_fields, encode_fields, FrameDecoder, FrameSentinels, MessageBody, Mode, Value, ECHO,
    REQUEST_CONNECTION, REQUEST_FILE, REQUEST_FILES,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::mpsc,
};

use crate::{
    config::ServerConfig,
    registry::{ConnectionId, Registry, RouteEntry},
    router::{self, RouteOutcome},
};

/// Drive one accepted connection to completion. Returns once the session
/// has expired (peer closed, drop timer, rejection, or a transport error).
pub async fn run(socket: TcpStream, id: ConnectionId, config: Arc<ServerConfig>, registry: Arc<Registry>, pool: Arc<WorkerPool>) {
    let local_addr = socket.local_addr().ok();
    let local_sub_id = local_addr.map_or_else(String::new, |a| a.to_string());

    let (mut read_half, write_half) = socket.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();

    registry.upsert(
        id,
        RouteEntry {
            peer_id: None,
            peer_sub_id: None,
            session_type: None,
            bridge_line: false,
            snipping_targets: Vec::new(),
            compress_mode: config.compress_mode,
            encrypt_mode: config.encrypt_mode,
            key: None,
            iv: None,
        },
        outbound_tx.clone(),
    );

    let writer_task = tokio::spawn(write_loop(write_half, outbound_rx));

    let env = SystemEnv::new();
    let session_config = SessionConfig {
        drop_connection_time: Duration::from_secs(u64::from(config.drop_connection_time)),
        encrypt_mode: config.encrypt_mode,
        compress_mode: config.compress_mode,
        compress_block_size: config.compress_block_size,
        connection_key: config.connection_key.clone(),
        session_type: SessionType::Message,
        bridge_line: false,
        snipping_targets: Vec::new(),
        ignore_target_ids: config.ignore_target_ids.clone(),
        acceptable_target_ids: config.acceptable_target_ids.clone(),
        ignore_snipping_targets: config.ignore_snipping_targets.clone(),
        possible_session_types: config.possible_session_types.clone(),
        kill_code: config.kill_code,
        auto_echo_interval: None,
    };

    let mut session = Session::new(env.now(), config.source_id.clone(), local_sub_id, session_config);
    let mut decoder = FrameDecoder::new(config.sentinels);
    let mut read_buf = BytesMut::with_capacity(8 * 1024);
    let mut current_transforms = Transforms::default();

    'connection: loop {
        let tick_sleep = tokio::time::sleep(Duration::from_millis(250));
        tokio::select! {
            result = read_half.read_buf(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        execute(session.expire("peer closed connection".to_string()), &config, &registry, id, &outbound_tx, &pool, &config.sentinels, &mut current_transforms, &mut session).await;
                        break 'connection;
                    }
                    Ok(_) => {
                        let frames = decoder.decode(&mut read_buf);
                        for event in decoder.take_events() {
                            tracing::debug!(connection = id, ?event, "protocol event");
                        }
                        for frame in frames {
                            handle_frame(frame.mode, frame.payload, &mut session, &config, &registry, &pool, id, &outbound_tx, &mut current_transforms).await;
                            if session.state() == SessionState::Expired {
                                break 'connection;
                            }
                        }
                    }
                    Err(err) => {
                        tracing::debug!(connection = id, %err, "read failed");
                        execute(session.expire(format!("read error: {err}")), &config, &registry, id, &outbound_tx, &pool, &config.sentinels, &mut current_transforms, &mut session).await;
                        break 'connection;
                    }
                }
            }
            () = tick_sleep => {
                let actions = session.tick(env.now());
                execute(actions, &config, &registry, id, &outbound_tx, &pool, &config.sentinels, &mut current_transforms, &mut session).await;
                if session.state() == SessionState::Expired {
                    break 'connection;
                }
            }
        }
    }

    registry.remove(id);
    drop(outbound_tx);
    let _ = writer_task.await;
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(bytes) = rx.recv().await {
        if let Err(err) = write_half.write_all(&bytes).await {
            tracing::debug!(%err, "write failed, closing connection");
            break;
        }
    }
}

/// Run `body` through the outbound `Message` pipeline under `transforms`
/// and push the framed bytes onto this connection's own outbound channel.
async fn emit_message(
    body: MessageBody,
    priority: Priority,
    pool: &WorkerPool,
    sentinels: &FrameSentinels,
    transforms: &Transforms,
    outbound: &mpsc::UnboundedSender<Bytes>,
) {
    let Ok(bytes) = body.serialize_array() else { return };
    let job = PipelineJob::outbound(Channel::Message, bytes, None).with_priority(priority);
    if let PipelineAction::SendFrame { bytes, .. } = netframe_core::drive(job, transforms.clone(), pool).await {
        let _ = outbound.send(netframe_proto::encode_frame(sentinels, Mode::Packet, &bytes));
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute(
    actions: Vec<SessionAction>,
    config: &ServerConfig,
    registry: &Registry,
    id: ConnectionId,
    outbound: &mpsc::UnboundedSender<Bytes>,
    pool: &WorkerPool,
    sentinels: &FrameSentinels,
    current_transforms: &mut Transforms,
    session: &mut Session<tokio::time::Instant>,
) {
    for action in actions {
        match action {
            SessionAction::Emit { body, priority } => {
                emit_message(body, priority, pool, sentinels, current_transforms, outbound).await;
            },
            SessionAction::Expire { reason } => {
                tracing::debug!(connection = id, %reason, "session expired");
            },
            SessionAction::NotifyConnectResult { connected: true } => {
                *current_transforms =
                    transforms::build(session.compress_mode(), session.encrypt_mode(), session.key_material().map(|(k, _)| k), session.key_material().map(|(_, i)| i));
                if let Some((peer_id, peer_sub_id)) = session.peer() {
                    registry.update_route(
                        id,
                        RouteEntry {
                            peer_id: Some(peer_id.to_string()),
                            peer_sub_id: Some(peer_sub_id.to_string()),
                            session_type: session.session_type(),
                            bridge_line: session.bridge_line(),
                            snipping_targets: session.accepted_snipping_targets().to_vec(),
                            compress_mode: session.compress_mode(),
                            encrypt_mode: session.encrypt_mode(),
                            key: session.key_material().map(|(k, _)| k.to_vec()),
                            iv: session.key_material().map(|(_, i)| i.to_vec()),
                        },
                    );
                    if let Some(on_connect) = &config.callbacks.on_connect {
                        on_connect(peer_id.to_string(), peer_sub_id.to_string());
                    }
                }
            },
            SessionAction::NotifyConnectResult { connected: false } => {},
            SessionAction::NotifyDisconnected => {
                if let (Some((peer_id, peer_sub_id)), Some(on_disconnect)) = (session.peer(), &config.callbacks.on_disconnect) {
                    on_disconnect(peer_id.to_string(), peer_sub_id.to_string());
                }
            },
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_frame(
    mode: Mode,
    payload: Bytes,
    session: &mut Session<tokio::time::Instant>,
    config: &ServerConfig,
    registry: &Registry,
    pool: &WorkerPool,
    id: ConnectionId,
    outbound: &mpsc::UnboundedSender<Bytes>,
    current_transforms: &mut Transforms,
) {
    let env = SystemEnv::new();
    match mode {
        Mode::Packet => {
            let job = PipelineJob::inbound(Channel::Message, payload.to_vec());
            let PipelineAction::Dispatch { bytes } = netframe_core::drive(job, current_transforms.clone(), pool).await else { return };
            let Ok(body) = MessageBody::from_bytes(&bytes, false) else {
                tracing::debug!(connection = id, "malformed packet payload, dropped");
                return;
            };
            handle_message(body, session, config, registry, pool, id, outbound, current_transforms, &env).await;
        },
        Mode::File => {
            let job = PipelineJob::inbound(Channel::File, payload.to_vec());
            let action = netframe_core::drive(job, current_transforms.clone(), pool).await;
            let PipelineAction::WriteFile { bytes, .. } = action else { return };
            handle_file(bytes, session, config, registry, pool, id).await;
        },
        Mode::Binary => {
            if session.check_payload_shape(true).is_err() {
                tracing::debug!(connection = id, "binary payload rejected by session shape filter");
                return;
            }
            let job = PipelineJob::inbound(Channel::Binary, payload.to_vec());
            let action = netframe_core::drive(job, current_transforms.clone(), pool).await;
            let PipelineAction::Notify { bytes, .. } = action else { return };
            handle_binary(bytes, config, registry, pool, id).await;
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_message(
    body: MessageBody,
    session: &mut Session<tokio::time::Instant>,
    config: &ServerConfig,
    registry: &Registry,
    pool: &WorkerPool,
    id: ConnectionId,
    outbound: &mpsc::UnboundedSender<Bytes>,
    current_transforms: &mut Transforms,
    env: &SystemEnv,
) {
    match body.message_type.as_str() {
        REQUEST_CONNECTION => {
            let actions = session.server_handle_request_connection(&body, || env.create_key());
            match actions {
                Ok(actions) => execute(actions, config, registry, id, outbound, pool, &config.sentinels, current_transforms, session).await,
                Err(err) => tracing::debug!(connection = id, %err, "handshake rejected"),
            }
        },
        ECHO => {
            if session.state() != SessionState::Confirmed {
                tracing::debug!(connection = id, "echo before confirm, dropped");
                return;
            }
            let actions = session.handle_echo(&body);
            execute(actions, config, registry, id, outbound, pool, &config.sentinels, current_transforms, session).await;
        },
        REQUEST_FILE => {
            if session.state() != SessionState::Confirmed {
                tracing::debug!(connection = id, "request_file before confirm, dropped");
                return;
            }
            handle_request_file(&body, config, pool, outbound, current_transforms).await;
        },
        REQUEST_FILES => {
            if session.state() != SessionState::Confirmed {
                tracing::debug!(connection = id, "request_files before confirm, dropped");
                return;
            }
            handle_request_files(&body, config, pool, outbound, current_transforms).await;
        },
        _ => {
            if session.state() != SessionState::Confirmed {
                tracing::debug!(connection = id, "application message before confirm, dropped");
                return;
            }
            if session.check_payload_shape(false).is_err() {
                return;
            }
            let indication_id = match body.get_value("indication_id") {
                Some(Value::Str(s)) => s.clone(),
                _ => String::new(),
            };
            let outcome =
                router::route(registry, pool, &config.sentinels, &config.callbacks, &config.source_id, config.broadcast_mode, id, &body)
                    .await;
            if let RouteOutcome::Forwarded { delivered } = outcome {
                if config.use_message_response {
                    let mut reply_header = body.header.clone();
                    reply_header.swap();
                    reply_header.source_id = config.source_id.clone();
                    let message = if delivered > 0 { "delivered" } else { "no matching session" };
                    let reply = control::message_sending_response(
                        reply_header,
                        indication_id,
                        body.source_id().to_string(),
                        body.header.source_sub_id.clone(),
                        body.message_type.clone(),
                        message,
                        delivered > 0,
                    );
                    emit_message(reply, Priority::Top, pool, &config.sentinels, current_transforms, outbound).await;
                }
            }
        },
    }
}

fn bytes_field(fields: &[bytes::Bytes], index: usize) -> String {
    fields.get(index).map(|b| String::from_utf8_lossy(b).into_owned()).unwrap_or_default()
}

async fn handle_file(bytes: Vec<u8>, session: &Session<tokio::time::Instant>, config: &ServerConfig, registry: &Registry, pool: &WorkerPool, id: ConnectionId) {
    let Ok(fields) = decode_fields(Bytes::from(bytes)) else {
        tracing::debug!(connection = id, "malformed file payload, dropped");
        return;
    };
    if fields.len() != 8 {
        tracing::debug!(connection = id, count = fields.len(), "file payload has the wrong field count");
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

    if envelope.target_id == config.source_id {
        let dest = config.file_storage_dir.join(&envelope.target_path);
        match tokio::fs::write(&dest, &file_bytes).await {
            Ok(()) => {
                if let Some(on_file_received) = &config.callbacks.on_file_received {
                    on_file_received(FileReceipt::from_envelope(&envelope, file_bytes.len()));
                }
            },
            Err(err) => tracing::warn!(connection = id, %err, path = %dest.display(), "failed to persist received file"),
        }
        return;
    }

    let target_sub_id = (!envelope.target_sub_id.is_empty()).then_some(envelope.target_sub_id.as_str());
    let refreshed = encode_fields(&[
        envelope.indication_id.as_bytes(),
        envelope.source_id.as_bytes(),
        envelope.source_sub_id.as_bytes(),
        envelope.target_id.as_bytes(),
        envelope.target_sub_id.as_bytes(),
        envelope.source_path.as_bytes(),
        envelope.target_path.as_bytes(),
        &file_bytes,
    ]);
    let _ = session; // file-channel sessions do not themselves gate relaying; routing is by registry snapshot
    router::forward_raw(
        registry,
        pool,
        &config.sentinels,
        Channel::File,
        Mode::File,
        SessionType::File,
        id,
        &envelope.target_id,
        target_sub_id,
        refreshed.to_vec(),
    )
    .await;
}

async fn handle_binary(bytes: Vec<u8>, config: &ServerConfig, registry: &Registry, pool: &WorkerPool, id: ConnectionId) {
    let Ok(fields) = decode_fields(Bytes::from(bytes)) else {
        tracing::debug!(connection = id, "malformed binary payload, dropped");
        return;
    };
    if fields.len() != 5 {
        tracing::debug!(connection = id, count = fields.len(), "binary payload has the wrong field count");
        return;
    }
    let source_id = bytes_field(&fields, 0);
    let source_sub_id = bytes_field(&fields, 1);
    let target_id = bytes_field(&fields, 2);
    let target_sub_id = bytes_field(&fields, 3);
    let payload = fields[4].to_vec();

    if target_id == config.source_id {
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
        return;
    }

    let target_sub_id_ref = (!target_sub_id.is_empty()).then_some(target_sub_id.as_str());
    let refreshed = encode_fields(&[source_id.as_bytes(), source_sub_id.as_bytes(), target_id.as_bytes(), target_sub_id.as_bytes(), &payload]);
    router::forward_raw(registry, pool, &config.sentinels, Channel::Binary, Mode::Binary, SessionType::Binary, id, &target_id, target_sub_id_ref, refreshed.to_vec())
        .await;
}

async fn handle_request_file(body: &MessageBody, config: &ServerConfig, pool: &WorkerPool, outbound: &mpsc::UnboundedSender<Bytes>, transforms: &Transforms) {
    let file_name = match body.get_value("file_name") {
        Some(Value::Str(s)) => s.clone(),
        _ => return,
    };
    send_file_response(&file_name, body, config, pool, outbound, transforms).await;
}

async fn handle_request_files(body: &MessageBody, config: &ServerConfig, pool: &WorkerPool, outbound: &mpsc::UnboundedSender<Bytes>, transforms: &Transforms) {
    let Some(Value::StrArray(names)) = body.get_value("file_names") else { return };
    for name in names.clone() {
        send_file_response(&name, body, config, pool, outbound, transforms).await;
    }
}

async fn send_file_response(file_name: &str, request: &MessageBody, config: &ServerConfig, pool: &WorkerPool, outbound: &mpsc::UnboundedSender<Bytes>, transforms: &Transforms) {
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
        config.source_id.as_bytes(),
        b"",
        request.source_id().as_bytes(),
        request.header.source_sub_id.as_bytes(),
        file_name.as_bytes(),
        target_path.as_bytes(),
        &file_bytes,
    ]);
    let job = PipelineJob::outbound(Channel::File, fields_bytes.to_vec(), None);
    if let PipelineAction::SendFrame { bytes, .. } = netframe_core::drive(job, transforms.clone(), pool).await {
        let _ = outbound.send(netframe_proto::encode_frame(&config.sentinels, Mode::File, &bytes));
    }
}
