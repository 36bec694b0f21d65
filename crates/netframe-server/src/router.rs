//! Server-side fan-out: local delivery, confirmed-session broadcast, and
//! delivery acknowledgment.
//!
//! A `packet`-mode message addressed to this server's own `source_id` is
//! delivered locally via the configured message callback. Otherwise every
//! confirmed, type-matching session's own [`RouteEntry::allows_send_to`]
//! decides whether it receives a copy — each copy re-runs the outbound
//! pipeline under *that* session's own transforms, since every session
//! negotiates independent key material.

use netframe_core::{
    pipeline::{Channel, PipelineAction, PipelineJob},
    session::SessionType,
    transforms, WorkerPool,
};
use netframe_proto::{encode_frame, FrameSentinels, MessageBody, Mode};

use crate::{
    config::Callbacks,
    registry::{ConnectionId, Registry},
};

/// Forward an already-framed `file`/`binary` channel payload to every
/// confirmed session of `session_type` whose [`crate::registry::RouteEntry::allows_send_to`]
/// accepts `(target_id, target_sub_id)`, excluding `sender`.
///
/// Unlike [`route`], there is no local-delivery short-circuit here: `file`
/// and `binary` payloads addressed to this server's own id are handled by
/// the caller before `encode_fields` even runs (see
/// `connection::handle_file`/`handle_binary`), since the local path writes
/// to disk or invokes a callback rather than re-framing for the wire.
#[allow(clippy::too_many_arguments)]
pub async fn forward_raw(
    registry: &Registry,
    pool: &WorkerPool,
    sentinels: &FrameSentinels,
    channel: Channel,
    mode: Mode,
    session_type: SessionType,
    sender: ConnectionId,
    target_id: &str,
    target_sub_id: Option<&str>,
    payload: Vec<u8>,
) -> usize {
    let mut delivered = 0usize;
    for (id, entry) in registry.snapshot() {
        if id == sender {
            continue;
        }
        if entry.peer_id.is_none() {
            continue;
        }
        if entry.session_type != Some(session_type) {
            continue;
        }
        if !entry.allows_send_to(target_id, target_sub_id) {
            continue;
        }
        let Some(outbound) = registry.outbound(id) else { continue };

        let target_transforms = transforms::build(entry.compress_mode, entry.encrypt_mode, entry.key.as_deref(), entry.iv.as_deref());
        let job = PipelineJob::outbound(channel, payload.clone(), None);
        if let PipelineAction::SendFrame { bytes, .. } = netframe_core::drive(job, target_transforms, pool).await {
            let framed = encode_frame(sentinels, mode, &bytes);
            if outbound.send(framed).is_ok() {
                delivered += 1;
            }
        }
    }
    delivered
}

/// What happened to a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// `target_id` matched this server's own identity; handed to the local
    /// message callback, never fanned out.
    Local,
    /// Forwarded to `delivered` confirmed sessions (possibly zero).
    Forwarded {
        /// Count of sessions that actually received a copy.
        delivered: usize,
    },
}

/// Route one inbound `packet`-mode message.
///
/// `sender` is excluded from fan-out targets. `broadcast_mode` bypasses
/// both the type filter and each session's own `allows_send_to` as a
/// degenerate routing policy that re-emits to every confirmed session.
pub async fn route(
    registry: &Registry,
    pool: &WorkerPool,
    sentinels: &FrameSentinels,
    callbacks: &Callbacks,
    server_source_id: &str,
    broadcast_mode: bool,
    sender: ConnectionId,
    body: &MessageBody,
) -> RouteOutcome {
    if body.target_id() == server_source_id {
        if let Some(on_message) = &callbacks.on_message {
            on_message(body.clone());
        }
        return RouteOutcome::Local;
    }

    let target_id = body.target_id();
    let target_sub_id_field = body.header.target_sub_id.as_str();
    let target_sub_id = (!target_sub_id_field.is_empty()).then_some(target_sub_id_field);

    let mut delivered = 0usize;
    for (id, entry) in registry.snapshot() {
        if id == sender {
            continue;
        }
        if entry.peer_id.is_none() {
            continue; // still `waiting`, never a fan-out target
        }
        if entry.session_type != Some(SessionType::Message) {
            continue;
        }
        if !broadcast_mode && !entry.allows_send_to(target_id, target_sub_id) {
            continue;
        }
        let Some(outbound) = registry.outbound(id) else { continue };
        let Ok(bytes) = body.serialize_array() else { continue };

        let target_transforms = transforms::build(entry.compress_mode, entry.encrypt_mode, entry.key.as_deref(), entry.iv.as_deref());
        let job = PipelineJob::outbound(Channel::Message, bytes, None);
        if let PipelineAction::SendFrame { bytes, .. } = netframe_core::drive(job, target_transforms, pool).await {
            let framed = encode_frame(sentinels, Mode::Packet, &bytes);
            if outbound.send(framed).is_ok() {
                delivered += 1;
            }
        }
    }

    RouteOutcome::Forwarded { delivered }
}

#[cfg(test)]
mod tests {
    use netframe_core::PoolConfig;
    use netframe_proto::MessageHeader;

    use super::*;
    use crate::registry::RouteEntry;

    fn entry(peer_id: &str, session_type: SessionType) -> RouteEntry {
        RouteEntry {
            peer_id: Some(peer_id.to_string()),
            peer_sub_id: Some("1.2.3.4:1".to_string()),
            session_type: Some(session_type),
            bridge_line: false,
            snipping_targets: Vec::new(),
            compress_mode: false,
            encrypt_mode: false,
            key: None,
            iv: None,
        }
    }

    fn message_to(target: &str) -> MessageBody {
        let header = MessageHeader {
            source_id: "A".into(),
            source_sub_id: "1.1.1.1:1".into(),
            target_id: target.into(),
            target_sub_id: String::new(),
        };
        MessageBody::new("chat", header)
    }

    #[tokio::test]
    async fn local_target_invokes_callback_and_never_forwards() {
        let registry = Registry::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        registry.upsert(2, entry("B", SessionType::Message), tx);
        let pool = WorkerPool::start(PoolConfig { top: 1, high: 1, normal: 1, low: 1 });

        let received = std::sync::Arc::new(std::sync::Mutex::new(None));
        let received_clone = std::sync::Arc::clone(&received);
        let callbacks = Callbacks {
            on_message: Some(std::sync::Arc::new(move |body: MessageBody| {
                *received_clone.lock().unwrap() = Some(body.message_type.clone());
            })),
            ..Callbacks::default()
        };

        let outcome = route(&registry, &pool, &FrameSentinels::default(), &callbacks, "server", false, 1, &message_to("server")).await;
        assert_eq!(outcome, RouteOutcome::Local);
        assert_eq!(received.lock().unwrap().as_deref(), Some("chat"));
        assert!(rx.try_recv().is_err());
        pool.stop().await;
    }

    #[tokio::test]
    async fn forward_reaches_matching_named_target_only() {
        let registry = Registry::new();
        let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = tokio::sync::mpsc::unbounded_channel();
        registry.upsert(2, entry("B", SessionType::Message), tx_b);
        registry.upsert(3, entry("C", SessionType::Message), tx_c);
        let pool = WorkerPool::start(PoolConfig { top: 1, high: 1, normal: 1, low: 1 });

        let outcome =
            route(&registry, &pool, &FrameSentinels::default(), &Callbacks::default(), "server", false, 1, &message_to("B")).await;
        assert_eq!(outcome, RouteOutcome::Forwarded { delivered: 1 });
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
        pool.stop().await;
    }

    #[tokio::test]
    async fn broadcast_mode_ignores_target_id() {
        let registry = Registry::new();
        let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();
        registry.upsert(2, entry("B", SessionType::Message), tx_b);
        let pool = WorkerPool::start(PoolConfig { top: 1, high: 1, normal: 1, low: 1 });

        let outcome =
            route(&registry, &pool, &FrameSentinels::default(), &Callbacks::default(), "server", true, 1, &message_to("nobody")).await;
        assert_eq!(outcome, RouteOutcome::Forwarded { delivered: 1 });
        assert!(rx_b.try_recv().is_ok());
        pool.stop().await;
    }

    #[tokio::test]
    async fn forward_raw_only_reaches_matching_session_type() {
        let registry = Registry::new();
        let (tx_file, mut rx_file) = tokio::sync::mpsc::unbounded_channel();
        let (tx_msg, mut rx_msg) = tokio::sync::mpsc::unbounded_channel();
        registry.upsert(2, entry("B", SessionType::File), tx_file);
        registry.upsert(3, entry("B", SessionType::Message), tx_msg);
        let pool = WorkerPool::start(PoolConfig { top: 1, high: 1, normal: 1, low: 1 });

        let delivered =
            forward_raw(&registry, &pool, &FrameSentinels::default(), Channel::File, Mode::File, SessionType::File, 1, "B", None, vec![1, 2, 3])
                .await;
        assert_eq!(delivered, 1);
        assert!(rx_file.try_recv().is_ok());
        assert!(rx_msg.try_recv().is_err());
        pool.stop().await;
    }

    #[tokio::test]
    async fn forward_raw_excludes_sender() {
        let registry = Registry::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        registry.upsert(1, entry("B", SessionType::Binary), tx);
        let pool = WorkerPool::start(PoolConfig { top: 1, high: 1, normal: 1, low: 1 });

        let delivered =
            forward_raw(&registry, &pool, &FrameSentinels::default(), Channel::Binary, Mode::Binary, SessionType::Binary, 1, "B", None, vec![9])
                .await;
        assert_eq!(delivered, 0);
        assert!(rx.try_recv().is_err());
        pool.stop().await;
    }
}
