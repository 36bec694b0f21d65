//! Server session registry.
//!
//! A bidirectional id → routing-entry map: connection id → session handle,
//! reduced to the single mapping this server actually needs. Mutated only
//! on the reactor thread; readers take a snapshot
//! ([`Registry::snapshot`]) before fan-out so fan-out never observes a
//! registry mutation mid-iteration.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use bytes::Bytes;
use netframe_core::session::SessionType;
use tokio::sync::mpsc;

/// Registry-assigned connection identifier. Distinct from the protocol's
/// `(id, sub_id)` identity, which is only known once a session confirms.
pub type ConnectionId = u64;

/// Everything the router needs to decide whether, and how, to forward a
/// message to one connection — a snapshot, not a live handle.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    /// Peer identity, once the handshake has confirmed. `None` while
    /// `waiting`; such entries are never fan-out targets.
    pub peer_id: Option<String>,
    /// Peer's bound endpoint.
    pub peer_sub_id: Option<String>,
    /// Negotiated payload shape.
    pub session_type: Option<SessionType>,
    /// Relay mode: accepts any `target_id`.
    pub bridge_line: bool,
    /// Extra destinations this session accepts beyond its own peer id.
    pub snipping_targets: Vec<String>,
    /// Whether payloads for this session are compressed.
    pub compress_mode: bool,
    /// Whether payloads for this session are encrypted.
    pub encrypt_mode: bool,
    /// Negotiated key material, present iff `encrypt_mode`.
    pub key: Option<Vec<u8>>,
    /// Negotiated nonce, present iff `encrypt_mode`.
    pub iv: Option<Vec<u8>>,
}

impl RouteEntry {
    /// Whether this session currently accepts a send to `target_id`
    /// (and, if supplied, `target_sub_id`). Mirrors
    /// [`netframe_core::Session::allows_send_to`] over the snapshot.
    #[must_use]
    pub fn allows_send_to(&self, target_id: &str, target_sub_id: Option<&str>) -> bool {
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

struct Entry {
    route: RouteEntry,
    outbound: mpsc::UnboundedSender<Bytes>,
}

/// Server-wide registry of live connections.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<ConnectionId, Entry>>,
    next_id: AtomicU64,
}

impl Registry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Reserve a fresh connection id for a newly accepted socket.
    pub fn reserve_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert (or replace) a connection's routing entry, e.g. right after
    /// accept (unconfirmed) and again once the handshake confirms.
    pub fn upsert(&self, id: ConnectionId, route: RouteEntry, outbound: mpsc::UnboundedSender<Bytes>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(id, Entry { route, outbound });
        }
    }

    /// Update just the routing snapshot for an already-registered
    /// connection (e.g. after a handshake confirms).
    pub fn update_route(&self, id: ConnectionId, route: RouteEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            if let Some(entry) = entries.get_mut(&id) {
                entry.route = route;
            }
        }
    }

    /// Remove a connection from the registry (session expired).
    pub fn remove(&self, id: ConnectionId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&id);
        }
    }

    /// Current number of registered connections (confirmed or still
    /// `waiting`), for `session_limit_count` enforcement.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the registry currently holds no connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot every `(id, route)` pair for fan-out. Taken under the lock
    /// and cloned out, so the lock is never held across the subsequent
    /// per-target pipeline work.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ConnectionId, RouteEntry)> {
        self.entries.lock().map_or_else(
            |_| Vec::new(),
            |entries| entries.iter().map(|(id, entry)| (*id, entry.route.clone())).collect(),
        )
    }

    /// Outbound channel for a specific connection, for handing it an
    /// already-framed wire message.
    #[must_use]
    pub fn outbound(&self, id: ConnectionId) -> Option<mpsc::UnboundedSender<Bytes>> {
        self.entries.lock().ok().and_then(|entries| entries.get(&id).map(|e| e.outbound.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(peer_id: &str) -> RouteEntry {
        RouteEntry {
            peer_id: Some(peer_id.to_string()),
            peer_sub_id: Some("1.2.3.4:1".to_string()),
            session_type: Some(SessionType::Message),
            bridge_line: false,
            snipping_targets: Vec::new(),
            compress_mode: false,
            encrypt_mode: false,
            key: None,
            iv: None,
        }
    }

    #[test]
    fn snapshot_reflects_current_entries() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.upsert(1, entry("A"), tx);
        assert_eq!(registry.snapshot().len(), 1);
        registry.remove(1);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn allows_send_to_matches_named_peer_only() {
        let route = entry("A");
        assert!(route.allows_send_to("A", None));
        assert!(!route.allows_send_to("Z", None));
    }

    #[test]
    fn bridge_line_entry_allows_any_target() {
        let mut route = entry("A");
        route.bridge_line = true;
        assert!(route.allows_send_to("anyone", None));
    }
}
