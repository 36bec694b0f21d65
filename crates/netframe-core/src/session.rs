//! Per-connection session state machine.
//!
//! A pure, I/O-free state machine: every method takes `now: I` and returns
//! `Vec<SessionAction>` for a driver to execute — no socket handle, no
//! registry back-reference, generic over instant type so the same code
//! drives both real sockets and a virtual-time simulation.
//!
//! # State machine
//!
//! ```text
//! ┌─────────┐  handshake ok   ┌───────────┐
//! │ Waiting │ ───────────────>│ Confirmed │
//! └─────────┘                 └───────────┘
//!      │  drop timer / reject       │ peer close / kill
//!      ↓                            ↓
//! ┌─────────┐ <──────────────────────
//! │ Expired │
//! └─────────┘
//! ```

use std::{ops::Sub, time::Duration};

use netframe_proto::{control, MessageBody, MessageHeader, Value};

use crate::{
    error::SessionError,
    pipeline::Priority,
};

/// Default seconds from accept until a still-`waiting` session is expired.
pub const DEFAULT_DROP_CONNECTION_TIME: Duration = Duration::from_secs(5);

/// One of the three payload shapes a session accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionType {
    /// Structured `packet`-mode messages.
    #[default]
    Message,
    /// `file`-mode transfers.
    File,
    /// `binary`-mode blobs.
    Binary,
}

impl SessionType {
    fn from_wire(code: u64) -> Option<Self> {
        match code {
            1 => Some(Self::Message),
            2 => Some(Self::File),
            3 => Some(Self::Binary),
            _ => None,
        }
    }

    fn to_wire(self) -> u64 {
        match self {
            Self::Message => 1,
            Self::File => 2,
            Self::Binary => 3,
        }
    }

    /// Name used in [`SessionError::WrongPayloadShape`].
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Message => "message_line",
            Self::File => "file_line",
            Self::Binary => "binary_line",
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake not yet complete; only `request_connection`/
    /// `confirm_connection` may flow.
    Waiting,
    /// Handshake succeeded; fan-out and application traffic permitted.
    Confirmed,
    /// Terminated: drop timer fired, handshake rejected, peer closed, or
    /// killed. Terminal — a session never leaves this state.
    Expired,
}

/// Negotiated per-session configuration, set by the owning side (server
/// accept policy or client dial options) before the handshake runs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Seconds from session start until a still-`waiting` session expires.
    pub drop_connection_time: Duration,
    /// Whether payloads are end-to-end encrypted once confirmed.
    pub encrypt_mode: bool,
    /// Whether payloads are compressed.
    pub compress_mode: bool,
    /// Chunk size used by the codec's send path and by compression.
    pub compress_block_size: u16,
    /// Pre-shared key checked against the peer's `connection_key`.
    pub connection_key: String,
    /// Payload shape this side declares when it is the one dialing
    /// (client side only; the server instead learns the peer's type from
    /// the incoming `request_connection`).
    pub session_type: SessionType,
    /// When set, sends ignore target-id filtering entirely (relay mode).
    pub bridge_line: bool,
    /// Extra destinations this session accepts, beyond its own peer id.
    pub snipping_targets: Vec<String>,
    /// Peer ids this side will never accept as a peer (server only).
    pub ignore_target_ids: Vec<String>,
    /// If non-empty, only these peer ids may complete the handshake
    /// (server only).
    pub acceptable_target_ids: Vec<String>,
    /// Snipping targets this side refuses to honor even if the peer
    /// requests them (server only).
    pub ignore_snipping_targets: Vec<String>,
    /// Session types this side is willing to accept (server only); empty
    /// means any.
    pub possible_session_types: Vec<SessionType>,
    /// When set, the handshake is unconditionally rejected (server only),
    /// e.g. during graceful shutdown.
    pub kill_code: bool,
    /// Client auto-echo interval; `None` disables auto-echo.
    pub auto_echo_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            drop_connection_time: DEFAULT_DROP_CONNECTION_TIME,
            encrypt_mode: false,
            compress_mode: false,
            compress_block_size: 1024,
            connection_key: String::new(),
            session_type: SessionType::Message,
            bridge_line: false,
            snipping_targets: Vec::new(),
            ignore_target_ids: Vec::new(),
            acceptable_target_ids: Vec::new(),
            ignore_snipping_targets: Vec::new(),
            possible_session_types: Vec::new(),
            kill_code: false,
            auto_echo_interval: None,
        }
    }
}

/// Actions returned by the session state machine for a driver to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Hand a structured message to the pipeline for outbound processing
    /// at the given priority.
    Emit {
        /// Message to send.
        body: MessageBody,
        /// Scheduling priority for the pipeline/worker pool.
        priority: Priority,
    },
    /// Transition to `expired`: close the socket, stop the pipeline
    /// workers, drop the session from any registry.
    Expire {
        /// Human-readable reason, useful for logs and rejected handshakes.
        reason: String,
    },
    /// Application-facing connect result notification (client side).
    NotifyConnectResult {
        /// Whether the handshake succeeded.
        connected: bool,
    },
    /// Application-facing disconnect notification, fired exactly once.
    NotifyDisconnected,
}

fn get_str<'a>(body: &'a MessageBody, name: &str) -> Result<&'a str, SessionError> {
    match body.get_value(name) {
        Some(Value::Str(s)) => Ok(s.as_str()),
        _ => Err(SessionError::MalformedControlMessage(format!("missing or non-string field {name}"))),
    }
}

fn get_bool(body: &MessageBody, name: &str) -> Result<bool, SessionError> {
    match body.get_value(name) {
        Some(Value::Bool(b)) => Ok(*b),
        _ => Err(SessionError::MalformedControlMessage(format!("missing or non-bool field {name}"))),
    }
}

fn get_u64(body: &MessageBody, name: &str) -> Result<u64, SessionError> {
    match body.get_value(name) {
        Some(Value::U64(n)) => Ok(*n),
        _ => Err(SessionError::MalformedControlMessage(format!("missing or non-numeric field {name}"))),
    }
}

fn get_str_array(body: &MessageBody, name: &str) -> Vec<String> {
    match body.get_value(name) {
        Some(Value::StrArray(v)) => v.clone(),
        _ => Vec::new(),
    }
}

/// Per-connection session state machine. See module docs for the lifecycle
/// diagram.
#[derive(Debug, Clone)]
pub struct Session<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    state: SessionState,
    config: SessionConfig,
    local_id: String,
    local_sub_id: String,
    session_type: Option<SessionType>,
    peer_id: Option<String>,
    peer_sub_id: Option<String>,
    accepted_snipping_targets: Vec<String>,
    key: Option<Vec<u8>>,
    iv: Option<Vec<u8>>,
    drop_deadline: I,
    last_auto_echo: Option<I>,
    disconnect_notified: bool,
}

impl<I> Session<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Start a new session in `waiting` with its one-shot drop timer
    /// armed at `now + config.drop_connection_time`.
    pub fn new(now: I, local_id: impl Into<String>, local_sub_id: impl Into<String>, config: SessionConfig) -> Self
    where
        I: std::ops::Add<Duration, Output = I>,
    {
        let drop_deadline = now + config.drop_connection_time;
        Self {
            state: SessionState::Waiting,
            config,
            local_id: local_id.into(),
            local_sub_id: local_sub_id.into(),
            session_type: None,
            peer_id: None,
            peer_sub_id: None,
            accepted_snipping_targets: Vec::new(),
            key: None,
            iv: None,
            drop_deadline,
            last_auto_echo: None,
            disconnect_notified: false,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated session type, once known (set by the handshake).
    #[must_use]
    pub fn session_type(&self) -> Option<SessionType> {
        self.session_type
    }

    /// Peer identity, once learned.
    #[must_use]
    pub fn peer(&self) -> Option<(&str, &str)> {
        self.peer_id.as_deref().zip(self.peer_sub_id.as_deref())
    }

    /// Symmetric key material, present only once confirmed with
    /// `encrypt_mode` enabled.
    #[must_use]
    pub fn key_material(&self) -> Option<(&[u8], &[u8])> {
        self.key.as_deref().zip(self.iv.as_deref())
    }

    /// Whether payloads are compressed once confirmed.
    #[must_use]
    pub fn compress_mode(&self) -> bool {
        self.config.compress_mode
    }

    /// Whether payloads are end-to-end encrypted once confirmed.
    #[must_use]
    pub fn encrypt_mode(&self) -> bool {
        self.config.encrypt_mode
    }

    /// Whether this session ignores target-id filtering entirely.
    #[must_use]
    pub fn bridge_line(&self) -> bool {
        self.config.bridge_line
    }

    /// Extra destinations this session accepts, beyond its own peer id.
    #[must_use]
    pub fn accepted_snipping_targets(&self) -> &[String] {
        &self.accepted_snipping_targets
    }

    fn header(&self, target_id: &str, target_sub_id: &str) -> MessageHeader {
        MessageHeader {
            source_id: self.local_id.clone(),
            source_sub_id: self.local_sub_id.clone(),
            target_id: target_id.to_string(),
            target_sub_id: target_sub_id.to_string(),
        }
    }

    /// Client side: build and emit `request_connection`. State remains
    /// `waiting` until a `confirm_connection` arrives.
    pub fn client_request_connection(&mut self, server_id: &str) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::Waiting {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "client_request_connection".to_string(),
            });
        }
        let header = self.header(server_id, "");
        let body = control::request_connection(
            header,
            self.config.connection_key.clone(),
            self.config.auto_echo_interval.map_or(0, |d| d.as_secs()),
            self.config.session_type.to_wire(),
            self.config.bridge_line,
            self.config.snipping_targets.clone(),
        );
        Ok(vec![SessionAction::Emit { body, priority: Priority::Normal }])
    }

    /// Server side: validate an incoming `request_connection` against
    /// configured policy and either confirm or reject the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] if the session is not
    /// `waiting`, or [`SessionError::MalformedControlMessage`] if a
    /// required field is absent or mistyped.
    pub fn server_handle_request_connection(
        &mut self,
        body: &MessageBody,
        env_key: impl FnOnce() -> (Vec<u8>, Vec<u8>),
    ) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::Waiting {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "server_handle_request_connection".to_string(),
            });
        }

        let peer_id = body.source_id().to_string();
        let peer_sub_id = body.header.source_sub_id.clone();
        let session_type_code = get_u64(body, "session_type").unwrap_or(1);
        let connection_key = get_str(body, "connection_key").unwrap_or_default().to_string();
        let peer_snipping_targets = get_str_array(body, "snipping_targets");
        let bridge_mode = get_bool(body, "bridge_mode").unwrap_or(false);

        let requested_type = SessionType::from_wire(session_type_code);

        let reason = self.rejection_reason(&peer_id, requested_type, &connection_key);

        if let Some(reason) = reason {
            self.state = SessionState::Expired;
            let header = self.header(&peer_id, &peer_sub_id);
            let confirm = control::confirm_connection_rejected(header, reason.clone());
            return Ok(vec![
                SessionAction::Emit { body: confirm, priority: Priority::Top },
                SessionAction::Expire { reason },
            ]);
        }

        self.peer_id = Some(peer_id.clone());
        self.peer_sub_id = Some(peer_sub_id.clone());
        self.session_type = requested_type;
        self.config.bridge_line = bridge_mode;
        self.accepted_snipping_targets = peer_snipping_targets
            .into_iter()
            .filter(|t| !self.config.ignore_snipping_targets.contains(t))
            .collect();

        if self.config.encrypt_mode {
            let (key, iv) = env_key();
            self.key = Some(key);
            self.iv = Some(iv);
        }

        self.state = SessionState::Confirmed;

        let header = self.header(&peer_id, &peer_sub_id);
        let confirm = control::confirm_connection_accepted(
            header,
            self.config.encrypt_mode,
            self.key.as_deref().unwrap_or(&[]),
            self.iv.as_deref().unwrap_or(&[]),
            self.accepted_snipping_targets.clone(),
        );
        Ok(vec![
            SessionAction::Emit { body: confirm, priority: Priority::Top },
            SessionAction::NotifyConnectResult { connected: true },
        ])
    }

    fn rejection_reason(
        &self,
        peer_id: &str,
        requested_type: Option<SessionType>,
        connection_key: &str,
    ) -> Option<String> {
        if self.config.kill_code {
            return Some("kill code set".to_string());
        }
        if peer_id == self.local_id {
            return Some("peer id equals server id".to_string());
        }
        if self.config.ignore_target_ids.iter().any(|id| id == peer_id) {
            return Some("peer id is ignored".to_string());
        }
        if !self.config.acceptable_target_ids.is_empty()
            && !self.config.acceptable_target_ids.iter().any(|id| id == peer_id)
        {
            return Some("peer id not in acceptable_target_ids".to_string());
        }
        let Some(requested_type) = requested_type else {
            return Some("unknown session type".to_string());
        };
        if !self.config.possible_session_types.is_empty()
            && !self.config.possible_session_types.contains(&requested_type)
        {
            return Some("session type not permitted".to_string());
        }
        if connection_key != self.config.connection_key {
            return Some("unknown connection key".to_string());
        }
        None
    }

    /// Client side: handle an incoming `confirm_connection`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] if not `waiting`, or
    /// [`SessionError::MalformedControlMessage`] if `confirm` is missing.
    pub fn client_handle_confirm_connection(
        &mut self,
        body: &MessageBody,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::Waiting {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "client_handle_confirm_connection".to_string(),
            });
        }

        let confirmed = get_bool(body, "confirm")?;
        if !confirmed {
            self.state = SessionState::Expired;
            return Ok(vec![SessionAction::NotifyConnectResult { connected: false }]);
        }

        self.peer_id = Some(body.source_id().to_string());
        self.peer_sub_id = Some(body.header.source_sub_id.clone());
        self.accepted_snipping_targets = get_str_array(body, "snipping_targets");
        if get_bool(body, "encrypt_mode").unwrap_or(false) {
            if let (Some(Value::Bytes(key)), Some(Value::Bytes(iv))) =
                (body.get_value("key"), body.get_value("iv"))
            {
                self.key = Some(key.clone());
                self.iv = Some(iv.clone());
            }
        }
        self.state = SessionState::Confirmed;
        Ok(vec![SessionAction::NotifyConnectResult { connected: true }])
    }

    /// Handle an incoming `echo`. If `response` is unset, swap the header
    /// and answer at `top` priority; otherwise this is a reply and no
    /// action is needed beyond observing it.
    #[must_use]
    pub fn handle_echo(&self, body: &MessageBody) -> Vec<SessionAction> {
        let already_response = get_bool(body, "response").unwrap_or(false);
        if already_response {
            return Vec::new();
        }
        let mut header = body.header.clone();
        header.swap();
        let reply = control::echo(header, true);
        vec![SessionAction::Emit { body: reply, priority: Priority::Top }]
    }

    /// Build the next auto-echo `echo` message if the configured interval
    /// has elapsed, updating the internal timer. No-op if auto-echo is
    /// disabled, the session isn't confirmed, or the peer isn't known yet.
    pub fn maybe_auto_echo(&mut self, now: I) -> Vec<SessionAction>
    where
        I: std::ops::Add<Duration, Output = I>,
    {
        let Some(interval) = self.config.auto_echo_interval else { return Vec::new() };
        if self.state != SessionState::Confirmed {
            return Vec::new();
        }
        let Some((peer_id, peer_sub_id)) = self.peer().map(|(a, b)| (a.to_string(), b.to_string())) else {
            return Vec::new();
        };

        let due = self.last_auto_echo.is_none_or(|last| now >= last + interval);
        if !due {
            return Vec::new();
        }
        self.last_auto_echo = Some(now);
        let header = self.header(&peer_id, &peer_sub_id);
        vec![SessionAction::Emit { body: control::echo(header, false), priority: Priority::Normal }]
    }

    /// Whether this session may currently emit `target_id`/`target_sub_id`.
    ///
    /// Refuses the send unless `bridge_line` is on, the target matches the
    /// confirmed peer, or the target is one of the session's accepted
    /// snipping targets. `target_sub_id`, when supplied (non-empty), must
    /// also match the peer's sub id (same exceptions).
    #[must_use]
    pub fn allows_send_to(&self, target_id: &str, target_sub_id: Option<&str>) -> bool {
        if self.config.bridge_line {
            return true;
        }
        let is_named_target = self.peer_id.as_deref() == Some(target_id)
            || self.accepted_snipping_targets.iter().any(|t| t == target_id);
        if !is_named_target {
            return false;
        }
        match target_sub_id {
            Some(sub) if !sub.is_empty() => {
                self.peer_sub_id.as_deref() == Some(sub) || self.accepted_snipping_targets.iter().any(|t| t == target_id)
            },
            _ => true,
        }
    }

    /// Periodic maintenance: fires the drop timer while `waiting`.
    pub fn tick(&mut self, now: I) -> Vec<SessionAction> {
        if self.state == SessionState::Waiting && now >= self.drop_deadline {
            return self.expire("drop connection time elapsed".to_string());
        }
        Vec::new()
    }

    /// Force this session to `expired`, idempotently. Fires the disconnect
    /// notification exactly once.
    pub fn expire(&mut self, reason: String) -> Vec<SessionAction> {
        if self.state == SessionState::Expired {
            return Vec::new();
        }
        self.state = SessionState::Expired;
        let mut actions = vec![SessionAction::Expire { reason }];
        if !self.disconnect_notified {
            self.disconnect_notified = true;
            actions.push(SessionAction::NotifyDisconnected);
        }
        actions
    }

    /// Validate that a payload's shape is acceptable for this session's
    /// negotiated [`SessionType`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::WrongPayloadShape`] on a mismatch.
    pub fn check_payload_shape(&self, is_binary_shaped: bool) -> Result<(), SessionError> {
        let expected = self.session_type.unwrap_or(SessionType::Message);
        let found_binary = expected == SessionType::Binary;
        if is_binary_shaped != found_binary {
            return Err(SessionError::WrongPayloadShape {
                expected: expected.label(),
                found: if is_binary_shaped { "binary" } else { "message" },
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn server_config() -> SessionConfig {
        SessionConfig {
            connection_key: "k".to_string(),
            possible_session_types: vec![SessionType::Message],
            ..SessionConfig::default()
        }
    }

    fn request_body(key: &str) -> MessageBody {
        let header = MessageHeader {
            source_id: "A".to_string(),
            source_sub_id: "1.2.3.4:1".to_string(),
            target_id: "S".to_string(),
            target_sub_id: String::new(),
        };
        MessageBody::new("request_connection", header)
            .with("connection_key", Value::Str(key.to_string()))
            .with("session_type", Value::U64(1))
            .with("snipping_targets", Value::StrArray(vec![]))
    }

    #[test]
    fn accepted_handshake_confirms_and_notifies() {
        let t0 = Instant::now();
        let mut session = Session::new(t0, "S", "0.0.0.0:9", server_config());
        let actions = session.server_handle_request_connection(&request_body("k"), || (vec![], vec![])).unwrap();
        assert_eq!(session.state(), SessionState::Confirmed);
        assert!(matches!(actions[1], SessionAction::NotifyConnectResult { connected: true }));
        match &actions[0] {
            SessionAction::Emit { body, .. } => assert_eq!(body.get_value("confirm"), Some(&Value::Bool(true))),
            _ => panic!("expected Emit"),
        }
    }

    #[test]
    fn bad_connection_key_is_rejected_and_expires() {
        let t0 = Instant::now();
        let mut session = Session::new(t0, "S", "0.0.0.0:9", server_config());
        let actions = session.server_handle_request_connection(&request_body("wrong"), || (vec![], vec![])).unwrap();
        assert_eq!(session.state(), SessionState::Expired);
        assert!(matches!(&actions[1], SessionAction::Expire { reason } if reason.contains("unknown connection key")));
    }

    #[test]
    fn drop_timer_expires_waiting_session() {
        let t0 = Instant::now();
        let mut config = server_config();
        config.drop_connection_time = Duration::from_secs(1);
        let mut session = Session::new(t0, "S", "0.0.0.0:9", config);
        assert!(session.tick(t0).is_empty());
        let later = t0 + Duration::from_secs(2);
        let actions = session.tick(later);
        assert_eq!(session.state(), SessionState::Expired);
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn expire_is_idempotent() {
        let t0 = Instant::now();
        let mut session = Session::new(t0, "S", "0.0.0.0:9", server_config());
        let first = session.expire("bye".to_string());
        let second = session.expire("bye again".to_string());
        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
    }

    #[test]
    fn echo_without_response_flag_is_answered_and_swapped() {
        let t0 = Instant::now();
        let session = Session::<Instant>::new(t0, "S", "0.0.0.0:9", server_config());
        let header =
            MessageHeader { source_id: "A".into(), source_sub_id: "x".into(), target_id: "S".into(), target_sub_id: "y".into() };
        let incoming = control::echo(header, false);
        let actions = session.handle_echo(&incoming);
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            SessionAction::Emit { body, priority } => {
                assert_eq!(*priority, Priority::Top);
                assert_eq!(body.source_id(), "S");
                assert_eq!(body.target_id(), "A");
                assert_eq!(body.get_value("response"), Some(&Value::Bool(true)));
            },
            _ => panic!("expected Emit"),
        }
    }

    #[test]
    fn echo_reply_is_not_re_answered() {
        let t0 = Instant::now();
        let session = Session::<Instant>::new(t0, "S", "0.0.0.0:9", server_config());
        let header = MessageHeader::default();
        let reply = control::echo(header, true);
        assert!(session.handle_echo(&reply).is_empty());
    }

    #[test]
    fn send_filter_refuses_unrelated_target_without_bridge_mode() {
        let t0 = Instant::now();
        let mut session = Session::new(t0, "S", "0.0.0.0:9", server_config());
        session.server_handle_request_connection(&request_body("k"), || (vec![], vec![])).unwrap();
        assert!(session.allows_send_to("A", None));
        assert!(!session.allows_send_to("Z", None));
    }

    #[test]
    fn bridge_line_allows_any_target() {
        let t0 = Instant::now();
        let mut config = server_config();
        config.bridge_line = true;
        let mut session = Session::new(t0, "S", "0.0.0.0:9", config);
        session.server_handle_request_connection(&request_body("k"), || (vec![], vec![])).unwrap();
        assert!(session.allows_send_to("anyone", None));
    }
}
