//! Fuzz target for `Session::server_handle_request_connection`.
//!
//! Drives the handshake half of the session state machine with
//! arbitrary peer identities, connection keys, session types, and
//! snipping-target lists, exercising every rejection predicate (session
//! type mismatch, same-id-as-server, ignored peer id, not-in-acceptable-
//! list, bad connection key).
//!
//! # Invariants
//!
//! - Never panics, regardless of which fields are present/absent or how
//!   they're typed.
//! - Every call produces exactly one handshake reply (`Emit`) plus either
//!   `NotifyConnectResult { connected: true }` or `Expire`, never both
//!   outcomes and never neither.
//! - A session leaves `Waiting` in every code path: it ends `Confirmed`
//!   or `Expired`, never still `Waiting`.

#![no_main]

use std::time::Instant;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use netframe_core::session::{Session, SessionAction, SessionConfig, SessionState, SessionType};
use netframe_proto::{MessageBody, MessageHeader, Value};

#[derive(Debug, Clone, Arbitrary)]
struct FuzzHandshake {
    peer_id: String,
    peer_sub_id: String,
    connection_key: String,
    session_type_code: u64,
    snipping_targets: Vec<String>,
    include_session_type_field: bool,
    include_connection_key_field: bool,

    server_connection_key: String,
    server_kill_code: bool,
    server_ignore_target_ids: Vec<String>,
    server_acceptable_target_ids: Vec<String>,
    server_possible_session_types: Vec<u8>,
}

fn wire_session_type(code: u8) -> SessionType {
    match code % 3 {
        0 => SessionType::Message,
        1 => SessionType::File,
        _ => SessionType::Binary,
    }
}

fuzz_target!(|input: FuzzHandshake| {
    let config = SessionConfig {
        connection_key: input.server_connection_key.clone(),
        kill_code: input.server_kill_code,
        ignore_target_ids: input.server_ignore_target_ids.clone(),
        acceptable_target_ids: input.server_acceptable_target_ids.clone(),
        possible_session_types: input.server_possible_session_types.iter().map(|c| wire_session_type(*c)).collect(),
        ..SessionConfig::default()
    };

    let mut session = Session::new(Instant::now(), "S", "0.0.0.0:9", config);

    let header = MessageHeader {
        source_id: input.peer_id.clone(),
        source_sub_id: input.peer_sub_id.clone(),
        target_id: "S".to_string(),
        target_sub_id: String::new(),
    };
    let mut body = MessageBody::new("request_connection", header);
    if input.include_session_type_field {
        body.insert("session_type", Value::U64(input.session_type_code));
    }
    if input.include_connection_key_field {
        body.insert("connection_key", Value::Str(input.connection_key.clone()));
    }
    body.insert("snipping_targets", Value::StrArray(input.snipping_targets.clone()));

    let result = session.server_handle_request_connection(&body, || (vec![1; 32], vec![2; 24]));

    let Ok(actions) = result else {
        // Only reachable if the session wasn't Waiting, which can't happen
        // on a freshly constructed session.
        unreachable!("freshly constructed session is always Waiting");
    };

    assert!(session.state() != SessionState::Waiting, "handshake must resolve out of Waiting");
    assert_eq!(actions.len(), 2, "handshake always emits exactly a reply plus an outcome");
    assert!(matches!(actions[0], SessionAction::Emit { .. }));
    match session.state() {
        SessionState::Confirmed => {
            assert!(matches!(actions[1], SessionAction::NotifyConnectResult { connected: true }));
        },
        SessionState::Expired => {
            assert!(matches!(actions[1], SessionAction::Expire { .. }));
        },
        SessionState::Waiting => unreachable!(),
    }
});
