//! Event catalogue and wire envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::SessionId;

/// Kinds of frames sent to session observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Subscription acknowledged
    Ready,
    /// Heartbeat
    Ping,
    SessionUpdated,
    SessionDeleted,
    TableCreated,
    PairScoresUpdated,
    HandAdded,
    HandUpdated,
    TableFinalized,
    TableCancelled,
    AnecdoteCreated,
    AnecdoteUpdated,
    AnecdoteDeleted,
    AttendanceUpdated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Ready => "READY",
            EventKind::Ping => "PING",
            EventKind::SessionUpdated => "SESSION_UPDATED",
            EventKind::SessionDeleted => "SESSION_DELETED",
            EventKind::TableCreated => "TABLE_CREATED",
            EventKind::PairScoresUpdated => "PAIR_SCORES_UPDATED",
            EventKind::HandAdded => "HAND_ADDED",
            EventKind::HandUpdated => "HAND_UPDATED",
            EventKind::TableFinalized => "TABLE_FINALIZED",
            EventKind::TableCancelled => "TABLE_CANCELLED",
            EventKind::AnecdoteCreated => "ANECDOTE_CREATED",
            EventKind::AnecdoteUpdated => "ANECDOTE_UPDATED",
            EventKind::AnecdoteDeleted => "ANECDOTE_DELETED",
            EventKind::AttendanceUpdated => "ATTENDANCE_UPDATED",
        }
    }

    /// Protocol frames carry no domain payload
    pub fn is_protocol(&self) -> bool {
        matches!(self, EventKind::Ready | EventKind::Ping)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame delivered to every subscriber of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub session_id: SessionId,
    pub ts: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(kind: EventKind, session_id: SessionId, payload: serde_json::Value) -> Self {
        Self {
            kind,
            session_id,
            ts: Utc::now(),
            payload,
        }
    }

    /// READY or PING frame
    pub fn protocol(kind: EventKind, session_id: SessionId) -> Self {
        Self::new(kind, session_id, serde_json::Value::Null)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
