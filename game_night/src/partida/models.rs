//! Round (partida) data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, postgres::PgRow};

use crate::game::{PlayerId, SessionId, TableId};

/// Partida ID type
pub type PartidaId = i64;

/// One race-to-target cycle at a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partida {
    pub id: PartidaId,
    pub session_id: SessionId,
    pub table_id: TableId,
    pub partida_index: i32,
    pub started_at: DateTime<Utc>,
    /// `None` while the round is open
    pub closed_at: Option<DateTime<Utc>>,
    pub winner_pair_index: Option<i16>,
}

impl Partida {
    pub(crate) fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            session_id: row.get("session_id"),
            table_id: row.get("table_id"),
            partida_index: row.get("partida_index"),
            started_at: row.get("started_at"),
            closed_at: row.get("closed_at"),
            winner_pair_index: row.get("winner_pair_index"),
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

/// Immutable record of who played a closed round and what they scored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartidaSnapshot {
    pub session_id: SessionId,
    pub table_id: TableId,
    pub partida_index: i32,
    pub pair_index: i16,
    pub player_1_id: Option<PlayerId>,
    pub player_2_id: Option<PlayerId>,
    pub points: i32,
    pub won: bool,
    pub created_at: DateTime<Utc>,
}

impl PartidaSnapshot {
    pub(crate) fn from_row(row: &PgRow) -> Self {
        Self {
            session_id: row.get("session_id"),
            table_id: row.get("table_id"),
            partida_index: row.get("partida_index"),
            pair_index: row.get("pair_index"),
            player_1_id: row.get("player_1_id"),
            player_2_id: row.get("player_2_id"),
            points: row.get("points"),
            won: row.get("won"),
            created_at: row.get("created_at"),
        }
    }
}
