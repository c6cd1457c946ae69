//! Session, table, pair, hand and anecdote models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, postgres::PgRow};
use std::str::FromStr;

use crate::errors::GameError;

/// Session ID type
pub type SessionId = i64;
/// Table ID type
pub type TableId = i64;
/// Pair ID type
pub type PairId = i64;
/// Hand ID type
pub type HandId = i64;
/// Player ID type (external player directory)
pub type PlayerId = i64;
/// Anecdote ID type
pub type AnecdoteId = i64;

/// Default and minimum target score of a table
pub const MIN_TARGET_SCORE: i32 = 100;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Draft,
    Active,
    Finished,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Draft => "draft",
            SessionStatus::Active => "active",
            SessionStatus::Finished => "finished",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Finished and cancelled sessions no longer accept attendance or tables
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionStatus::Finished | SessionStatus::Cancelled)
    }

    /// Parse a stored status, treating unknown values as corrupt storage
    pub(crate) fn decode(raw: &str) -> Result<Self, GameError> {
        raw.parse().map_err(|_| {
            log::error!("Stored session status '{}' is not recognized", raw);
            GameError::Database(sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: format!("unknown session status '{raw}'").into(),
            })
        })
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(SessionStatus::Draft),
            "active" => Ok(SessionStatus::Active),
            "finished" => Ok(SessionStatus::Finished),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(GameError::bad_request(format!("unknown session status '{other}'"))),
        }
    }
}

/// A game night
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSession {
    pub id: SessionId,
    pub date: DateTime<Utc>,
    pub summary: Option<String>,
    pub location_name: Option<String>,
    pub location_address: Option<String>,
    pub status: SessionStatus,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GameSession {
    /// # Errors
    ///
    /// * `GameError::Database` - Stored status is not a known lifecycle state
    pub(crate) fn from_row(row: &PgRow) -> Result<Self, GameError> {
        let status: String = row.get("status");
        Ok(Self {
            id: row.get("id"),
            date: row.get("date"),
            summary: row.get("summary"),
            location_name: row.get("location_name"),
            location_address: row.get("location_address"),
            status: SessionStatus::decode(&status)?,
            closed_at: row.get("closed_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// A physical table hosting one match between two pairs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameTable {
    pub id: TableId,
    pub session_id: SessionId,
    pub table_number: i32,
    pub target_score: i32,
    pub finished: bool,
    pub finished_at: Option<DateTime<Utc>>,
    pub games_won_pair1: i32,
    pub games_won_pair2: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GameTable {
    pub(crate) fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            session_id: row.get("session_id"),
            table_number: row.get("table_number"),
            target_score: row.get("target_score"),
            finished: row.get("finished"),
            finished_at: row.get("finished_at"),
            games_won_pair1: row.get("games_won_pair1"),
            games_won_pair2: row.get("games_won_pair2"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    /// True once the table has recorded a win or been finalized
    pub fn has_progress(&self) -> bool {
        self.finished || self.games_won_pair1 != 0 || self.games_won_pair2 != 0
    }
}

/// A team of up to two players at a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    pub id: PairId,
    pub table_id: TableId,
    pub pair_index: i16,
    pub score: i32,
    /// Player slots 1 and 2
    pub players: [Option<PlayerId>; 2],
}

impl Pair {
    /// Expects `player_1_id` and `player_2_id` columns alongside the pair row
    pub(crate) fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            table_id: row.get("table_id"),
            pair_index: row.get("pair_index"),
            score: row.get("score"),
            players: [row.get("player_1_id"), row.get("player_2_id")],
        }
    }
}

/// One scored hand at a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hand {
    pub id: HandId,
    pub table_id: TableId,
    pub partida_id: Option<i64>,
    pub hand_number: i32,
    pub pair_1_score: i32,
    pub pair_2_score: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds
    pub duration: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Hand {
    pub(crate) fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            table_id: row.get("table_id"),
            partida_id: row.get("partida_id"),
            hand_number: row.get("hand_number"),
            pair_1_score: row.get("pair_1_score"),
            pair_2_score: row.get("pair_2_score"),
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            duration: row.get("duration"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// A story told about the night
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anecdote {
    pub id: AnecdoteId,
    pub session_id: SessionId,
    pub player_id: Option<PlayerId>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Anecdote {
    pub(crate) fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            session_id: row.get("session_id"),
            player_id: row.get("player_id"),
            body: row.get("body"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// A table with its pairs and hands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDetail {
    #[serde(flatten)]
    pub table: GameTable,
    pub pairs: Vec<Pair>,
    pub hands: Vec<Hand>,
}

/// Full structure of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: GameSession,
    pub tables: Vec<TableDetail>,
    pub anecdotes: Vec<Anecdote>,
}

// ============================================================================
// Inputs
// ============================================================================

/// Reference to a nested entity in an upsert payload.
///
/// Numbers are ids of stored rows; strings are temporary ids minted by the
/// client for rows that do not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    Persisted(i64),
    Temporary(String),
}

impl EntityRef {
    pub fn persisted_id(&self) -> Option<i64> {
        match self {
            EntityRef::Persisted(id) => Some(*id),
            EntityRef::Temporary(_) => None,
        }
    }
}

/// Session upsert payload with optional nested collections.
///
/// A collection left as `None` is not synchronized; `Some(vec![])` removes
/// every stored row of that collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPayload {
    pub id: Option<SessionId>,
    pub date: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub location_name: Option<String>,
    pub location_address: Option<String>,
    pub status: Option<SessionStatus>,
    pub tables: Option<Vec<TablePayload>>,
    pub anecdotes: Option<Vec<AnecdotePayload>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePayload {
    pub id: EntityRef,
    pub table_number: i32,
    #[serde(default)]
    pub target_score: Option<i32>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub games_won_pair1: i32,
    #[serde(default)]
    pub games_won_pair2: i32,
    #[serde(default)]
    pub pairs: Vec<PairPayload>,
    #[serde(default)]
    pub hands: Vec<HandPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairPayload {
    pub id: EntityRef,
    pub pair_index: i16,
    #[serde(default)]
    pub score: i32,
    #[serde(default)]
    pub players: [Option<PlayerId>; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandPayload {
    pub id: EntityRef,
    pub hand_number: i32,
    #[serde(default)]
    pub pair_1_score: i32,
    #[serde(default)]
    pub pair_2_score: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnecdotePayload {
    pub id: EntityRef,
    pub player_id: Option<PlayerId>,
    pub body: String,
}

/// New table request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSpec {
    /// Next free number when omitted
    pub table_number: Option<i32>,
    pub target_score: Option<i32>,
    /// Seating of pair 1 and pair 2
    #[serde(default)]
    pub pairs: [[Option<PlayerId>; 2]; 2],
}

/// New hand request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandSpec {
    /// Next free number when omitted
    pub hand_number: Option<i32>,
    #[serde(default)]
    pub pair_1_score: i32,
    #[serde(default)]
    pub pair_2_score: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<i32>,
}

/// Partial hand update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandPatch {
    pub hand_number: Option<i32>,
    pub pair_1_score: Option<i32>,
    pub pair_2_score: Option<i32>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<i32>,
}

/// New or edited anecdote
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnecdoteSpec {
    pub player_id: Option<PlayerId>,
    pub body: String,
}

/// Pair score write for both pairs of a table
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PairScores {
    pub pair1_id: PairId,
    pub pair2_id: PairId,
    pub pair1_score: i32,
    pub pair2_score: i32,
    #[serde(default)]
    pub pair1_won_delta: i32,
    #[serde(default)]
    pub pair2_won_delta: i32,
}

/// Result of finalizing a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeOutcome {
    pub table: GameTable,
    /// Whether an open round was closed
    pub partida_closed: bool,
    pub winner_pair_index: Option<i16>,
}

/// Reject a hand where both pairs scored
pub fn validate_hand_scores(pair_1_score: i32, pair_2_score: i32) -> Result<(), GameError> {
    if pair_1_score > 0 && pair_2_score > 0 {
        return Err(GameError::bad_request(
            "only one pair can score positive points in a hand",
        ));
    }
    Ok(())
}

/// Apply won-counter increments keyed by pair index
///
/// # Errors
///
/// * `GameError::BadRequest` - A counter would overflow or go negative
pub fn apply_won_increments(
    current: [i32; 2],
    increments: [(i16, i32); 2],
) -> Result<[i32; 2], GameError> {
    let mut won = current;
    for (pair_index, increment) in increments {
        let counter = if pair_index == 1 { 0 } else { 1 };
        won[counter] = won[counter]
            .checked_add(increment)
            .ok_or_else(|| GameError::bad_request("won counter out of range"))?;
    }
    if won.iter().any(|count| *count < 0) {
        return Err(GameError::bad_request("won counters cannot go negative"));
    }
    Ok(won)
}

/// Require exactly one pair for each of the indexes 1 and 2
pub fn validate_pair_indexes(pairs: &[PairPayload]) -> Result<(), GameError> {
    let mut indexes: Vec<i16> = pairs.iter().map(|p| p.pair_index).collect();
    indexes.sort_unstable();
    if indexes != [1, 2] {
        return Err(GameError::bad_request(
            "a table needs exactly one pair with index 1 and one with index 2",
        ));
    }
    Ok(())
}

/// Duration in seconds between two known timestamps
pub fn hand_duration_secs(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Option<i32> {
    match (start, end) {
        (Some(start), Some(end)) if end >= start => {
            i32::try_from((end - start).num_seconds()).ok()
        }
        _ => None,
    }
}
