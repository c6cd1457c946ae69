//! Attendance data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, postgres::PgRow};
use std::collections::HashMap;

use crate::game::{PlayerId, SessionId, TableId};

/// Attendance record ID type
pub type AttendanceId = i64;

/// One visit of a player to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: AttendanceId,
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub check_in_time: DateTime<Utc>,
    /// `None` while the player is present
    pub check_out_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttendanceRecord {
    pub(crate) fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            session_id: row.get("session_id"),
            player_id: row.get("player_id"),
            check_in_time: row.get("check_in_time"),
            check_out_time: row.get("check_out_time"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    pub fn is_open(&self) -> bool {
        self.check_out_time.is_none()
    }
}

/// Attendance of a session with the players currently on the bench
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceOverview {
    pub records: Vec<AttendanceRecord>,
    /// Checked in but not seated at an unfinished table
    pub bench: Vec<PlayerId>,
}

/// Result of closing forgotten check-outs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub updated: u64,
}

/// Time split of one player over a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMinutes {
    pub player_id: PlayerId,
    pub attendance_minutes: i64,
    pub playing_minutes: i64,
    pub bench_minutes: i64,
}

/// Time span of one hand; `end` is unknown while the hand is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandWindow {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

/// Everything the minutes computation needs to know about a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTimeline {
    pub date: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Tables each player is seated at
    pub seating: HashMap<PlayerId, Vec<TableId>>,
    /// Hands played at each table
    pub hands: HashMap<TableId, Vec<HandWindow>>,
}

impl SessionTimeline {
    pub fn new(date: DateTime<Utc>) -> Self {
        Self {
            date,
            updated_at: None,
            closed_at: None,
            seating: HashMap::new(),
            hands: HashMap::new(),
        }
    }

    /// Seat a player at a table
    pub fn seat(&mut self, player_id: PlayerId, table_id: TableId) {
        let tables = self.seating.entry(player_id).or_default();
        if !tables.contains(&table_id) {
            tables.push(table_id);
        }
    }

    /// Record a hand played at a table
    pub fn add_hand(&mut self, table_id: TableId, window: HandWindow) {
        self.hands.entry(table_id).or_default().push(window);
    }

    /// Latest known hand timestamp across all tables
    pub fn latest_hand_at(&self) -> Option<DateTime<Utc>> {
        self.hands
            .values()
            .flatten()
            .map(|hand| hand.end.unwrap_or(hand.start))
            .max()
    }

    /// End used for open intervals: latest hand, then closed_at, updated_at, date
    pub fn fallback_end(&self) -> DateTime<Utc> {
        self.latest_hand_at()
            .or(self.closed_at)
            .or(self.updated_at)
            .unwrap_or(self.date)
    }
}
