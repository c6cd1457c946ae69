//! Domain error taxonomy shared by every session-state operation.
//!
//! Callers must be able to tell a [`GameError::Conflict`] (pick another table
//! number, refresh and retry) from a [`GameError::NotFound`] (hard failure).

use std::fmt;
use thiserror::Error;

/// Entities that can be reported missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Session,
    Table,
    Pair,
    Hand,
    Partida,
    Attendance,
    Anecdote,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Session => write!(f, "Session"),
            Entity::Table => write!(f, "Table"),
            Entity::Pair => write!(f, "Pair"),
            Entity::Hand => write!(f, "Hand"),
            Entity::Partida => write!(f, "Partida"),
            Entity::Attendance => write!(f, "Attendance record"),
            Entity::Anecdote => write!(f, "Anecdote"),
        }
    }
}

/// Semantic conflicts a client can react to
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictKind {
    #[error("another session is already active")]
    ActiveSession,

    #[error("table number already used in this session")]
    DuplicateTableNumber,

    #[error("hand number already used at this table")]
    DuplicateHandNumber,

    #[error("player is already checked in")]
    AttendanceAlreadyOpen,

    #[error("table already has progress and cannot be cancelled")]
    TableInProgress,

    #[error("session is closed")]
    SessionClosed,

    #[error("round index already taken at this table")]
    PartidaIndexTaken,

    #[error("unique constraint violated: {0}")]
    Unique(String),
}

impl ConflictKind {
    /// Map a storage constraint name to the conflict it guards
    pub fn from_constraint(constraint: Option<&str>) -> Self {
        match constraint {
            Some("game_sessions_single_active") => ConflictKind::ActiveSession,
            Some("game_tables_session_table_number_key") => ConflictKind::DuplicateTableNumber,
            Some("game_hands_table_hand_number_key") => ConflictKind::DuplicateHandNumber,
            Some("game_attendance_single_open") => ConflictKind::AttendanceAlreadyOpen,
            Some("game_partidas_single_open") | Some("game_partidas_table_index_key") => {
                ConflictKind::PartidaIndexTaken
            }
            Some(other) => ConflictKind::Unique(other.to_string()),
            None => ConflictKind::Unique("unknown".to_string()),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ConflictKind::ActiveSession => "active_session",
            ConflictKind::DuplicateTableNumber => "duplicate_table_number",
            ConflictKind::DuplicateHandNumber => "duplicate_hand_number",
            ConflictKind::AttendanceAlreadyOpen => "attendance_already_open",
            ConflictKind::TableInProgress => "table_in_progress",
            ConflictKind::SessionClosed => "session_closed",
            ConflictKind::PartidaIndexTaken => "partida_index_taken",
            ConflictKind::Unique(_) => "unique_violation",
        }
    }
}

/// Session-state errors
#[derive(Debug, Error)]
pub enum GameError {
    /// Missing session/table/hand/... reference
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },

    /// Invariant would be broken by the write
    #[error("Conflict: {0}")]
    Conflict(ConflictKind),

    /// Malformed or inconsistent input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for GameError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err
            && db_err.is_unique_violation()
        {
            let kind = ConflictKind::from_constraint(db_err.constraint());
            log::warn!("Unique constraint violation mapped to conflict: {}", kind);
            return GameError::Conflict(kind);
        }
        GameError::Database(err)
    }
}

impl GameError {
    pub fn not_found(entity: Entity, id: i64) -> Self {
        GameError::NotFound { entity, id }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        GameError::BadRequest(detail.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, GameError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GameError::NotFound { .. })
    }

    /// The conflict kind, if this is a conflict
    pub fn conflict_kind(&self) -> Option<&ConflictKind> {
        match self {
            GameError::Conflict(kind) => Some(kind),
            _ => None,
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Database, migration and serialization failures are reported generically;
    /// domain errors are safe to expose verbatim.
    pub fn client_message(&self) -> String {
        match self {
            GameError::Database(_) | GameError::Migration(_) | GameError::Serialization(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for session-state operations
pub type GameResult<T> = Result<T, GameError>;
