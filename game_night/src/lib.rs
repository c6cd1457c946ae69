//! # Game Night
//!
//! Session-state engine for live game nights ("veladas"): tables of two
//! pairs, scored hands grouped into rounds (partidas), and player attendance,
//! recorded concurrently by several organizers.
//!
//! ## Architecture
//!
//! - [`partida`]: keeps exactly one open round per table
//! - [`attendance`]: check-in/check-out, backfill, bench and time analytics
//! - [`game`]: transactional mutations of sessions, tables, pairs, hands and
//!   anecdotes, delegating to the two managers above inside one transaction
//! - [`realtime`]: in-process fan-out of committed changes to the observers
//!   of a session
//!
//! Every invariant check runs under a row lock or is backed by a unique
//! index in the same transaction; Postgres is the only arbiter of
//! consistency between clients.
//!
//! ## Example
//!
//! ```no_run
//! use game_night::{Database, DatabaseConfig, EventDistributor, GameManager, TableSpec};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), game_night::GameError> {
//! let db = Database::new(&DatabaseConfig::from_env()).await?;
//! db.migrate().await?;
//!
//! let events = Arc::new(EventDistributor::default());
//! let games = GameManager::new(Arc::new(db.pool().clone()), events);
//! let table = games.add_table(1, TableSpec::default()).await?;
//! println!("table {} ready", table.table.table_number);
//! # Ok(())
//! # }
//! ```

/// Player attendance and time analytics.
pub mod attendance;
/// Database connection and migrations.
pub mod db;
/// Error taxonomy.
pub mod errors;
/// Session-state mutation engine.
pub mod game;
/// Round lifecycle.
pub mod partida;
/// Live notifications.
pub mod realtime;

pub use attendance::{AttendanceLedger, AttendanceOverview, AttendanceRecord, PlayerMinutes};
pub use db::{Database, DatabaseConfig};
pub use errors::{ConflictKind, Entity, GameError, GameResult};
pub use game::{
    GameManager, GameSession, GameTable, Hand, HandPatch, HandSpec, PairScores, SessionPayload,
    SessionStatus, TableDetail, TableSpec,
};
pub use partida::{Partida, PartidaManager, PartidaSnapshot};
pub use realtime::{EventDistributor, EventEnvelope, EventKind};
