//! Session-state mutation engine.
//!
//! Every mutating operation of [`GameManager`] runs in one database
//! transaction: locked reads and writes, delegation to the partida and
//! attendance managers, then commit or rollback as a unit. Only after a
//! successful commit is the change published to the session's observers.

mod cascade;
pub mod manager;
pub mod models;
mod sync;

pub use manager::GameManager;
pub use models::{
    Anecdote, AnecdoteId, AnecdotePayload, AnecdoteSpec, EntityRef, FinalizeOutcome, GameSession,
    GameTable, Hand, HandId, HandPatch, HandPayload, HandSpec, MIN_TARGET_SCORE, Pair, PairId,
    PairPayload, PairScores, PlayerId, SessionDetail, SessionId, SessionPayload, SessionStatus,
    TableDetail, TableId, TablePayload, TableSpec, apply_won_increments, hand_duration_secs,
    validate_hand_scores, validate_pair_indexes,
};
