//! Round lifecycle: exactly one open partida per table.
//!
//! A partida opens implicitly when the first hand of a fresh cycle is
//! recorded and closes when the table is finalized. Every operation here
//! runs inside a transaction owned by the caller, so the round change
//! commits or rolls back together with the hand or table write that
//! triggered it.

pub mod manager;
pub mod models;

pub use manager::{PartidaManager, winner_from_increments};
pub use models::{Partida, PartidaId, PartidaSnapshot};
