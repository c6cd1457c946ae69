//! HTTP and WebSocket front for the game-night session engine.
//!
//! The binary in `main.rs` wires configuration, logging and metrics around
//! the [`api`] router; everything here is exposed so integration tests can
//! drive the router in-process.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
