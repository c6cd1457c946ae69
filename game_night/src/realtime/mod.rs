//! Live notifications for observers of a session.

pub mod distributor;
pub mod events;

pub use distributor::{ConnectionId, DEFAULT_HEARTBEAT, EventDistributor};
pub use events::{EventEnvelope, EventKind};
