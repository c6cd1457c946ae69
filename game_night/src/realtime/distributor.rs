//! Per-session fan-out of committed state changes.

use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    sync::{RwLock, mpsc},
    task::JoinHandle,
};
use uuid::Uuid;

use super::events::{EventEnvelope, EventKind};
use crate::game::SessionId;

/// Identifier of one live observer connection
pub type ConnectionId = Uuid;

/// Default heartbeat period
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(25);

struct Subscriber {
    sender: mpsc::Sender<String>,
    heartbeat: Option<JoinHandle<()>>,
}

impl Subscriber {
    fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

/// Subscribers of one session
type Channel = HashMap<ConnectionId, Subscriber>;

/// In-process registry of session channels.
///
/// Delivery is best-effort and at-most-once: a subscriber whose queue is
/// closed or full when a frame is published is dropped on the spot, and
/// late joiners get no replay. Every mutation commits before it publishes,
/// so a missed frame only leaves an observer with a stale view.
pub struct EventDistributor {
    channels: RwLock<HashMap<SessionId, Channel>>,
    heartbeat: Duration,
}

impl Default for EventDistributor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT)
    }
}

impl EventDistributor {
    /// Create a distributor pinging every subscriber at `heartbeat` intervals
    pub fn new(heartbeat: Duration) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            heartbeat,
        }
    }

    /// Register an observer of a session
    ///
    /// A `READY` frame is queued immediately and a heartbeat task starts
    /// pinging the connection; the first failed ping unsubscribes it.
    ///
    /// # Arguments
    ///
    /// * `session_id` - Session to observe
    /// * `sender` - Outbound queue of the connection
    ///
    /// # Returns
    ///
    /// * `ConnectionId` - Handle for `unsubscribe`
    pub async fn subscribe(
        self: &Arc<Self>,
        session_id: SessionId,
        sender: mpsc::Sender<String>,
    ) -> ConnectionId {
        let connection_id = Uuid::new_v4();

        match EventEnvelope::protocol(EventKind::Ready, session_id).to_json() {
            Ok(ready) => {
                if sender.try_send(ready).is_err() {
                    log::debug!(
                        "Connection {} for session {} closed before READY",
                        connection_id,
                        session_id
                    );
                    return connection_id;
                }
            }
            Err(e) => log::error!("Failed to serialize READY frame: {}", e),
        }

        let heartbeat = self.spawn_heartbeat(session_id, connection_id, sender.clone());

        let mut channels = self.channels.write().await;
        channels.entry(session_id).or_default().insert(
            connection_id,
            Subscriber {
                sender,
                heartbeat: Some(heartbeat),
            },
        );

        log::debug!(
            "Connection {} subscribed to session {} ({} observers)",
            connection_id,
            session_id,
            channels.get(&session_id).map_or(0, HashMap::len)
        );

        connection_id
    }

    /// Deliver an event to every observer of a session
    ///
    /// Never fails: serialization problems are logged and subscribers that
    /// cannot take the frame are pruned.
    ///
    /// # Returns
    ///
    /// * `usize` - Number of subscribers the frame was queued for
    pub async fn publish<T: Serialize>(
        &self,
        session_id: SessionId,
        kind: EventKind,
        payload: &T,
    ) -> usize {
        let frame = match serde_json::to_value(payload)
            .and_then(|payload| EventEnvelope::new(kind, session_id, payload).to_json())
        {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Failed to serialize {} for session {}: {}", kind, session_id, e);
                return 0;
            }
        };

        let mut channels = self.channels.write().await;
        let Some(channel) = channels.get_mut(&session_id) else {
            return 0;
        };

        channel.retain(|connection_id, subscriber| {
            let delivered =
                !subscriber.sender.is_closed() && subscriber.sender.try_send(frame.clone()).is_ok();
            if !delivered {
                log::debug!(
                    "Pruning connection {} from session {} on {}",
                    connection_id,
                    session_id,
                    kind
                );
                subscriber.stop_heartbeat();
            }
            delivered
        });

        let delivered = channel.len();
        if delivered == 0 {
            channels.remove(&session_id);
        }

        delivered
    }

    /// Remove an observer and stop its heartbeat
    ///
    /// # Returns
    ///
    /// * `bool` - Whether the connection was registered
    pub async fn unsubscribe(&self, session_id: SessionId, connection_id: ConnectionId) -> bool {
        match self.detach(session_id, connection_id).await {
            Some(mut subscriber) => {
                subscriber.stop_heartbeat();
                true
            }
            None => false,
        }
    }

    /// Number of observers of a session
    pub async fn subscriber_count(&self, session_id: SessionId) -> usize {
        self.channels
            .read()
            .await
            .get(&session_id)
            .map_or(0, HashMap::len)
    }

    /// Number of sessions with at least one observer
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    async fn detach(
        &self,
        session_id: SessionId,
        connection_id: ConnectionId,
    ) -> Option<Subscriber> {
        let mut channels = self.channels.write().await;
        let channel = channels.get_mut(&session_id)?;
        let removed = channel.remove(&connection_id);
        if channel.is_empty() {
            channels.remove(&session_id);
        }
        if removed.is_some() {
            log::debug!(
                "Connection {} left session {}",
                connection_id,
                session_id
            );
        }
        removed
    }

    fn spawn_heartbeat(
        self: &Arc<Self>,
        session_id: SessionId,
        connection_id: ConnectionId,
        sender: mpsc::Sender<String>,
    ) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.heartbeat;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;

                let Some(registry) = registry.upgrade() else {
                    break;
                };

                let alive = match EventEnvelope::protocol(EventKind::Ping, session_id).to_json() {
                    Ok(ping) => sender.try_send(ping).is_ok(),
                    Err(_) => false,
                };

                if !alive {
                    log::debug!(
                        "Heartbeat failed for connection {} on session {}",
                        connection_id,
                        session_id
                    );
                    // Dropping our own handle detaches rather than aborts
                    drop(registry.detach(session_id, connection_id).await);
                    break;
                }
            }
        })
    }
}
