//! WebSocket handler for the realtime session channel.
//!
//! Observers of a session receive every committed change as a JSON frame
//! `{"type": ..., "sessionId": ..., "ts": ..., "payload": ...}`, starting with
//! `READY` and followed by periodic `PING` heartbeats.
//!
//! # Connection Flow
//!
//! 1. Client connects via `GET /ws/sessions/{id}?token=<secret>`
//! 2. Server checks the shared secret and upgrades
//! 3. A bounded queue is registered with the [`EventDistributor`]; a send
//!    task forwards its frames to the socket
//! 4. When the client goes away or the distributor drops the queue, the
//!    connection is unsubscribed
//!
//! Client frames are read only to notice disconnects; their content is ignored.
//!
//! # Example
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8080/ws/sessions/3?token=SECRET');
//!
//! ws.onmessage = (event) => {
//!   const frame = JSON.parse(event.data);
//!   if (frame.type === 'HAND_ADDED') {
//!     refreshTable(frame.payload.table_id);
//!   }
//! };
//! ```
//!
//! [`EventDistributor`]: game_night::EventDistributor

use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use game_night::game::SessionId;
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::{AppState, middleware::secret_matches};
use crate::{logging::log_security_event, metrics};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

/// Upgrade HTTP connection to a WebSocket subscribed to one session.
///
/// # Query Parameters
///
/// - `token`: Shared API secret
///
/// # Response
///
/// On success, upgrades connection to WebSocket protocol (101 Switching Protocols).
/// On authentication failure, returns `401 Unauthorized`.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<SessionId>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    if !secret_matches(&state.config.api_secret, &query.token) {
        log_security_event(
            "bad_secret",
            Some(session_id),
            None,
            "Rejected WebSocket token",
        );
        return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

/// Handle an established WebSocket connection.
///
/// Runs until either side finishes: the client closing (or erroring) ends
/// the receive loop; the distributor dropping the queue ends the send task.
async fn handle_socket(socket: WebSocket, session_id: SessionId, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (frame_tx, mut frame_rx) =
        mpsc::channel::<String>(state.config.realtime.subscriber_buffer);
    let connection_id = state.events.subscribe(session_id, frame_tx).await;

    metrics::websocket_connected();
    info!(
        "WebSocket connected: session={}, connection={}",
        session_id, connection_id
    );

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
            metrics::events_forwarded_total(session_id);
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(text)) => {
                    debug!("Ignoring client frame on session {}: {}", session_id, text.as_str());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error on session {}: {}", session_id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.events.unsubscribe(session_id, connection_id).await;
    metrics::websocket_disconnected();

    info!(
        "WebSocket disconnected: session={}, connection={}",
        session_id, connection_id
    );
}
