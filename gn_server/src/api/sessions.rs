//! Session and anecdote handlers.
//!
//! # Examples
//!
//! Open tonight's session:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/sessions \
//!   -H "Authorization: Bearer SECRET" \
//!   -H "Content-Type: application/json" \
//!   -d '{"date": "2025-03-01T19:00:00Z", "status": "active"}'
//! ```

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use game_night::{
    GameSession, SessionPayload,
    game::{Anecdote, AnecdoteId, AnecdoteSpec, SessionDetail, SessionId},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{AppState, error::ApiError};
use crate::logging::log_database_operation;

#[derive(Debug, Serialize, Deserialize)]
pub struct UpsertResponse {
    pub id: SessionId,
}

/// Create or update a session, synchronizing nested collections.
///
/// # Errors
///
/// - `404 Not Found`: Payload references a row of another session
/// - `409 Conflict`: Another session is already active, or duplicate numbers
/// - `400 Bad Request`: Invalid nested data
pub async fn upsert_session(
    State(state): State<AppState>,
    Json(payload): Json<SessionPayload>,
) -> Result<Json<UpsertResponse>, ApiError> {
    let started = Instant::now();
    let id = state.games.upsert_session(payload).await?;
    log_database_operation(
        "upsert_session",
        "session",
        started.elapsed().as_millis() as u64,
    );

    Ok(Json(UpsertResponse { id }))
}

/// The active session, or `null` when none is active.
pub async fn get_active_session(
    State(state): State<AppState>,
) -> Result<Json<Option<GameSession>>, ApiError> {
    Ok(Json(state.games.get_active_session().await?))
}

/// Full structure of a session.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<SessionDetail>, ApiError> {
    Ok(Json(state.games.get_session_detail(session_id).await?))
}

/// Delete a session and everything hanging off it.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
    let started = Instant::now();
    state.games.delete_session(session_id).await?;
    log_database_operation(
        "delete_session",
        "session",
        started.elapsed().as_millis() as u64,
    );

    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_anecdote(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(spec): Json<AnecdoteSpec>,
) -> Result<(StatusCode, Json<Anecdote>), ApiError> {
    let anecdote = state.games.add_anecdote(session_id, spec).await?;
    Ok((StatusCode::CREATED, Json(anecdote)))
}

pub async fn update_anecdote(
    State(state): State<AppState>,
    Path(anecdote_id): Path<AnecdoteId>,
    Json(spec): Json<AnecdoteSpec>,
) -> Result<Json<Anecdote>, ApiError> {
    Ok(Json(state.games.update_anecdote(anecdote_id, spec).await?))
}

pub async fn delete_anecdote(
    State(state): State<AppState>,
    Path(anecdote_id): Path<AnecdoteId>,
) -> Result<StatusCode, ApiError> {
    state.games.delete_anecdote(anecdote_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
