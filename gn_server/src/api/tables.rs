//! Table, hand and round handlers.
//!
//! # Examples
//!
//! Record a hand:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/tables/7/hands \
//!   -H "Authorization: Bearer SECRET" \
//!   -H "Content-Type: application/json" \
//!   -d '{"pair_1_score": 30, "start_time": "2025-03-01T20:10:00Z"}'
//! ```
//!
//! Finalize a table:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/tables/7/finalize \
//!   -H "Authorization: Bearer SECRET" \
//!   -H "Content-Type: application/json" \
//!   -d '{"games_won_pair1": 1, "games_won_pair2": 0}'
//! ```

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use game_night::{
    Hand, HandPatch, HandSpec, PairScores, Partida, PartidaSnapshot, TableDetail, TableSpec,
    game::{FinalizeOutcome, HandId, SessionId, TableId},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{AppState, error::ApiError};
use crate::logging::log_database_operation;

/// Won-game increments credited by a finalize
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FinalizeRequest {
    #[serde(default)]
    pub games_won_pair1: i32,
    #[serde(default)]
    pub games_won_pair2: i32,
}

/// Open a table in a session.
///
/// # Errors
///
/// - `404 Not Found`: Session doesn't exist
/// - `409 Conflict`: Table number already used, or session closed
/// - `400 Bad Request`: Target below 100 or a player seated twice
pub async fn add_table(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(spec): Json<TableSpec>,
) -> Result<(StatusCode, Json<TableDetail>), ApiError> {
    let table = state.games.add_table(session_id, spec).await?;
    Ok((StatusCode::CREATED, Json(table)))
}

pub async fn get_table(
    State(state): State<AppState>,
    Path(table_id): Path<TableId>,
) -> Result<Json<TableDetail>, ApiError> {
    Ok(Json(state.games.get_table(table_id).await?))
}

/// Write both pair scores and apply won-game deltas.
pub async fn update_pair_scores(
    State(state): State<AppState>,
    Path(table_id): Path<TableId>,
    Json(scores): Json<PairScores>,
) -> Result<Json<TableDetail>, ApiError> {
    Ok(Json(state.games.update_pair_scores(table_id, scores).await?))
}

/// Finish a table, closing its open round.
pub async fn finalize_table(
    State(state): State<AppState>,
    Path(table_id): Path<TableId>,
    Json(request): Json<FinalizeRequest>,
) -> Result<Json<FinalizeOutcome>, ApiError> {
    let started = Instant::now();
    let outcome = state
        .games
        .finalize_table(table_id, request.games_won_pair1, request.games_won_pair2)
        .await?;
    log_database_operation(
        "finalize_table",
        "table",
        started.elapsed().as_millis() as u64,
    );

    Ok(Json(outcome))
}

/// Remove a table that has no progress yet.
///
/// # Errors
///
/// - `404 Not Found`: Table doesn't exist
/// - `409 Conflict`: Table already has hands, scores or won games
pub async fn cancel_table(
    State(state): State<AppState>,
    Path(table_id): Path<TableId>,
) -> Result<StatusCode, ApiError> {
    state.games.cancel_table(table_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Record a hand, numbering it when no number is given.
///
/// # Errors
///
/// - `404 Not Found`: Table doesn't exist
/// - `409 Conflict`: Hand number already used at this table
/// - `400 Bad Request`: Both pairs scored
pub async fn add_hand(
    State(state): State<AppState>,
    Path(table_id): Path<TableId>,
    Json(spec): Json<HandSpec>,
) -> Result<(StatusCode, Json<Hand>), ApiError> {
    let started = Instant::now();
    let hand = state.games.add_hand(table_id, spec).await?;
    log_database_operation("add_hand", "hand", started.elapsed().as_millis() as u64);

    Ok((StatusCode::CREATED, Json(hand)))
}

pub async fn get_hand(
    State(state): State<AppState>,
    Path(hand_id): Path<HandId>,
) -> Result<Json<Hand>, ApiError> {
    Ok(Json(state.games.get_hand(hand_id).await?))
}

pub async fn update_hand(
    State(state): State<AppState>,
    Path(hand_id): Path<HandId>,
    Json(patch): Json<HandPatch>,
) -> Result<Json<Hand>, ApiError> {
    Ok(Json(state.games.update_hand(hand_id, patch).await?))
}

pub async fn list_partidas(
    State(state): State<AppState>,
    Path(table_id): Path<TableId>,
) -> Result<Json<Vec<Partida>>, ApiError> {
    Ok(Json(state.games.list_partidas(table_id).await?))
}

pub async fn list_snapshots(
    State(state): State<AppState>,
    Path(table_id): Path<TableId>,
) -> Result<Json<Vec<PartidaSnapshot>>, ApiError> {
    Ok(Json(state.games.list_snapshots(table_id).await?))
}
