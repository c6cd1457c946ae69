//! Attendance handlers.
//!
//! Check a player in (the time defaults to now):
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/sessions/3/attendance/check-in \
//!   -H "Authorization: Bearer SECRET" \
//!   -H "Content-Type: application/json" \
//!   -d '{"player_id": 42}'
//! ```

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use game_night::{
    attendance::{AttendanceOverview, AttendanceRecord, BackfillReport, PlayerMinutes},
    game::{PlayerId, SessionId},
};
use serde::{Deserialize, Serialize};

use super::{AppState, error::ApiError};

/// Check-in or check-out of one player
#[derive(Debug, Serialize, Deserialize)]
pub struct AttendanceRequest {
    pub player_id: PlayerId,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

/// Check a player into a session.
///
/// # Errors
///
/// - `404 Not Found`: Session doesn't exist
/// - `409 Conflict`: Player already checked in, or session closed
pub async fn check_in(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<AttendanceRequest>,
) -> Result<Json<AttendanceRecord>, ApiError> {
    let record = state
        .attendance
        .check_in(session_id, request.player_id, request.at)
        .await?;
    Ok(Json(record))
}

/// Check a player out of a session.
///
/// # Errors
///
/// - `400 Bad Request`: Player not checked in, or time before the check-in
pub async fn check_out(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<AttendanceRequest>,
) -> Result<Json<AttendanceRecord>, ApiError> {
    let record = state
        .attendance
        .check_out(session_id, request.player_id, request.at)
        .await?;
    Ok(Json(record))
}

/// Close every forgotten check-out of a session.
pub async fn backfill(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<BackfillReport>, ApiError> {
    Ok(Json(
        state.attendance.backfill_missing_checkouts(session_id).await?,
    ))
}

pub async fn get_attendance(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<AttendanceOverview>, ApiError> {
    Ok(Json(state.attendance.get_by_game(session_id).await?))
}

pub async fn minutes(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<Vec<PlayerMinutes>>, ApiError> {
    Ok(Json(
        state.attendance.playing_and_bench_minutes(session_id).await?,
    ))
}
