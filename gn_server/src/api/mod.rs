//! HTTP/WebSocket API for the game-night server.
//!
//! A thin transport over [`GameManager`] and [`AttendanceLedger`]: every
//! engine operation gets one route, and session observers subscribe through
//! a WebSocket fed by the shared [`EventDistributor`].
//!
//! # Modules
//!
//! - [`sessions`]: Session upsert/read/delete and anecdotes
//! - [`tables`]: Tables, pair scores, hands and rounds
//! - [`attendance`]: Check-in/out, bench and minute analytics
//! - [`websocket`]: Realtime session channel
//! - [`middleware`]: Shared-secret authentication
//! - [`request_id`]: Request correlation
//!
//! # Endpoints Overview
//!
//! ```text
//! GET    /health                                  - Health check (public)
//! POST   /api/v1/sessions                         - Create or update a session
//! GET    /api/v1/sessions/active                  - Currently active session
//! GET    /api/v1/sessions/{id}                    - Session with tables and anecdotes
//! DELETE /api/v1/sessions/{id}                    - Delete session and dependents
//! POST   /api/v1/sessions/{id}/tables             - Add a table
//! POST   /api/v1/sessions/{id}/anecdotes          - Add an anecdote
//! GET    /api/v1/sessions/{id}/attendance         - Records and bench
//! POST   /api/v1/sessions/{id}/attendance/check-in
//! POST   /api/v1/sessions/{id}/attendance/check-out
//! POST   /api/v1/sessions/{id}/attendance/backfill
//! GET    /api/v1/sessions/{id}/attendance/minutes - Playing/bench minutes
//! GET    /api/v1/tables/{id}                      - Table with pairs and hands
//! PUT    /api/v1/tables/{id}/scores               - Write pair scores
//! POST   /api/v1/tables/{id}/finalize             - Finish the table
//! POST   /api/v1/tables/{id}/cancel               - Remove an untouched table
//! POST   /api/v1/tables/{id}/hands                - Record a hand
//! GET    /api/v1/tables/{id}/partidas             - Rounds of a table
//! GET    /api/v1/tables/{id}/snapshots            - Round result snapshots
//! GET    /api/v1/hands/{id}                       - Read a hand
//! PATCH  /api/v1/hands/{id}                       - Partially update a hand
//! PUT    /api/v1/anecdotes/{id}                   - Rewrite an anecdote
//! DELETE /api/v1/anecdotes/{id}                   - Remove an anecdote
//! GET    /ws/sessions/{id}?token=<secret>         - Realtime channel
//! ```
//!
//! Every `/api/v1` route requires `Authorization: Bearer <API_SHARED_SECRET>`.

pub mod attendance;
pub mod error;
pub mod middleware;
pub mod request_id;
pub mod sessions;
pub mod tables;
pub mod websocket;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post, put},
};
use game_night::{AttendanceLedger, EventDistributor, GameManager};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;

pub use error::{ApiError, ErrorResponse};

/// Application state shared across all HTTP handlers and WebSocket connections.
///
/// Cloned for each request; every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub games: Arc<GameManager>,
    pub attendance: Arc<AttendanceLedger>,
    pub events: Arc<EventDistributor>,
    pub pool: Arc<PgPool>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Build the managers around one pool and one distributor
    pub fn new(pool: Arc<PgPool>, config: ServerConfig) -> Self {
        let events = Arc::new(EventDistributor::new(config.realtime.heartbeat()));
        Self {
            games: Arc::new(GameManager::new(pool.clone(), events.clone())),
            attendance: Arc::new(AttendanceLedger::new(pool.clone(), events.clone())),
            events,
            pool,
            config: Arc::new(config),
        }
    }
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Example
///
/// ```rust,no_run
/// # use gn_server::api::{create_router, AppState};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let state: AppState = unimplemented!();
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    // WebSocket route handles its own auth via query parameter
    let root_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ws/sessions/{session_id}", get(websocket::websocket_handler));

    Router::new()
        .merge(root_routes)
        .nest("/api/v1", v1_routes)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Create API v1 router; every route sits behind the shared-secret check.
fn create_v1_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/sessions", post(sessions::upsert_session))
        .route("/sessions/active", get(sessions::get_active_session))
        .route(
            "/sessions/{session_id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/sessions/{session_id}/tables", post(tables::add_table))
        .route("/sessions/{session_id}/anecdotes", post(sessions::add_anecdote))
        .route(
            "/sessions/{session_id}/attendance",
            get(attendance::get_attendance),
        )
        .route(
            "/sessions/{session_id}/attendance/check-in",
            post(attendance::check_in),
        )
        .route(
            "/sessions/{session_id}/attendance/check-out",
            post(attendance::check_out),
        )
        .route(
            "/sessions/{session_id}/attendance/backfill",
            post(attendance::backfill),
        )
        .route(
            "/sessions/{session_id}/attendance/minutes",
            get(attendance::minutes),
        )
        .route("/tables/{table_id}", get(tables::get_table))
        .route("/tables/{table_id}/scores", put(tables::update_pair_scores))
        .route("/tables/{table_id}/finalize", post(tables::finalize_table))
        .route("/tables/{table_id}/cancel", post(tables::cancel_table))
        .route("/tables/{table_id}/hands", post(tables::add_hand))
        .route("/tables/{table_id}/partidas", get(tables::list_partidas))
        .route("/tables/{table_id}/snapshots", get(tables::list_snapshots))
        .route(
            "/hands/{hand_id}",
            get(tables::get_hand).patch(tables::update_hand),
        )
        .route(
            "/anecdotes/{anecdote_id}",
            put(sessions::update_anecdote).delete(sessions::delete_anecdote),
        )
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth_middleware,
        ))
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when the database answers, `503 Service Unavailable`
/// otherwise, with the number of open realtime channels.
///
/// # Example
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","database":true,"realtime":{"channels":1},"timestamp":"2025-03-01T20:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_healthy = sqlx::query("SELECT 1")
        .fetch_one(&*state.pool)
        .await
        .is_ok();

    let channels = state.events.channel_count().await;

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if db_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": db_healthy,
        "realtime": {
            "channels": channels
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
