//! Mapping of engine errors to HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use game_night::GameError;
use serde::{Deserialize, Serialize};

use super::request_id::FailureDetail;

/// JSON body of every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

/// Engine error on its way to the client
#[derive(Debug)]
pub struct ApiError(pub GameError);

impl From<GameError> for ApiError {
    fn from(err: GameError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    /// Status code and stable kind string for the error
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            GameError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            GameError::Conflict(kind) => (StatusCode::CONFLICT, kind.code()),
            GameError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            GameError::Database(_) | GameError::Migration(_) | GameError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();

        let body = ErrorResponse {
            error: self.0.client_message(),
            kind: kind.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if status.is_server_error() {
            // Logged with the request id by the correlation middleware
            response
                .extensions_mut()
                .insert(FailureDetail(self.0.to_string()));
        }
        response
    }
}
