//! Shared-secret authentication for protected endpoints.
//!
//! Organizer devices present the configured `API_SHARED_SECRET` as a bearer
//! token. Comparison is constant-time.
//!
//! # Usage
//!
//! ```rust,no_run
//! use axum::{Router, routing::get, middleware};
//! # use gn_server::api::middleware::auth_middleware;
//! # use gn_server::api::AppState;
//! # async fn handler() {}
//! # let state: AppState = unimplemented!();
//!
//! let protected_routes: Router<AppState> = Router::new()
//!     .route("/api/protected", get(handler))
//!     .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
//! # let _ = protected_routes;
//! ```

use axum::{
    extract::{Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use super::AppState;
use crate::logging::log_security_event;

/// Whether `presented` equals the configured secret
pub fn secret_matches(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Authentication middleware validating the shared secret.
///
/// # Request Headers
///
/// ```text
/// Authorization: Bearer <API_SHARED_SECRET>
/// ```
///
/// # Behavior
///
/// - **Success**: Secret matches → Calls next handler
/// - **Missing header / invalid format / wrong secret**: Returns `401 Unauthorized`
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match token {
        Some(token) if secret_matches(&state.config.api_secret, token) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            log_security_event(
                "bad_secret",
                None,
                None,
                &format!("Rejected bearer token for {}", request.uri().path()),
            );
            Err(StatusCode::UNAUTHORIZED)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_matches() {
        assert!(secret_matches("0123456789abcdef", "0123456789abcdef"));
        assert!(!secret_matches("0123456789abcdef", "0123456789abcdeF"));
        assert!(!secret_matches("0123456789abcdef", "0123456789"));
        assert!(!secret_matches("0123456789abcdef", ""));
    }
}
