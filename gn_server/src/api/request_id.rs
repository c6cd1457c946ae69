//! Request correlation for the HTTP API.
//!
//! Organizer devices may send their own `x-request-id`; otherwise one is
//! minted per request. The id is echoed on the response and stamped on the
//! access log line and on the log line of any internal failure, so a client
//! report of a 500 can be matched to the server-side error it hides.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use uuid::Uuid;

use crate::{logging::log_api_request, metrics};

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest client-supplied id that is echoed back
const MAX_CLIENT_ID_LEN: usize = 64;

/// Internal error text attached to a failed response
///
/// Set by [`ApiError`](super::error::ApiError) for server errors and consumed
/// here, so the detail reaches the log with the request id but never the
/// client.
#[derive(Clone, Debug)]
pub struct FailureDetail(pub String);

/// Client id when it is short printable ASCII, a fresh UUID otherwise
fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_CLIENT_ID_LEN
                && id.bytes().all(|b| b.is_ascii_graphic())
        })
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Tag the request and its response with a correlation id
///
/// Also records the access log line and the request metrics.
pub async fn request_id_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let request_id = request_id_from(request.headers());
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let (mut parts, body) = response.into_parts();
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, header_value);
    }

    let status = parts.status.as_u16();
    if let Some(FailureDetail(detail)) = parts.extensions.remove::<FailureDetail>() {
        log::error!(
            "Request {} ({} {}) failed with {}: {}",
            request_id,
            method,
            path,
            status,
            detail
        );
    }

    let elapsed = started.elapsed();
    log_api_request(&method, &path, status, elapsed.as_millis() as u64, &request_id);
    metrics::http_requests_total(&method, &path, status);
    metrics::http_request_duration_ms(&method, &path, elapsed.as_secs_f64() * 1000.0);

    Ok(Response::from_parts(parts, body))
}
