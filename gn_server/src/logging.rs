//! Structured logging configuration.
//!
//! The engine crate logs through the `log` facade; the subscriber installed
//! here captures those records alongside the server's own `tracing` events.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging
///
/// Log levels come from `RUST_LOG`, defaulting to `info` with `sqlx` and
/// `hyper` turned down to warnings.
///
/// # Example
///
/// ```no_run
/// use gn_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log security event with structured data
///
/// # Arguments
///
/// * `event_type` - Type of security event
/// * `session_id` - Session the request targeted, if any
/// * `ip_address` - Optional IP address
/// * `message` - Event message
///
/// # Example
///
/// ```
/// use gn_server::logging::log_security_event;
///
/// log_security_event(
///     "bad_secret",
///     Some(12),
///     Some("192.168.1.1"),
///     "Rejected WebSocket token"
/// );
/// ```
pub fn log_security_event(
    event_type: &str,
    session_id: Option<i64>,
    ip_address: Option<&str>,
    message: &str,
) {
    tracing::warn!(
        event_type = event_type,
        session_id = session_id,
        ip_address = ip_address,
        "SECURITY: {}",
        message
    );
}

/// Log database operation
///
/// Slow operations (over 100ms) are additionally reported as warnings.
///
/// # Arguments
///
/// * `operation` - Engine operation name
/// * `entity` - Entity touched
/// * `duration_ms` - Duration in milliseconds
pub fn log_database_operation(operation: &str, entity: &str, duration_ms: u64) {
    tracing::debug!(
        operation = operation,
        entity = entity,
        duration_ms = duration_ms,
        "Database operation"
    );

    if duration_ms > 100 {
        tracing::warn!(
            operation = operation,
            entity = entity,
            duration_ms = duration_ms,
            "Slow database operation detected"
        );
    }
}

/// Log API request/response
///
/// # Arguments
///
/// * `method` - HTTP method
/// * `path` - Request path
/// * `status_code` - Response status code
/// * `duration_ms` - Request duration in milliseconds
/// * `request_id` - Correlation id of the request
pub fn log_api_request(
    method: &str,
    path: &str,
    status_code: u16,
    duration_ms: u64,
    request_id: &str,
) {
    tracing::info!(
        request_id = request_id,
        http_method = method,
        http_path = path,
        http_status = status_code,
        duration_ms = duration_ms,
        "API request completed"
    );
}
