//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use game_night::db::{DatabaseConfig, config::DEFAULT_DATABASE_URL};
use std::{net::SocketAddr, time::Duration};

/// Minimum length of the shared API secret
pub const MIN_SECRET_LEN: usize = 16;

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Shared secret every organizer device presents
    pub api_secret: String,
    /// Realtime channel configuration
    pub realtime: RealtimeConfig,
    /// Prometheus exporter address, disabled when unset
    pub metrics_bind: Option<SocketAddr>,
}

/// Realtime channel settings
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Seconds between heartbeat pings
    pub heartbeat_secs: u64,
    /// Frames buffered per subscriber before it is dropped
    pub subscriber_buffer: usize,
}

impl RealtimeConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 25,
            subscriber_buffer: 64,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    ///
    /// # Returns
    ///
    /// * `Result<ServerConfig, ConfigError>` - Loaded configuration or error
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_addr("SERVER_BIND")?.unwrap_or(SocketAddr::from(([127, 0, 0, 1], 8080))),
        };

        let mut database = DatabaseConfig::from_env();
        database.database_url = database_url_override
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let api_secret =
            std::env::var("API_SHARED_SECRET").map_err(|_| ConfigError::MissingRequired {
                var: "API_SHARED_SECRET".to_string(),
                hint: "Generate with: openssl rand -hex 16".to_string(),
            })?;

        let defaults = RealtimeConfig::default();
        let realtime = RealtimeConfig {
            heartbeat_secs: parse_env_or("WS_HEARTBEAT_SECS", defaults.heartbeat_secs),
            subscriber_buffer: parse_env_or("WS_SUBSCRIBER_BUFFER", defaults.subscriber_buffer),
        };

        let config = ServerConfig {
            bind,
            database,
            api_secret,
            realtime,
            metrics_bind: parse_addr("METRICS_BIND")?,
        };
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// # Returns
    ///
    /// * `Result<(), ConfigError>` - Success or validation error
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: "API_SHARED_SECRET".to_string(),
                reason: format!("Must be at least {MIN_SECRET_LEN} characters"),
            });
        }

        if self.realtime.heartbeat_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "WS_HEARTBEAT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.realtime.subscriber_buffer == 0 {
            return Err(ConfigError::Invalid {
                var: "WS_SUBSCRIBER_BUFFER".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Cannot exceed DB_MAX_CONNECTIONS ({})",
                    self.database.max_connections
                ),
            });
        }

        if self.metrics_bind == Some(self.bind) {
            return Err(ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: "Must differ from SERVER_BIND".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Optional socket address; a set but malformed value is an error
fn parse_addr(key: &str) -> Result<Option<SocketAddr>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.parse().map(Some).map_err(|_| ConfigError::Invalid {
            var: key.to_string(),
            reason: format!("'{value}' is not a socket address"),
        }),
        Err(_) => Ok(None),
    }
}
