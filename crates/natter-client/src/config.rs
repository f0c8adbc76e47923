//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a front end can start the client
//! with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use natter_shared::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_PORT, HEARTBEAT_INTERVAL_SECS, MAX_FIELD_LEN,
};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Port appended to connect targets that do not name one.
    /// Env: `NATTER_PORT`
    /// Default: `4050`
    pub port: u16,

    /// Cache database file.
    /// Env: `NATTER_DB_PATH`
    /// Default: `None` (platform data directory).
    pub database_path: Option<PathBuf>,

    /// Upper bound on establishing the TCP connection.
    /// Env: `NATTER_CONNECT_TIMEOUT_SECS`
    /// Default: 10 s
    pub connect_timeout: Duration,

    /// Interval between heartbeats while connected.
    /// Env: `NATTER_HEARTBEAT_SECS`
    /// Default: 30 s
    pub heartbeat_interval: Duration,

    /// Largest string or blob field accepted from the server.
    /// Env: `NATTER_MAX_FIELD_LEN`
    /// Default: 16 MiB
    pub max_field_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_path: None,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            max_field_len: MAX_FIELD_LEN,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("NATTER_PORT") {
            match val.parse::<u16>() {
                Ok(port) if port != 0 => config.port = port,
                _ => tracing::warn!(value = %val, "Invalid NATTER_PORT, using default"),
            }
        }

        if let Some(path) = lookup("NATTER_DB_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = lookup("NATTER_CONNECT_TIMEOUT_SECS") {
            match parse_secs(&val) {
                Some(timeout) => config.connect_timeout = timeout,
                None => tracing::warn!(
                    value = %val,
                    "Invalid NATTER_CONNECT_TIMEOUT_SECS, using default"
                ),
            }
        }

        if let Some(val) = lookup("NATTER_HEARTBEAT_SECS") {
            match parse_secs(&val) {
                Some(interval) => config.heartbeat_interval = interval,
                None => tracing::warn!(value = %val, "Invalid NATTER_HEARTBEAT_SECS, using default"),
            }
        }

        if let Some(val) = lookup("NATTER_MAX_FIELD_LEN") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_field_len = n,
                _ => tracing::warn!(value = %val, "Invalid NATTER_MAX_FIELD_LEN, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    /// Configuration with the cache placed at `path`.
    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }
}

/// Whole, non-zero seconds.
fn parse_secs(val: &str) -> Option<Duration> {
    match val.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => None,
    }
}
