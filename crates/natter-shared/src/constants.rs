/// Application name
pub const APP_NAME: &str = "natter";

/// Default TCP port of a natter server
pub const DEFAULT_PORT: u16 = 4050;

/// Largest string or blob field accepted from the wire (16 MiB)
pub const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

/// Interval between client heartbeats while connected, in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Upper bound on establishing the TCP connection, in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Database file name inside the platform data directory
pub const DB_FILE_NAME: &str = "natter.db";
