//! Configuration module for uptrail.
//!
//! Loads process configuration from environment variables with sensible defaults.
//! The monitor definitions themselves live in a separate document, see [`crate::monitor`].

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the read API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "uptrail.db")
    pub db_path: String,
    /// Path to the monitor definitions (default: "uptrail.toml")
    pub config_path: String,
    /// How long shutdown waits for in-flight probes (default: 10s)
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "uptrail.db".to_string(),
            config_path: "uptrail.toml".to_string(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPTRAIL_HTTP_PORT`: HTTP port (default: 8080)
    /// - `UPTRAIL_DB_PATH`: Database file path (default: "uptrail.db")
    /// - `UPTRAIL_CONFIG`: Monitor definitions path (default: "uptrail.toml")
    /// - `UPTRAIL_SHUTDOWN_TIMEOUT`: Shutdown deadline in seconds (default: 10)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port_str) = lookup("UPTRAIL_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Some(db_path) = lookup("UPTRAIL_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(config_path) = lookup("UPTRAIL_CONFIG") {
            cfg.config_path = config_path;
        }

        if let Some(secs) = lookup("UPTRAIL_SHUTDOWN_TIMEOUT") {
            if let Ok(secs) = secs.parse() {
                cfg.shutdown_timeout = Duration::from_secs(secs);
            }
        }

        cfg
    }
}
