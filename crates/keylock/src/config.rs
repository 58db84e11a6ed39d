//! keylock configuration.
//!
//! Configuration is loaded from environment variables. The store URL may
//! embed credentials and is redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default lease attached to a lock, in seconds.
pub const DEFAULT_LEASE_SECONDS: u64 = 30;

/// Log output format for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// keylock configuration.
#[derive(Clone)]
pub struct Config {
    /// Store connection URL (e.g., `redis://localhost:6379`).
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: SecretString,

    /// Lease used when the caller does not pass one (default: 30s).
    pub default_lease: Duration,

    /// Log format (default: text).
    pub log_format: LogFormat,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("default_lease", &self.default_lease)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(
            vars.get("REDIS_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?
                .clone(),
        );

        let lease_seconds = match vars.get("KEYLOCK_LEASE_SECONDS") {
            Some(raw) => parse_lease_seconds(raw)?,
            None => DEFAULT_LEASE_SECONDS,
        };

        let log_format = match vars.get("KEYLOCK_LOG_FORMAT").map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "KEYLOCK_LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )))
            }
        };

        Ok(Config {
            redis_url,
            default_lease: Duration::from_secs(lease_seconds),
            log_format,
        })
    }
}

/// Parse a lease in whole seconds; zero is rejected since every lock entry
/// must expire.
pub fn parse_lease_seconds(raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue(
            "KEYLOCK_LEASE_SECONDS must be greater than zero".to_string(),
        )),
        Ok(seconds) => Ok(seconds),
        Err(e) => Err(ConfigError::InvalidValue(format!(
            "KEYLOCK_LEASE_SECONDS must be an integer: {e}"
        ))),
    }
}
