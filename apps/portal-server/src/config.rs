//! Server configuration.
//!
//! Read from environment variables:
//!
//! ```bash
//! PORTAL_JWT_SECRET=...            # required, HMAC secret for bearer tokens
//! PORTAL_TOKEN_TTL_HOURS=24        # token lifetime
//! PORTAL_UPLOAD_DIR=uploads        # root directory of the local blob store
//! PORTAL_AVATAR_MAX_BYTES=5242880  # avatar size cap (5 MiB)
//! ```
//!
//! The database URL is not part of this struct; the CLI takes it from
//! `DATABASE_URL` / `--database-url`.

use std::env;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_AVATAR_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub upload_dir: PathBuf,
    pub avatar_max_bytes: usize,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

impl ServerConfig {
    /// Defaults for everything but the secret.
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            avatar_max_bytes: DEFAULT_AVATAR_MAX_BYTES,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = env::var("PORTAL_JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("PORTAL_JWT_SECRET".to_string()))?;

        let mut config = Self::with_secret(jwt_secret);

        if let Some(hours) = parse_var::<i64>("PORTAL_TOKEN_TTL_HOURS")? {
            if hours < 1 {
                return Err(ConfigError::InvalidValue {
                    var: "PORTAL_TOKEN_TTL_HOURS".to_string(),
                    value: hours.to_string(),
                });
            }
            config.token_ttl_hours = hours;
        }
        if let Ok(dir) = env::var("PORTAL_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(max) = parse_var::<usize>("PORTAL_AVATAR_MAX_BYTES")? {
            config.avatar_max_bytes = max;
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
