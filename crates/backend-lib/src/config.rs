// ============================
// presence-backend-lib/src/config.rs
// ============================
//! Configuration management.
use crate::error::AppError;
use axum::http::HeaderValue;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "presence.toml";
/// Prefix of environment overrides, e.g. `PRESENCE_BIND_ADDR`
pub const ENV_PREFIX: &str = "PRESENCE_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Log level
    pub log_level: String,
    /// Close a WebSocket after this long without any inbound frame or pong
    pub idle_timeout_secs: u64,
    /// Server ping period; must be shorter than the idle timeout
    pub ping_interval_secs: u64,
    /// Per-connection outbound queue length
    pub outbound_queue_capacity: usize,
    /// Origins allowed by CORS; empty allows any origin
    pub allowed_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            log_level: "info".to_string(),
            idle_timeout_secs: 120,
            ping_interval_secs: 30,
            outbound_queue_capacity: 32,
            allowed_origins: Vec::new(),
        }
    }
}

impl Settings {
    /// Load from `presence.toml` (if present) and `PRESENCE_*` env vars
    pub fn load() -> Result<Self, AppError> {
        Self::extract(Toml::file(DEFAULT_CONFIG_FILE))
    }

    /// Load from the given TOML file, which must exist, and `PRESENCE_*` env vars
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(AppError::Config(format!(
                "config file '{}' not found",
                path.display()
            )));
        }
        Self::extract(Toml::file(path))
    }

    fn extract(file: figment::providers::Data<Toml>) -> Result<Self, AppError> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "unknown log level '{}'",
                self.log_level
            )));
        }
        if self.idle_timeout_secs == 0 {
            return Err(AppError::Config(
                "idle_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.ping_interval_secs == 0 || self.ping_interval_secs >= self.idle_timeout_secs {
            return Err(AppError::Config(
                "ping_interval_secs must be between zero and idle_timeout_secs".to_string(),
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(AppError::Config(
                "outbound_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if let Some(origin) = self
            .allowed_origins
            .iter()
            .find(|origin| HeaderValue::from_str(origin).is_err())
        {
            return Err(AppError::Config(format!("invalid origin '{origin}'")));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}
