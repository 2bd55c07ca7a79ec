//! Tracker client configuration loading.
//!
//! TOML is the only config source.  A missing file at the default path
//! means built-in defaults; a missing file named explicitly is an error.
//! Default config path: `<user config dir>/sports-tracker/tracker.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//!
//! Everything else is optional:
//!
//! ```toml
//! schema_version = 1
//!
//! [server]
//! url = "ws://localhost:8888"
//!
//! [session]
//! username = "alice"
//!
//! [reconnect]
//! max_attempts = 5
//! delay_ms = 2000
//!
//! [calls]
//! timeout_ms = 10000
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transport::TransportConfig;

pub const DEFAULT_URL: &str = "ws://localhost:8888";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub schema_version: u32,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub reconnect: ReconnectConfig,
    pub calls: CallsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionConfig {
    /// Sent as `USER` right after connecting when set.
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallsConfig {
    pub timeout_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            server: ServerConfig {
                url: DEFAULT_URL.to_owned(),
            },
            session: SessionConfig::default(),
            reconnect: ReconnectConfig {
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            },
            calls: CallsConfig {
                timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            },
        }
    }
}

impl TrackerConfig {
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            url: self.server.url.clone(),
            max_attempts: self.reconnect.max_attempts,
            reconnect_delay: Duration::from_millis(self.reconnect.delay_ms),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.calls.timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    server: Option<RawServerConfig>,
    session: Option<RawSessionConfig>,
    reconnect: Option<RawReconnectConfig>,
    calls: Option<RawCallsConfig>,
}

#[derive(Debug, Deserialize)]
struct RawServerConfig {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSessionConfig {
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReconnectConfig {
    max_attempts: Option<u32>,
    delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawCallsConfig {
    timeout_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Default config file location, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sports-tracker").join("tracker.toml"))
}

/// Load config from an explicit path.  The file must exist.
pub fn load_config_from_path(path: &Path) -> Result<TrackerConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

/// Load config from the default path, or built-in defaults when no file
/// exists there.
pub fn load_config() -> Result<TrackerConfig, ConfigError> {
    match default_config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Ok(TrackerConfig::default()),
    }
}

/// Load config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<TrackerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let url = raw
        .server
        .and_then(|s| s.url)
        .unwrap_or_else(|| DEFAULT_URL.to_owned());
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(ConfigError::InvalidValue(format!(
            "server.url must start with ws:// or wss://, got '{url}'"
        )));
    }

    let username = raw.session.and_then(|s| s.username);
    if username.as_deref().is_some_and(|u| u.trim().is_empty()) {
        return Err(ConfigError::InvalidValue(
            "session.username must not be blank".to_owned(),
        ));
    }

    let reconnect = match raw.reconnect {
        Some(r) => ReconnectConfig {
            max_attempts: r.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            delay_ms: r.delay_ms.unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
        },
        None => ReconnectConfig {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        },
    };

    let timeout_ms = raw
        .calls
        .and_then(|c| c.timeout_ms)
        .unwrap_or(DEFAULT_CALL_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(ConfigError::InvalidValue(
            "calls.timeout_ms must be greater than 0".to_owned(),
        ));
    }

    Ok(TrackerConfig {
        schema_version,
        server: ServerConfig { url },
        session: SessionConfig { username },
        reconnect,
        calls: CallsConfig { timeout_ms },
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}
