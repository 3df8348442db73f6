//! Server configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a config file path is given and exists, parse it as JSON
//!    (missing fields keep their defaults)
//! 3. Apply `PULSE_*` environment variable overrides (highest priority)
//!
//! Env vars have strict parsing rules: out-of-range or unparsable values
//! are silently ignored, falling back to the file/default value.

use std::path::{Path, PathBuf};

use pulse_core::generator::DEFAULT_LOSS_PROBABILITY;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The config file is not valid JSON for [`ServerConfig`].
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },
}

/// Configuration for the Pulse server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `3000`; `0` for auto-assign).
    pub port: u16,
    /// Generator tick period in milliseconds (default `1000`).
    pub tick_interval_ms: u64,
    /// Per-tick probability of simulated packet loss (default `0.02`).
    pub loss_probability: f64,
    /// Per-client outbound queue capacity; a client whose queue is full
    /// fails its send and is evicted (default `32`).
    pub send_queue_capacity: usize,
    /// Reconnect delay advertised to SSE clients in milliseconds
    /// (default `3000`).
    pub sse_retry_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            tick_interval_ms: 1000,
            loss_probability: DEFAULT_LOSS_PROBABILITY,
            send_queue_capacity: 32,
            sse_retry_ms: 3000,
        }
    }
}

impl ServerConfig {
    /// Load configuration with env var overrides applied.
    ///
    /// A missing file is not an error; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                debug!(?path, "loading config from file");
                let content = std::fs::read_to_string(path).map_err(|source| {
                    ConfigError::Read {
                        path: path.to_owned(),
                        source,
                    }
                })?;
                serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_owned(),
                    source,
                })?
            }
            Some(path) => {
                debug!(?path, "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `PULSE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_string("PULSE_HOST") {
            self.host = v;
        }
        if let Some(v) = read_env_u64("PULSE_PORT", 0, u64::from(u16::MAX)) {
            self.port = u16::try_from(v).unwrap_or(self.port);
        }
        if let Some(v) = read_env_u64("PULSE_TICK_INTERVAL_MS", 1, 3_600_000) {
            self.tick_interval_ms = v;
        }
        if let Some(v) = read_env_f64("PULSE_LOSS_PROBABILITY", 0.0, 1.0) {
            self.loss_probability = v;
        }
        if let Some(v) = read_env_u64("PULSE_SEND_QUEUE_CAPACITY", 1, 65_536) {
            self.send_queue_capacity = usize::try_from(v).unwrap_or(self.send_queue_capacity);
        }
        if let Some(v) = read_env_u64("PULSE_SSE_RETRY_MS", 0, 3_600_000) {
            self.sse_retry_ms = v;
        }
    }

    /// Generator tick period.
    #[must_use]
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms)
    }

    /// SSE reconnect hint.
    #[must_use]
    pub fn sse_retry(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sse_retry_ms)
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    std::env::var(name)
        .ok()?
        .parse::<u64>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

fn read_env_f64(name: &str, min: f64, max: f64) -> Option<f64> {
    std::env::var(name)
        .ok()?
        .parse::<f64>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}
