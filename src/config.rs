//! Config module.
//! Loads memochess.json (service endpoint, poll interval, webcam, players).
//! Uses serde for JSON serialization; a missing file means defaults.
//! Environment variables (MEMOCHESS_* prefix) override file values, and
//! command-line flags override both (applied in main).

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::record::PgnHeaders;
use crate::synchronizer::SyncConfig;

pub const DEFAULT_CONFIG_FILE: &str = "memochess.json";
const ENV_PREFIX: &str = "MEMOCHESS";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid endpoint_base '{0}': expected an http(s) URL such as http://127.0.0.1:5000")]
    BadEndpoint(String),

    #[error("poll_interval_ms must be greater than zero")]
    ZeroInterval,

    #[error("request_timeout_secs must be greater than zero")]
    ZeroTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the vision service.
    pub endpoint_base: String,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// IP-camera address forwarded to the vision service.
    pub webcam_url: String,
    pub event: String,
    pub white_player: String,
    pub black_player: String,
    /// Where `pgn` writes the game record.
    pub pgn_path: PathBuf,
    /// Debug: save every camera frame here as PNG.
    pub frame_dump_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint_base: "http://127.0.0.1:5000".to_string(),
            poll_interval_ms: 2000,
            request_timeout_secs: 10,
            webcam_url: String::new(),
            event: "MemoChess".to_string(),
            white_player: String::new(),
            black_player: String::new(),
            pgn_path: PathBuf::from("game.pgn"),
            frame_dump_dir: None,
        }
    }
}

impl Config {
    /// Config file location: `MEMOCHESS_CONFIG` or `./memochess.json`.
    pub fn default_path() -> PathBuf {
        std::env::var_os(format!("{ENV_PREFIX}_CONFIG"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Loads from `path` (defaults if absent), then applies env overrides and validates.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}_{key}")).ok());
    }

    /// Applies overrides from a key lookup; unparsable numbers are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup("ENDPOINT") {
            self.endpoint_base = endpoint;
        }
        if let Some(ms) = lookup("POLL_INTERVAL_MS").and_then(|v| v.trim().parse().ok()) {
            self.poll_interval_ms = ms;
        }
        if let Some(secs) = lookup("REQUEST_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()) {
            self.request_timeout_secs = secs;
        }
        if let Some(webcam) = lookup("WEBCAM") {
            self.webcam_url = webcam;
        }
        if let Some(dir) = lookup("FRAME_DIR").filter(|d| !d.is_empty()) {
            self.frame_dump_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.endpoint_base)
            .map_err(|_| ConfigError::BadEndpoint(self.endpoint_base.clone()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::BadEndpoint(self.endpoint_base.clone()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            endpoint_base: self.endpoint_base.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            webcam: self.webcam_url.clone(),
            frame_dump_dir: self.frame_dump_dir.clone(),
        }
    }

    pub fn pgn_headers(&self) -> PgnHeaders {
        PgnHeaders {
            event: self.event.clone(),
            white: self.white_player.clone(),
            black: self.black_player.clone(),
        }
    }
}
