//! Client Configuration
//!
//! Defines how the client reaches the platform backend:
//! - Backend base URL (HTTP API)
//! - Real-time task update channel (WebSocket)
//! - Result polling cadence and tolerance
//! - Where the bearer credential is persisted between runs

use crate::error::{AionError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Backend used when nothing else is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Socket.IO endpoint path on the backend
const PUSH_PATH: &str = "socket.io/";
const PUSH_QUERY: &str = "EIO=4&transport=websocket";

/// Complete client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend base URL
    pub api_url: String,
    /// Explicit WebSocket URL for task updates (derived from `api_url` when unset)
    pub push_url: Option<String>,
    /// Subscribe to pushed task updates (polling alone when false)
    pub push_enabled: bool,
    /// Result polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Consecutive poll failures tolerated before a task is failed
    pub max_poll_failures: u32,
    /// Credential file location (platform config dir when unset)
    pub credentials_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            push_url: None,
            push_enabled: true,
            poll_interval_ms: 1000,
            request_timeout_secs: 10,
            max_poll_failures: 5,
            credentials_path: None,
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables on top of the defaults
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Load a TOML config file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AionError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: ClientConfig = toml::from_str(&raw)
            .map_err(|e| AionError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        debug!("Loaded client config from {}", path.display());
        Ok(config.with_env())
    }

    /// Overlay `AION_*` environment variables
    pub fn with_env(mut self) -> Self {
        if let Ok(url) = std::env::var("AION_API_URL") {
            self.api_url = url;
        }
        if let Ok(url) = std::env::var("AION_PUSH_URL") {
            self.push_url = Some(url);
        }
        if let Ok(value) = std::env::var("AION_DISABLE_PUSH") {
            // Any value other than an explicit "false"/"0" disables push
            let disable = !matches!(value.to_lowercase().as_str(), "false" | "0");
            self.push_enabled = !disable;
        }
        if let Some(ms) = parse_env::<u64>("AION_POLL_INTERVAL_MS") {
            self.poll_interval_ms = ms;
        }
        if let Some(secs) = parse_env::<u64>("AION_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = secs;
        }
        if let Some(max) = parse_env::<u32>("AION_MAX_POLL_FAILURES") {
            self.max_poll_failures = max;
        }
        if let Ok(path) = std::env::var("AION_CREDENTIALS_PATH") {
            self.credentials_path = Some(PathBuf::from(path));
        }
        self
    }

    /// Check that the config can be used to build a client
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        self.push_endpoint()?;
        if self.poll_interval_ms == 0 {
            return Err(AionError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed backend base URL
    pub fn base_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| AionError::Config(format!("Invalid api_url '{}': {}", self.api_url, e)))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(AionError::Config(format!(
                    "api_url must be http or https, got '{}'",
                    other
                )))
            }
        }
        // Endpoints are joined relative to the base, which needs a trailing slash
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// WebSocket endpoint of the task update channel
    pub fn push_endpoint(&self) -> Result<Url> {
        if let Some(explicit) = &self.push_url {
            return Url::parse(explicit)
                .map_err(|e| AionError::Config(format!("Invalid push_url '{}': {}", explicit, e)));
        }

        let mut url = self
            .base_url()?
            .join(PUSH_PATH)
            .map_err(|e| AionError::Config(format!("Cannot derive push URL: {}", e)))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| AionError::Config(format!("Cannot derive push URL from {}", self.api_url)))?;
        url.set_query(Some(PUSH_QUERY));
        Ok(url)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolved credential file path
    pub fn credentials_file(&self) -> PathBuf {
        if let Some(path) = &self.credentials_path {
            return path.clone();
        }
        dirs::config_dir()
            .map(|dir| dir.join("aion"))
            .unwrap_or_else(|| PathBuf::from(".aion"))
            .join("credentials.json")
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}: cannot parse '{}'", key, raw);
            None
        }
    }
}
