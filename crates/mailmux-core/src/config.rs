//! Sidecar configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Socket path used when nothing else is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/email-app.sock";

/// Longest request line accepted by default. Fits a base64 `send` of a
/// 100 MiB message.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 256 * 1024 * 1024;

/// Runtime configuration. Missing keys in a config file take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Unix socket to listen on.
    pub socket_path: PathBuf,
    /// Permission bits applied to the socket file.
    pub socket_mode: u32,
    /// Per-action deadline in seconds. `None` or `0` disables it.
    pub command_timeout: Option<u64>,
    /// Seconds each resident session gets to log out at shutdown.
    pub shutdown_grace: u64,
    /// Longest request line, in bytes, a caller may send.
    pub max_request_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            socket_mode: 0o600,
            command_timeout: None,
            shutdown_grace: 5,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

impl Config {
    /// `<config dir>/mailmux/config.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mailmux")
            .join("config.json")
    }

    /// Reads a JSON config file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not valid JSON.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Reads [`Config::default_path`], falling back to defaults if it does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub async fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path).await
    }

    /// Per-action deadline, if enabled.
    #[must_use]
    pub fn command_deadline(&self) -> Option<Duration> {
        self.command_timeout
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    /// Logout grace period at shutdown.
    #[must_use]
    pub const fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }
}
