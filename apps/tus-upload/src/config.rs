//! Client configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/tusclient/client.toml`
//! - Windows: `%APPDATA%/tusclient/client.toml`
//!
//! Command-line flags override every value here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tusclient_protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_REQUEST_PAYLOAD_SIZE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Creation URL used when `--endpoint` is not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_payload_size")]
    pub payload_size: usize,

    /// Concurrent uploads (default: number of CPUs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Resume store file (default: `~/.config/tusclient/resume.json`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_store: Option<PathBuf>,

    /// Per-request timeout in seconds. Unset means no timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub checksum: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_payload_size() -> usize {
    DEFAULT_REQUEST_PAYLOAD_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            chunk_size: default_chunk_size(),
            payload_size: default_payload_size(),
            workers: None,
            resume_store: None,
            timeout_secs: None,
            headers: HashMap::new(),
            checksum: false,
        }
    }
}

impl Config {
    /// Loads `explicit` if given (it must exist), otherwise the default
    /// path, writing a default file there when none exists yet.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        let Some(path) = config_path() else {
            tracing::debug!("no configuration directory, using defaults");
            return Ok(Self::default());
        };
        if path.exists() {
            return Self::load_from(&path);
        }

        let config = Self::default();
        if let Err(e) = config.save(&path) {
            tracing::warn!(path = %path.display(), error = %e, "could not write default configuration");
        }
        Ok(config)
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        let config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Headers may carry credentials.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".config").join("tusclient").join("client.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|appdata| PathBuf::from(appdata).join("tusclient").join("client.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".config").join("tusclient").join("client.toml"))
    }
}
