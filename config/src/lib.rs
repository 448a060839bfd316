//! Configuration loading for Chorus.
//!
//! The config file lives at `~/.chorus/config.toml`:
//!
//! ```toml
//! [client]
//! base_url = "http://localhost:5000"
//! models = ["deepseek", "llama", "glm", "qwen"]
//! synthesize = true
//! connect_timeout_secs = 30
//!
//! [persistence]
//! debounce_ms = 60
//! data_dir = "${HOME}/.local/share/chorus"
//! model_slots = 4
//! ```
//!
//! Every key is optional. String values support `${VAR}` environment
//! expansion.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";
pub const DEFAULT_MODELS: [&str; 4] = ["deepseek", "llama", "glm", "qwen"];
pub const DEFAULT_DEBOUNCE_MS: u64 = 60;
pub const DEFAULT_MODEL_SLOTS: usize = 4;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

const fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_models() -> Vec<String> {
    DEFAULT_MODELS.iter().map(ToString::to_string).collect()
}

const fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

const fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

const fn default_model_slots() -> usize {
    DEFAULT_MODEL_SLOTS
}

#[derive(Debug, Default, Deserialize)]
pub struct ChorusConfig {
    pub client: Option<ClientConfig>,
    pub persistence: Option<PersistenceConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Where and how to reach the ask-many-models service.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model keys sent with every request.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Ask the service for a cross-model synthesis.
    #[serde(default = "default_true")]
    pub synthesize: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            models: default_models(),
            synthesize: true,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Base URL with `${VAR}` references expanded and trailing slashes removed.
    #[must_use]
    pub fn base_url(&self) -> String {
        expand_env_vars(&self.base_url)
            .trim_end_matches('/')
            .to_string()
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Window between the first scheduled transcript write and its commit.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    pub data_dir: Option<String>,
    /// Number of numbered model slots in the stored chat record.
    #[serde(default = "default_model_slots")]
    pub model_slots: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            data_dir: None,
            model_slots: DEFAULT_MODEL_SLOTS,
        }
    }
}

impl PersistenceConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Configured data directory, or the platform data dir joined with `chorus`.
    #[must_use]
    pub fn data_dir(&self) -> Option<PathBuf> {
        match &self.data_dir {
            Some(dir) => Some(PathBuf::from(expand_env_vars(dir))),
            None => dirs::data_dir().map(|dir| dir.join("chorus")),
        }
    }
}

/// Expand `${VAR}` references. Unset variables expand to the empty string;
/// an unterminated `${` is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    out
}

impl ChorusConfig {
    /// Load `~/.chorus/config.toml`. A missing file is `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    #[must_use]
    pub fn client(&self) -> ClientConfig {
        self.client.clone().unwrap_or_default()
    }

    #[must_use]
    pub fn persistence(&self) -> PersistenceConfig {
        self.persistence.clone().unwrap_or_default()
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".chorus").join("config.toml"))
}
