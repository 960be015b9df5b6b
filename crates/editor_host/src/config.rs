//! Host Configuration
//!
//! Defines the structure of the host's TOML configuration file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info};

use plugin_runtime::{AppState, InvokeConfig, RuntimeConfig, StateConfig};

/// Error type for host configuration and storage
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Runtime(#[from] plugin_runtime::RuntimeError),
}

/// Host configuration file (editor-host.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub invoke: InvokeConfig,
    #[serde(default)]
    pub state: HostStateConfig,
}

/// `[state]` table: runtime persistence keys plus host-only settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostStateConfig {
    #[serde(flatten)]
    pub runtime: StateConfig,

    /// JSON file backing persisted state keys
    pub store_path: Option<PathBuf>,

    /// Initial application state
    #[serde(default)]
    pub initial: toml::Table,
}

impl HostConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, HostError> {
        let config: Self = toml::from_str(content)?;
        if config.invoke.timeout_ms == 0 {
            return Err(HostError::Invalid(
                "invoke.timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(config)
    }

    /// Load from a file; a missing file yields the defaults
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No host config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded host config from {}", path.display());
        Ok(config)
    }

    /// The part of the configuration the plugin runtime consumes
    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            invoke: self.invoke.clone(),
            state: self.state.runtime.clone(),
        }
    }

    /// The configured initial state, as an application state snapshot
    pub fn initial_state(&self) -> Result<AppState, HostError> {
        let value = serde_json::to_value(&self.state.initial)?;
        match value {
            Value::Object(values) => Ok(AppState::new(values)),
            _ => Err(HostError::Invalid("state.initial must be a table".into())),
        }
    }
}
