//! Runtime Configuration
//!
//! Defines the `[invoke]` and `[state]` tables read from a TOML file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Result, RuntimeError};

/// Runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub invoke: InvokeConfig,
    #[serde(default)]
    pub state: StateConfig,
}

/// Invocation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeConfig {
    /// Parallel batch timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Fail on the first error unless a call says otherwise
    #[serde(default)]
    pub fail_fast: bool,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            fail_fast: false,
        }
    }
}

impl InvokeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// State persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// Top-level keys mirrored to the persistence store
    #[serde(default)]
    pub persist: Vec<String>,
}

impl RuntimeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| RuntimeError::Config(e.to_string()))?;
        if config.invoke.timeout_ms == 0 {
            return Err(RuntimeError::Config(
                "invoke.timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(config)
    }

    /// Load configuration from a file; a missing file yields the defaults
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No runtime config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| RuntimeError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded runtime config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config.invoke.timeout(), Duration::from_millis(5000));
        assert!(!config.invoke.fail_fast);
        assert!(config.state.persist.is_empty());
    }

    #[test]
    fn test_parse_tables() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [invoke]
            timeout_ms = 250
            fail_fast = true

            [state]
            persist = ["xml", "pdf"]
            "#,
        )
        .unwrap();

        assert_eq!(config.invoke.timeout_ms, 250);
        assert!(config.invoke.fail_fast);
        assert_eq!(config.state.persist, vec!["xml", "pdf"]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("[invoke]\ntimeout_ms = \"soon\""),
            Err(RuntimeError::Config(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_toml_str("[invoke]\ntimeout_ms = 0"),
            Err(RuntimeError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let config = RuntimeConfig::load("/definitely/not/here.toml").await.unwrap();
        assert_eq!(config.invoke.timeout_ms, 5000);
    }
}
