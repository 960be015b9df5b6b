//! Runtime Errors
//!
//! A single error type covers registration, invocation and state propagation.

use std::time::Duration;

/// Message carried by [`RuntimeError::ReentrantStateUpdate`].
pub const REENTRANT_UPDATE_MESSAGE: &str =
    "State changes are not allowed during state update propagation";

/// Errors produced by the plugin runtime
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Invalid plugin: {0}")]
    InvalidPlugin(String),

    #[error("Plugin '{0}' is already registered")]
    DuplicateName(String),

    #[error("Plugin '{0}' not found")]
    PluginNotFound(String),

    #[error("Circular dependency detected: {}", .0.join(" → "))]
    CircularDependency(Vec<String>),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Plugin '{plugin}' failed at '{path}': {source}")]
    PluginInvocation {
        plugin: String,
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Plugin '{plugin}' timed out at '{path}' after {after:?}")]
    Timeout {
        plugin: String,
        path: String,
        after: Duration,
    },

    #[error("{}", REENTRANT_UPDATE_MESSAGE)]
    ReentrantStateUpdate,

    #[error("Application state has not been initialized")]
    StateNotInitialized,

    #[error("Application state has already been initialized")]
    StateAlreadyInitialized,

    #[error("Application has been dropped")]
    ApplicationDropped,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RuntimeError {
    /// Wrap an error returned by a plugin callable
    pub fn invocation(
        plugin: impl Into<String>,
        path: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self::PluginInvocation {
            plugin: plugin.into(),
            path: path.into(),
            source,
        }
    }

    /// Name of the plugin this error is attributed to, if any
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Self::PluginInvocation { plugin, .. } | Self::Timeout { plugin, .. } => Some(plugin),
            _ => None,
        }
    }
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;
