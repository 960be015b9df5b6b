//! Plugin Context
//!
//! The narrow view of the application that plugin code receives. It can
//! update state, inspect transitions and invoke endpoints, but never touches
//! the registry directly.

use std::sync::{Arc, Weak};

use serde_json::Value;

use super::Application;
use crate::endpoint::Args;
use crate::error::{Result, RuntimeError};
use crate::invoke::{InvokeOptions, InvokeOutput};
use crate::state::{AppState, StateChanges};

/// Application facade scoped to one plugin
///
/// Holds the application weakly, so a context stored inside a plugin does
/// not keep the application alive.
#[derive(Clone)]
pub struct PluginContext {
    plugin: String,
    app: Weak<Application>,
}

impl PluginContext {
    pub(super) fn new(plugin: String, app: Weak<Application>) -> Self {
        Self { plugin, app }
    }

    /// Name of the plugin this context belongs to
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    fn app(&self) -> Result<Arc<Application>> {
        self.app.upgrade().ok_or(RuntimeError::ApplicationDropped)
    }

    pub fn current_state(&self) -> Result<AppState> {
        self.app()?.current_state()
    }

    /// Merge top-level changes into the application state
    pub async fn update_state(&self, changes: StateChanges) -> Result<AppState> {
        let app = self.app()?;
        app.update_state(changes).await
    }

    /// Merge changes into this plugin's extension data
    pub async fn update_state_ext(&self, changes: StateChanges) -> Result<AppState> {
        let app = self.app()?;
        app.update_state_ext(&self.plugin, changes).await
    }

    /// Invoke an endpoint across all qualifying plugins
    pub async fn invoke(
        &self,
        path: &str,
        args: impl Into<Args>,
        options: InvokeOptions,
    ) -> Result<InvokeOutput> {
        let app = self.app()?;
        app.plugins().invoke(path, args, options).await
    }

    // ── Transition Inspection ──────────────────────────────────────────────

    pub fn has_changed(&self, state: &AppState, keys: &[&str]) -> bool {
        state.has_changed(keys)
    }

    pub fn changed_keys<'s>(&self, state: &'s AppState) -> &'s [String] {
        state.changed_keys()
    }

    pub fn previous_state(&self, state: &AppState) -> Option<AppState> {
        state.previous()
    }

    pub fn previous_value(&self, state: &AppState, key: &str) -> Option<Value> {
        state.previous_value(key)
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.plugin)
            .field("attached", &(self.app.strong_count() > 0))
            .finish()
    }
}
