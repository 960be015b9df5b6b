//! State Persistence
//!
//! Selected top-level state keys can be mirrored to a host-provided store on
//! every committed transition and restored when state is initialized.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::state::{apply_changes, AppState, Transition};

/// Durable key/value storage supplied by the host
pub trait StateStore: Send + Sync + 'static {
    /// Persist the current value of a state key
    fn save(&self, key: &str, value: &Value) -> anyhow::Result<()>;

    /// Load a previously persisted value
    fn load(&self, key: &str) -> anyhow::Result<Option<Value>>;
}

/// Store that keeps values in memory for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.clone())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl StateStore for MemoryStore {
    fn save(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.get(key))
    }
}

/// Mirrors a fixed set of state keys to a [`StateStore`]
#[derive(Clone)]
pub struct Persistence {
    keys: Vec<String>,
    store: Arc<dyn StateStore>,
}

impl Persistence {
    pub fn new(keys: Vec<String>, store: Arc<dyn StateStore>) -> Self {
        Self { keys, store }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Overlay persisted values onto an initial state
    pub fn restore(&self, state: &AppState) -> Transition {
        let mut restored = Map::new();
        for key in &self.keys {
            match self.store.load(key) {
                Ok(Some(value)) => {
                    restored.insert(key.clone(), value);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "Failed to restore state key"),
            }
        }
        apply_changes(state, restored)
    }

    /// Save every persisted key of `state`
    pub fn mirror_all(&self, state: &AppState) {
        for key in &self.keys {
            self.save(key, state);
        }
    }

    /// Save the persisted keys touched by `changed`
    ///
    /// A changed path counts for the top-level key it starts with, so
    /// `ext.<namespace>.<key>` saves a persisted `ext`.
    pub fn mirror(&self, state: &AppState, changed: &[String]) {
        for key in self.keys.iter().filter(|k| changed.iter().any(|c| touches(c, k))) {
            self.save(key, state);
        }
    }

    fn save(&self, key: &str, state: &AppState) {
        let value = state.get(key).cloned().unwrap_or(Value::Null);
        if let Err(e) = self.store.save(key, &value) {
            tracing::warn!(key, error = %e, "Failed to persist state key");
        }
    }
}

/// Whether the changed path `changed` is `key` or lies beneath it
fn touches(changed: &str, key: &str) -> bool {
    changed
        .strip_prefix(key)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence").field("keys", &self.keys).finish()
    }
}
