//! Plugin Registry
//!
//! Holds registered plugin records in registration order, the dependency
//! order derived from them, and a per-path cache of the plugins that qualify
//! for an endpoint. Every registration change recomputes the order and clears
//! the cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, RuntimeError};
use crate::namespace::split_path;
use crate::plugin::{PluginRecord, PluginSource};
use crate::resolver::dependency_order;

/// Path that selects every plugin regardless of its members
pub const ALL_PLUGINS: &str = ".";

/// Ordered list of plugins qualifying for one path
pub type PluginList = Arc<[Arc<PluginRecord>]>;

/// Registry of plugin records
#[derive(Default)]
pub struct Registry {
    /// Records in registration order
    records: Vec<Arc<PluginRecord>>,

    /// Records in dependency order
    order: Vec<Arc<PluginRecord>>,

    /// Qualifying plugins per endpoint path
    cache: Mutex<HashMap<String, PluginList>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin
    ///
    /// The dependency order is recomputed immediately; a registration that
    /// would introduce a cycle is rolled back.
    pub fn register(&mut self, source: impl Into<PluginSource>) -> Result<Arc<PluginRecord>> {
        let record = Arc::new(source.into().into_record()?);

        if self.contains(record.name()) {
            return Err(RuntimeError::DuplicateName(record.name().to_string()));
        }

        self.records.push(Arc::clone(&record));
        match dependency_order(&self.records) {
            Ok(order) => self.order = order,
            Err(e) => {
                self.records.pop();
                return Err(e);
            }
        }
        self.cache.lock().clear();

        tracing::info!(plugin = %record.name(), deps = ?record.deps(), "Registered plugin");
        Ok(record)
    }

    /// Remove a plugin by name
    pub fn unregister(&mut self, name: &str) -> Result<Arc<PluginRecord>> {
        let idx = self
            .records
            .iter()
            .position(|r| r.name() == name)
            .ok_or_else(|| RuntimeError::PluginNotFound(name.to_string()))?;

        let record = self.records.remove(idx);
        self.order = dependency_order(&self.records)?;
        self.cache.lock().clear();

        tracing::info!(plugin = %name, "Unregistered plugin");
        Ok(record)
    }

    pub fn get(&self, name: &str) -> Option<Arc<PluginRecord>> {
        self.records.iter().find(|r| r.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.name() == name)
    }

    /// Records in dependency order
    pub fn order(&self) -> &[Arc<PluginRecord>] {
        &self.order
    }

    /// Names in registration order
    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Plugins qualifying for `path`, in dependency order
    ///
    /// A plugin qualifies when all of its declared dependencies are
    /// registered and, unless `path` is [`ALL_PLUGINS`], the path resolves
    /// to a member of the plugin.
    pub fn plugins_for(&self, path: &str) -> Result<PluginList> {
        if path != ALL_PLUGINS {
            split_path(path)?;
        }

        if let Some(list) = self.cache.lock().get(path) {
            return Ok(Arc::clone(list));
        }

        let list: PluginList = self
            .order
            .iter()
            .filter(|r| self.has_all_deps(r))
            .filter(|r| path == ALL_PLUGINS || r.resolve(path).is_some())
            .cloned()
            .collect();

        self.cache
            .lock()
            .insert(path.to_string(), Arc::clone(&list));
        Ok(list)
    }

    fn has_all_deps(&self, record: &PluginRecord) -> bool {
        let missing: Vec<&str> = record
            .deps()
            .iter()
            .filter(|d| !self.contains(d))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            return true;
        }
        tracing::warn!(
            plugin = %record.name(),
            missing = ?missing,
            "Plugin excluded: missing dependencies"
        );
        false
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("plugins", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Call;
    use serde_json::{json, Value};

    fn plain(name: &str, deps: &[&str]) -> PluginSource {
        PluginRecord::builder(name)
            .deps(deps.iter().copied())
            .handler("start", |_call: Call| async { Ok(Value::Null) })
            .into()
    }

    fn names(list: &PluginList) -> Vec<&str> {
        list.iter().map(|r| r.name()).collect()
    }

    #[test]
    fn test_register_and_order() {
        let mut registry = Registry::new();
        registry.register(plain("a", &["b"])).unwrap();
        registry.register(plain("b", &["c"])).unwrap();
        registry.register(plain("c", &[])).unwrap();

        let order: Vec<&str> = registry.order().iter().map(|r| r.name()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
        assert_eq!(registry.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut registry = Registry::new();
        registry.register(plain("a", &[])).unwrap();
        assert!(matches!(
            registry.register(plain("a", &[])),
            Err(RuntimeError::DuplicateName(name)) if name == "a"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cycle_is_rejected_and_rolled_back() {
        let mut registry = Registry::new();
        registry.register(plain("A", &["B"])).unwrap();
        registry.register(plain("B", &["C"])).unwrap();

        let err = registry.register(plain("C", &["A"])).unwrap_err();
        assert_eq!(err.to_string(), "Circular dependency detected: A → B → C → A");
        assert!(!registry.contains("C"));

        // registry is still usable
        registry.register(plain("C", &[])).unwrap();
        assert_eq!(registry.order().len(), 3);
    }

    #[test]
    fn test_unregister() {
        let mut registry = Registry::new();
        registry.register(plain("a", &[])).unwrap();
        assert_eq!(registry.plugins_for("start").unwrap().len(), 1);

        registry.unregister("a").unwrap();
        assert!(registry.is_empty());
        assert!(registry.plugins_for("start").unwrap().is_empty());
        assert!(matches!(
            registry.unregister("a"),
            Err(RuntimeError::PluginNotFound(_))
        ));
    }

    #[test]
    fn test_missing_dependency_excludes_plugin() {
        let mut registry = Registry::new();
        registry.register(plain("orphan", &["ghost"])).unwrap();
        registry.register(plain("ok", &[])).unwrap();

        assert_eq!(names(&registry.plugins_for("start").unwrap()), vec!["ok"]);
        assert_eq!(names(&registry.plugins_for(ALL_PLUGINS).unwrap()), vec!["ok"]);
        assert_eq!(registry.order().len(), 2);
    }

    #[test]
    fn test_late_dependency_includes_plugin_again() {
        let mut registry = Registry::new();
        registry.register(plain("orphan", &["ghost"])).unwrap();
        assert!(registry.plugins_for("start").unwrap().is_empty());

        registry.register(plain("ghost", &[])).unwrap();
        assert_eq!(
            names(&registry.plugins_for("start").unwrap()),
            vec!["ghost", "orphan"]
        );
    }

    #[test]
    fn test_path_must_resolve() {
        let mut registry = Registry::new();
        registry
            .register(PluginRecord::builder("meta").value("info.version", json!(1)))
            .unwrap();
        registry.register(plain("other", &[])).unwrap();

        assert_eq!(names(&registry.plugins_for("info.version").unwrap()), vec!["meta"]);
        assert_eq!(names(&registry.plugins_for("start").unwrap()), vec!["other"]);
        assert!(registry.plugins_for("nothing.here").unwrap().is_empty());
        assert!(matches!(
            registry.plugins_for(""),
            Err(RuntimeError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_cache_is_reused_until_registry_changes() {
        let mut registry = Registry::new();
        registry.register(plain("a", &[])).unwrap();

        let first = registry.plugins_for("start").unwrap();
        let second = registry.plugins_for("start").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        registry.register(plain("b", &[])).unwrap();
        let third = registry.plugins_for("start").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.len(), 2);
    }
}
