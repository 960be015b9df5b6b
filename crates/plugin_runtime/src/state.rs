//! State Transitions
//!
//! Application state is an immutable snapshot of named top-level values. A
//! transition produces a new snapshot from a base snapshot and a set of
//! changes; the new snapshot remembers which keys changed and holds its base
//! so that earlier values can be inspected. Only one step of history is kept
//! alive: deriving from a snapshot demotes that snapshot's own link to its
//! predecessor to a weak one.
//!
//! Per-plugin data lives under the `ext` key, one object per plugin
//! namespace.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{Result, RuntimeError};

/// Top-level key holding per-plugin extension data
pub const EXT_KEY: &str = "ext";

/// Changes to merge into a state snapshot
pub type StateChanges = Map<String, Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

enum Previous {
    Strong(Arc<Snapshot>),
    Weak(Weak<Snapshot>),
}

struct HistoryLink {
    previous: Mutex<Previous>,
    changed: Vec<String>,
}

impl HistoryLink {
    fn previous(&self) -> Option<Arc<Snapshot>> {
        match &*self.previous.lock() {
            Previous::Strong(inner) => Some(Arc::clone(inner)),
            Previous::Weak(inner) => inner.upgrade(),
        }
    }

    /// Stop keeping the predecessor alive
    fn demote(&self) {
        let mut previous = self.previous.lock();
        if let Previous::Strong(inner) = &*previous {
            *previous = Previous::Weak(Arc::downgrade(inner));
        }
    }
}

struct Snapshot {
    values: Map<String, Value>,
    history: Option<HistoryLink>,
}

/// An immutable application state snapshot
///
/// Cloning is cheap and preserves identity; use [`AppState::ptr_eq`] to test
/// whether two handles refer to the same snapshot.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Snapshot>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Map::new())
    }
}

impl From<Map<String, Value>> for AppState {
    fn from(values: Map<String, Value>) -> Self {
        Self::new(values)
    }
}

impl AppState {
    /// Create a root snapshot with no history
    pub fn new(values: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(Snapshot {
                values,
                history: None,
            }),
        }
    }

    /// Create a root snapshot from a JSON object
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(values) => Ok(Self::new(values)),
            other => Err(RuntimeError::Config(format!(
                "application state must be an object, got {other}"
            ))),
        }
    }

    fn derived(values: Map<String, Value>, base: &AppState, changed: Vec<String>) -> Self {
        if let Some(link) = &base.inner.history {
            link.demote();
        }
        Self {
            inner: Arc::new(Snapshot {
                values,
                history: Some(HistoryLink {
                    previous: Mutex::new(Previous::Strong(Arc::clone(&base.inner))),
                    changed,
                }),
            }),
        }
    }

    /// Whether both handles refer to the same snapshot
    pub fn ptr_eq(a: &AppState, b: &AppState) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.values.get(key)
    }

    /// Look up a value by exact top-level key, then by dotted path
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.get(path) {
            return Some(value);
        }
        let mut segments = path.split('.');
        let mut current = self.get(segments.next()?)?;
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// Extension data of one plugin namespace
    pub fn ext(&self, namespace: &str) -> Option<&Map<String, Value>> {
        self.get(EXT_KEY)?.get(namespace)?.as_object()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.values.keys().map(String::as_str)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.inner.values
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.inner.values.clone())
    }

    // ── History ────────────────────────────────────────────────────────────

    /// Keys changed by the transition that produced this snapshot
    pub fn changed_keys(&self) -> &[String] {
        self.inner
            .history
            .as_ref()
            .map(|h| h.changed.as_slice())
            .unwrap_or(&[])
    }

    /// Whether any of `keys` changed in the transition that produced this
    /// snapshot; with no keys, whether anything changed at all
    pub fn has_changed(&self, keys: &[&str]) -> bool {
        let changed = self.changed_keys();
        if keys.is_empty() {
            return !changed.is_empty();
        }
        keys.iter().any(|k| changed.iter().any(|c| c == k))
    }

    /// The snapshot this one was derived from
    ///
    /// Always available for the newest snapshot of a chain. Once another
    /// snapshot is derived from this one, the predecessor survives only while
    /// something else holds it.
    pub fn previous(&self) -> Option<AppState> {
        let link = self.inner.history.as_ref()?;
        link.previous().map(|inner| AppState { inner })
    }

    /// Value of `key` in the previous snapshot
    pub fn previous_value(&self, key: &str) -> Option<Value> {
        self.previous()?.lookup(key).cloned()
    }
}

impl Serialize for AppState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.inner.values.serialize(serializer)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("values", &self.inner.values)
            .field("changed", &self.changed_keys())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transitions
// ─────────────────────────────────────────────────────────────────────────────

/// Result of applying changes to a snapshot
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: AppState,
    pub changed: Vec<String>,
}

impl Transition {
    /// True when nothing changed and `state` is the base snapshot itself
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Shallow-merge `changes` into a copy of `base`
///
/// Only keys whose value differs from `base` are reported as changed. When
/// nothing changes the base snapshot itself is returned.
pub fn apply_changes(base: &AppState, changes: StateChanges) -> Transition {
    let changed: Vec<String> = changes
        .iter()
        .filter(|(key, value)| base.get(key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect();

    if changed.is_empty() {
        return Transition {
            state: base.clone(),
            changed,
        };
    }

    let mut values = base.inner.values.clone();
    for (key, value) in changes {
        values.insert(key, value);
    }

    tracing::debug!(changed = ?changed, "State transition");
    Transition {
        state: AppState::derived(values, base, changed.clone()),
        changed,
    }
}

/// Shallow-merge `changes` into the extension data of `namespace`
///
/// Other namespaces are left untouched. Changed keys are reported qualified
/// as `ext.<namespace>.<key>`.
pub fn apply_extension_changes(
    base: &AppState,
    namespace: &str,
    changes: StateChanges,
) -> Transition {
    let current = base.ext(namespace);
    let changed: Vec<String> = changes
        .iter()
        .filter(|(key, value)| current.and_then(|ns| ns.get(*key)) != Some(*value))
        .map(|(key, _)| format!("{EXT_KEY}.{namespace}.{key}"))
        .collect();

    if changed.is_empty() {
        return Transition {
            state: base.clone(),
            changed,
        };
    }

    let mut ns = current.cloned().unwrap_or_default();
    for (key, value) in changes {
        ns.insert(key, value);
    }

    let mut ext = base
        .get(EXT_KEY)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    ext.insert(namespace.to_string(), Value::Object(ns));

    let mut values = base.inner.values.clone();
    values.insert(EXT_KEY.to_string(), Value::Object(ext));

    tracing::debug!(namespace, changed = ?changed, "Extension state transition");
    Transition {
        state: AppState::derived(values, base, changed.clone()),
        changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: Value) -> AppState {
        AppState::from_json(value).unwrap()
    }

    fn changes(value: Value) -> StateChanges {
        match value {
            Value::Object(map) => map,
            _ => panic!("changes must be an object"),
        }
    }

    #[test]
    fn test_empty_changes_return_same_snapshot() {
        let base = state(json!({"a": 1}));
        let t = apply_changes(&base, StateChanges::new());
        assert!(t.is_noop());
        assert!(AppState::ptr_eq(&t.state, &base));
    }

    #[test]
    fn test_identical_value_is_not_a_change() {
        let base = state(json!({"a": 1, "b": {"nested": true}}));
        let t = apply_changes(&base, changes(json!({"a": 1, "b": {"nested": true}})));
        assert!(t.changed.is_empty());
        assert!(AppState::ptr_eq(&t.state, &base));
    }

    #[test]
    fn test_changed_keys_and_merge() {
        let base = state(json!({"pdf": null, "xml": null}));
        let t = apply_changes(&base, changes(json!({"pdf": "x.pdf"})));

        assert_eq!(t.state.get("pdf"), Some(&json!("x.pdf")));
        assert_eq!(t.state.get("xml"), Some(&Value::Null));
        assert_eq!(t.changed, vec!["pdf".to_string()]);
        assert_eq!(t.state.changed_keys(), ["pdf".to_string()]);
        // base is untouched
        assert_eq!(base.get("pdf"), Some(&Value::Null));
    }

    #[test]
    fn test_previous_state_is_the_base() {
        let base = state(json!({"a": 0}));
        let t = apply_changes(&base, changes(json!({"a": 1})));

        let previous = t.state.previous().unwrap();
        assert!(AppState::ptr_eq(&previous, &base));
        assert_eq!(t.state.previous_value("a"), Some(json!(0)));
        assert!(base.previous().is_none());
    }

    #[test]
    fn test_previous_outlives_dropped_base() {
        let base = state(json!({"a": 0}));
        let next = apply_changes(&base, changes(json!({"a": 1}))).state;
        drop(base);

        let previous = next.previous().unwrap();
        assert_eq!(previous.get("a"), Some(&json!(0)));
        assert_eq!(next.previous_value("a"), Some(json!(0)));
        assert!(next.has_changed(&["a"]));
    }

    #[test]
    fn test_history_keeps_one_step_alive() {
        let first = state(json!({"a": 0}));
        let second = apply_changes(&first, changes(json!({"a": 1}))).state;
        let third = apply_changes(&second, changes(json!({"a": 2}))).state;
        drop(first);
        drop(second);

        let previous = third.previous().unwrap();
        assert_eq!(previous.get("a"), Some(&json!(1)));
        // the link from `second` to `first` was demoted when `third` was derived
        assert!(previous.previous().is_none());
        assert_eq!(previous.changed_keys(), ["a".to_string()]);
    }

    #[test]
    fn test_has_changed() {
        let base = state(json!({"a": 0, "b": 0}));
        let next = apply_changes(&base, changes(json!({"a": 1, "b": 0}))).state;

        assert!(next.has_changed(&["a"]));
        assert!(!next.has_changed(&["b"]));
        assert!(next.has_changed(&["b", "a"]));
        assert!(next.has_changed(&[]));
        assert!(!base.has_changed(&[]));
    }

    #[test]
    fn test_extension_changes_are_namespaced() {
        let base = state(json!({"ext": {"other": {"keep": 1}}, "user": "u"}));
        let t = apply_extension_changes(&base, "mine", changes(json!({"count": 1})));

        assert_eq!(t.changed, vec!["ext.mine.count".to_string()]);
        assert_eq!(t.state.ext("mine").unwrap().get("count"), Some(&json!(1)));
        assert_eq!(t.state.ext("other").unwrap().get("keep"), Some(&json!(1)));
        assert_eq!(t.state.get("user"), Some(&json!("u")));
        assert_eq!(t.state.lookup("ext.mine.count"), Some(&json!(1)));

        let again = apply_extension_changes(&t.state, "mine", changes(json!({"count": 1})));
        assert!(again.is_noop());
        assert!(AppState::ptr_eq(&again.state, &t.state));
    }

    #[test]
    fn test_extension_previous_value() {
        let base = AppState::default();
        let t = apply_extension_changes(&base, "p", changes(json!({"k": "v"})));
        assert_eq!(t.state.previous_value("ext.p.k"), None);

        let t2 = apply_extension_changes(&t.state, "p", changes(json!({"k": "w"})));
        assert_eq!(t2.state.previous_value("ext.p.k"), Some(json!("v")));
    }

    #[test]
    fn test_non_object_state_is_rejected() {
        assert!(AppState::from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let s = state(json!({"a": 1}));
        assert_eq!(serde_json::to_value(&s).unwrap(), json!({"a": 1}));
    }
}
