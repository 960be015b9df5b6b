//! Plugins
//!
//! A plugin is registered either as a plain record built from named members,
//! or as an instance of a type implementing [`Plugin`]. Both forms are
//! resolved once, at registration, into a [`PluginRecord`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::endpoint::{endpoint, Call, Endpoint};
use crate::error::{Result, RuntimeError};
use crate::namespace::{Namespace, Node};
use crate::state::AppState;

/// Endpoint names driven by the application lifecycle
pub const INSTALL: &str = "install";
pub const START: &str = "start";
pub const SHUTDOWN: &str = "shutdown";

/// Flat map from dotted path to endpoint
pub type EndpointMap = BTreeMap<String, Arc<dyn Endpoint>>;

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Base abstraction for plugins implemented as Rust types
///
/// The lifecycle hooks default to no-ops. Additional endpoints are returned
/// from [`Plugin::endpoints`] as a flat map of dotted paths; an entry for
/// `install`, `start` or `shutdown` replaces the corresponding hook.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Unique plugin name
    fn name(&self) -> &str;

    /// Names of plugins that must come before this one
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called once with the initial application state
    async fn install(&self, _state: AppState) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once all plugins are installed
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the application shuts down
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Additional endpoints keyed by dotted path
    fn endpoints(self: Arc<Self>) -> EndpointMap {
        EndpointMap::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Record
// ─────────────────────────────────────────────────────────────────────────────

/// A registered plugin: its name, dependencies and member tree
pub struct PluginRecord {
    name: String,
    deps: Vec<String>,
    namespace: Arc<Namespace>,
}

impl PluginRecord {
    /// Start building a plain record
    pub fn builder(name: impl Into<String>) -> RecordBuilder {
        RecordBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deps(&self) -> &[String] {
        &self.deps
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    /// Walk a dotted path on this record
    pub fn resolve(&self, path: &str) -> Option<(Arc<Namespace>, Node)> {
        self.namespace.resolve(path)
    }

    /// Flatten a [`Plugin`] instance into a record
    fn from_plugin(plugin: Arc<dyn Plugin>) -> Result<Self> {
        let mut endpoints = Arc::clone(&plugin).endpoints();

        endpoints
            .entry(INSTALL.to_string())
            .or_insert_with(|| hook(&plugin, |p, call| async move {
                let state = call.state(0).cloned().unwrap_or_default();
                p.install(state).await
            }));
        endpoints
            .entry(START.to_string())
            .or_insert_with(|| hook(&plugin, |p, _call| async move { p.start().await }));
        endpoints
            .entry(SHUTDOWN.to_string())
            .or_insert_with(|| hook(&plugin, |p, _call| async move { p.shutdown().await }));

        let mut builder = RecordBuilder::new(plugin.name()).deps(plugin.dependencies());
        for (path, endpoint) in endpoints {
            builder = builder.endpoint(path, endpoint);
        }
        builder.build()
    }
}

/// Bind a lifecycle hook of `plugin` as an endpoint
fn hook<F, Fut>(plugin: &Arc<dyn Plugin>, f: F) -> Arc<dyn Endpoint>
where
    F: Fn(Arc<dyn Plugin>, Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let plugin = Arc::clone(plugin);
    endpoint(move |call: Call| {
        let fut = f(Arc::clone(&plugin), call);
        async move {
            fut.await?;
            Ok(Value::Null)
        }
    })
}

impl std::fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRecord")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .field("namespace", &self.namespace)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for plain plugin records
pub struct RecordBuilder {
    name: String,
    deps: Vec<String>,
    members: Vec<(String, Node)>,
}

impl RecordBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deps: Vec::new(),
            members: Vec::new(),
        }
    }

    /// Add a single dependency
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.deps.push(name.into());
        self
    }

    /// Add several dependencies
    pub fn deps<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps.extend(names.into_iter().map(Into::into));
        self
    }

    /// Expose an endpoint at a dotted path
    pub fn endpoint(mut self, path: impl Into<String>, endpoint: Arc<dyn Endpoint>) -> Self {
        self.members.push((path.into(), Node::Endpoint(endpoint)));
        self
    }

    /// Expose a closure as an endpoint at a dotted path
    pub fn handler<F, Fut>(self, path: impl Into<String>, func: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.endpoint(path, endpoint(func))
    }

    /// Expose a static value at a dotted path
    pub fn value(mut self, path: impl Into<String>, value: Value) -> Self {
        self.members.push((path.into(), Node::Value(value)));
        self
    }

    /// Validate and assemble the record
    ///
    /// Dependencies are de-duplicated in declaration order.
    pub fn build(self) -> Result<PluginRecord> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(RuntimeError::InvalidPlugin("plugin name must not be empty".into()));
        }

        let mut deps: Vec<String> = Vec::with_capacity(self.deps.len());
        for dep in self.deps {
            let dep = dep.trim();
            if dep.is_empty() {
                return Err(RuntimeError::InvalidPlugin(format!(
                    "plugin '{name}' declares an empty dependency name"
                )));
            }
            if !deps.iter().any(|d| d == dep) {
                deps.push(dep.to_string());
            }
        }

        let mut namespace = Namespace::new();
        for (path, node) in self.members {
            namespace.insert(&path, node).map_err(|e| match e {
                RuntimeError::InvalidEndpoint(msg) | RuntimeError::InvalidPlugin(msg) => {
                    RuntimeError::InvalidPlugin(format!("plugin '{name}': {msg}"))
                }
                other => other,
            })?;
        }

        Ok(PluginRecord {
            name: name.to_string(),
            deps,
            namespace: Arc::new(namespace),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Source
// ─────────────────────────────────────────────────────────────────────────────

/// The two accepted plugin shapes
pub enum PluginSource {
    Record(RecordBuilder),
    Instance(Arc<dyn Plugin>),
}

impl PluginSource {
    pub fn instance(plugin: impl Plugin) -> Self {
        Self::Instance(Arc::new(plugin))
    }

    /// Resolve into a registered record
    pub fn into_record(self) -> Result<PluginRecord> {
        match self {
            PluginSource::Record(builder) => builder.build(),
            PluginSource::Instance(plugin) => PluginRecord::from_plugin(plugin),
        }
    }
}

impl From<RecordBuilder> for PluginSource {
    fn from(builder: RecordBuilder) -> Self {
        Self::Record(builder)
    }
}

impl From<Arc<dyn Plugin>> for PluginSource {
    fn from(plugin: Arc<dyn Plugin>) -> Self {
        Self::Instance(plugin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct CountingPlugin {
        starts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        fn name(&self) -> &str {
            "counter"
        }

        fn dependencies(&self) -> Vec<String> {
            vec!["log".into(), "log".into()]
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn endpoints(self: Arc<Self>) -> EndpointMap {
            let mut map = EndpointMap::new();
            map.insert(
                "count.get".into(),
                endpoint(move |_call: Call| {
                    let starts = self.starts.load(Ordering::SeqCst);
                    async move { Ok(json!(starts)) }
                }),
            );
            map
        }
    }

    fn call(record: &PluginRecord, path: &str) -> (Arc<dyn Endpoint>, Call) {
        let (receiver, node) = record.resolve(path).unwrap();
        let Node::Endpoint(endpoint) = node else {
            panic!("{path} is not an endpoint");
        };
        let call = Call {
            plugin: record.name().to_string(),
            path: path.to_string(),
            receiver,
            args: Vec::new(),
            cancel: CancellationToken::new(),
        };
        (endpoint, call)
    }

    #[tokio::test]
    async fn test_instance_is_flattened_with_default_hooks() {
        let starts = Arc::new(AtomicUsize::new(0));
        let source = PluginSource::instance(CountingPlugin {
            starts: Arc::clone(&starts),
        });
        let record = source.into_record().unwrap();

        assert_eq!(record.name(), "counter");
        assert_eq!(record.deps(), ["log".to_string()]);
        assert!(record.resolve(INSTALL).is_some());
        assert!(record.resolve(SHUTDOWN).is_some());

        let (start, c) = call(&record, START);
        start.call(c).await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        let (get, c) = call(&record, "count.get");
        assert_eq!(get.call(c).await.unwrap(), json!(1));
    }

    #[test]
    fn test_builder_validates_shape() {
        assert!(matches!(
            PluginRecord::builder("  ").build(),
            Err(RuntimeError::InvalidPlugin(_))
        ));
        assert!(matches!(
            PluginRecord::builder("a").depends_on("").build(),
            Err(RuntimeError::InvalidPlugin(_))
        ));
        assert!(matches!(
            PluginRecord::builder("a")
                .value("meta", json!(1))
                .value("meta.version", json!(2))
                .build(),
            Err(RuntimeError::InvalidPlugin(_))
        ));
        assert!(matches!(
            PluginRecord::builder("a").value("", json!(1)).build(),
            Err(RuntimeError::InvalidPlugin(_))
        ));
    }

    #[test]
    fn test_plain_record_without_endpoints_is_valid() {
        let record = PluginRecord::builder("c").build().unwrap();
        assert!(record.deps().is_empty());
        assert!(record.namespace().is_empty());
        assert!(record.resolve(START).is_none());
    }
}
