//! Plugin Manager
//!
//! Owns the registry and dispatches endpoint invocations over it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use crate::config::InvokeConfig;
use crate::endpoint::Args;
use crate::error::Result;
use crate::invoke::{
    run_parallel, run_sequential, EndpointPath, InvokeOptions, InvokeOutput, Mode, ResultKind,
    Settlement,
};
use crate::plugin::{PluginRecord, PluginSource};
use crate::registry::{PluginList, Registry};

/// Central manager for registered plugins
///
/// The PluginManager is responsible for:
/// - Registering and unregistering plugins
/// - Resolving the plugins that qualify for an endpoint
/// - Invoking endpoints sequentially or in parallel
pub struct PluginManager {
    registry: RwLock<Registry>,

    /// Default parallel batch timeout
    default_timeout: Duration,

    /// Default fail-fast behavior
    fail_fast: bool,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new(&InvokeConfig::default())
    }
}

impl PluginManager {
    pub fn new(config: &InvokeConfig) -> Self {
        Self {
            registry: RwLock::new(Registry::new()),
            default_timeout: config.timeout(),
            fail_fast: config.fail_fast,
        }
    }

    /// Create a new plugin manager wrapped in an Arc
    pub fn new_shared(config: &InvokeConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    // ── Registration ───────────────────────────────────────────────────────

    pub fn register(&self, source: impl Into<PluginSource>) -> Result<Arc<PluginRecord>> {
        self.registry.write().register(source)
    }

    /// Register plugins in iteration order, stopping at the first error
    pub fn register_plugins<I, S>(&self, sources: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<PluginSource>,
    {
        let mut registry = self.registry.write();
        let mut count = 0;
        for source in sources {
            registry.register(source)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn unregister(&self, name: &str) -> Result<Arc<PluginRecord>> {
        self.registry.write().unregister(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<PluginRecord>> {
        self.registry.read().get(name)
    }

    /// Plugin names in dependency order
    pub fn dependency_order(&self) -> Vec<String> {
        self.registry
            .read()
            .order()
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// Plugins qualifying for `path`, in dependency order
    pub fn plugins_for(&self, path: &str) -> Result<PluginList> {
        self.registry.read().plugins_for(path)
    }

    // ── Invocation ─────────────────────────────────────────────────────────

    /// Invoke an endpoint on every qualifying plugin
    ///
    /// `args` is spread positionally when it is a JSON array. The qualifying
    /// list is captured up front; registry changes made by the callables do
    /// not affect a running invocation.
    pub async fn invoke(
        &self,
        path: &str,
        args: impl Into<Args>,
        options: InvokeOptions,
    ) -> Result<InvokeOutput> {
        let target = EndpointPath::parse(path)?;
        let plugins = self.plugins_for(target.path)?;
        let args = args.into().into_vec();
        let fail_fast = target.fail_fast || options.fail_fast.unwrap_or(self.fail_fast);

        tracing::trace!(
            path = %target.path,
            plugins = plugins.len(),
            mode = ?options.mode,
            fail_fast,
            "Invoking endpoint"
        );

        let settlements = match options.mode {
            Mode::Sequential => run_sequential(&plugins, &target, &args, fail_fast).await?,
            Mode::Parallel => {
                let timeout = options.timeout.unwrap_or(self.default_timeout);
                run_parallel(&plugins, &target, &args, timeout, fail_fast).await?
            }
        };

        Ok(InvokeOutput::shape(options.result, settlements))
    }

    /// First successful value
    pub async fn invoke_first(
        &self,
        path: &str,
        args: impl Into<Args>,
        options: InvokeOptions,
    ) -> Result<Option<Value>> {
        let output = self
            .invoke(path, args, options.result(ResultKind::First))
            .await?;
        Ok(output.into_first())
    }

    /// All successful values in qualifying order
    pub async fn invoke_values(
        &self,
        path: &str,
        args: impl Into<Args>,
        options: InvokeOptions,
    ) -> Result<Vec<Value>> {
        let output = self
            .invoke(path, args, options.result(ResultKind::Values))
            .await?;
        Ok(output.into_values())
    }

    /// One settlement per qualifying plugin
    pub async fn invoke_settled(
        &self,
        path: &str,
        args: impl Into<Args>,
        options: InvokeOptions,
    ) -> Result<Vec<Settlement>> {
        let output = self
            .invoke(path, args, options.result(ResultKind::Settled))
            .await?;
        Ok(output.into_settled().unwrap_or_default())
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("registry", &*self.registry.read())
            .field("default_timeout", &self.default_timeout)
            .field("fail_fast", &self.fail_fast)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Call;
    use crate::error::RuntimeError;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder(name: &str, deps: &[&str], log: &Arc<Mutex<Vec<String>>>) -> PluginSource {
        let log = Arc::clone(log);
        let me = name.to_string();
        PluginRecord::builder(name)
            .deps(deps.iter().copied())
            .handler("start", move |_call: Call| {
                let log = Arc::clone(&log);
                let me = me.clone();
                async move {
                    log.lock().push(me);
                    Ok(Value::Null)
                }
            })
            .into()
    }

    #[tokio::test]
    async fn test_sequential_start_follows_dependencies() {
        let manager = PluginManager::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        manager
            .register_plugins([
                recorder("c", &[], &log),
                recorder("b", &["c"], &log),
                recorder("a", &["b"], &log),
            ])
            .unwrap();

        manager
            .invoke("start", (), InvokeOptions::sequential())
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["c", "b", "a"]);
        assert_eq!(manager.dependency_order(), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_empty_in_every_shape() {
        let manager = PluginManager::default();
        manager
            .register(PluginRecord::builder("only").value("x", json!(1)))
            .unwrap();

        for options in [InvokeOptions::sequential(), InvokeOptions::parallel()] {
            let first = manager
                .invoke_first("missing.endpoint", (), options.clone())
                .await;
            assert!(tokio_test::assert_ok!(first).is_none());

            let values = manager
                .invoke_values("missing.endpoint", (), options.clone())
                .await
                .unwrap();
            assert!(values.is_empty());

            let settled = manager
                .invoke_settled("missing.endpoint", (), options)
                .await
                .unwrap();
            assert!(settled.is_empty());
        }
    }

    #[tokio::test]
    async fn test_empty_path_is_invalid() {
        let manager = PluginManager::default();
        let err = manager
            .invoke("", (), InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidEndpoint(_)));
    }

    #[tokio::test]
    async fn test_fail_fast_sources() {
        let manager = PluginManager::default();
        manager
            .register(
                PluginRecord::builder("bad")
                    .handler("run", |_call: Call| async { anyhow::bail!("nope") }),
            )
            .unwrap();

        // captured by default
        let settled = manager
            .invoke_settled("run", (), InvokeOptions::sequential())
            .await
            .unwrap();
        assert!(!settled[0].is_fulfilled());

        // trailing sentinel
        assert!(manager
            .invoke("run!", (), InvokeOptions::sequential())
            .await
            .is_err());

        // per-call option
        assert!(manager
            .invoke("run", (), InvokeOptions::parallel().fail_fast(true))
            .await
            .is_err());

        // manager-wide default
        let strict = PluginManager::new(&InvokeConfig {
            fail_fast: true,
            ..Default::default()
        });
        strict
            .register(
                PluginRecord::builder("bad")
                    .handler("run", |_call: Call| async { anyhow::bail!("nope") }),
            )
            .unwrap();
        assert!(strict
            .invoke("run", (), InvokeOptions::sequential())
            .await
            .is_err());
        assert!(strict
            .invoke("run", (), InvokeOptions::sequential().fail_fast(false))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_register_plugins_stops_at_first_error() {
        let manager = PluginManager::default();
        let err = manager
            .register_plugins([
                PluginRecord::builder("a"),
                PluginRecord::builder("a"),
                PluginRecord::builder("b"),
            ])
            .unwrap_err();

        assert!(matches!(err, RuntimeError::DuplicateName(_)));
        assert_eq!(manager.len(), 1);
        assert!(manager.get("b").is_none());
    }

    #[tokio::test]
    async fn test_values_keep_qualifying_order() {
        let manager = PluginManager::default();
        manager
            .register_plugins([
                PluginRecord::builder("second")
                    .depends_on("first")
                    .value("meta.rank", json!(2)),
                PluginRecord::builder("first").value("meta.rank", json!(1)),
            ])
            .unwrap();

        let values = manager
            .invoke_values("meta.rank", (), InvokeOptions::parallel())
            .await
            .unwrap();
        assert_eq!(values, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_per_call_timeout_override() {
        let manager = PluginManager::default();
        manager
            .register(PluginRecord::builder("sleepy").handler("run", |_call: Call| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Value::Null)
            }))
            .unwrap();

        let settled = manager
            .invoke_settled(
                "run",
                (),
                InvokeOptions::parallel().with_timeout(Duration::from_millis(20)),
            )
            .await
            .unwrap();
        assert!(matches!(
            settled[0].error(),
            Some(RuntimeError::Timeout { .. })
        ));
    }
}
