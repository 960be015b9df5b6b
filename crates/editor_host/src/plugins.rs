//! Built-in Plugins
//!
//! - `log`: forwards `log.debug`, `log.info`, `log.warn` and `log.error` to
//!   tracing, so plugins can log through an endpoint
//! - `session`: tracks whether the editor session is active and reports
//!   every state change through `log.info`

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::Level;

use plugin_runtime::{
    endpoint, AppState, Call, EndpointMap, InvokeOptions, Plugin, PluginContext, STATE_ON_CHANGE,
};

// ─────────────────────────────────────────────────────────────────────────────
// Log Plugin
// ─────────────────────────────────────────────────────────────────────────────

pub const LOG_PLUGIN: &str = "log";

/// Logging endpoints backed by tracing
#[derive(Debug, Default)]
pub struct LogPlugin;

/// Render the message argument of a log call
fn message(call: &Call) -> String {
    match call.json(0) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn log_endpoint(level: Level) -> Arc<dyn plugin_runtime::Endpoint> {
    endpoint(move |call: Call| async move {
        let message = message(&call);
        let fields = call.json(1).cloned().unwrap_or(Value::Null);
        if level == Level::DEBUG {
            tracing::debug!(target: "editor", fields = %fields, "{message}");
        } else if level == Level::INFO {
            tracing::info!(target: "editor", fields = %fields, "{message}");
        } else if level == Level::WARN {
            tracing::warn!(target: "editor", fields = %fields, "{message}");
        } else {
            tracing::error!(target: "editor", fields = %fields, "{message}");
        }
        Ok(Value::Null)
    })
}

#[async_trait]
impl Plugin for LogPlugin {
    fn name(&self) -> &str {
        LOG_PLUGIN
    }

    fn endpoints(self: Arc<Self>) -> EndpointMap {
        let mut map = EndpointMap::new();
        map.insert("log.debug".into(), log_endpoint(Level::DEBUG));
        map.insert("log.info".into(), log_endpoint(Level::INFO));
        map.insert("log.warn".into(), log_endpoint(Level::WARN));
        map.insert("log.error".into(), log_endpoint(Level::ERROR));
        map
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Plugin
// ─────────────────────────────────────────────────────────────────────────────

pub const SESSION_PLUGIN: &str = "session";

/// Keeps `ext.session.active` current and logs state changes
pub struct SessionPlugin {
    ctx: PluginContext,
}

impl SessionPlugin {
    pub fn new(ctx: PluginContext) -> Self {
        Self { ctx }
    }

    async fn set_active(&self, active: bool) -> anyhow::Result<()> {
        let mut changes = serde_json::Map::new();
        changes.insert("active".into(), json!(active));
        self.ctx.update_state_ext(changes).await?;
        Ok(())
    }

    async fn log(&self, level: &str, message: String, fields: Value) -> anyhow::Result<()> {
        self.ctx
            .invoke(
                &format!("log.{level}"),
                json!([message, fields]),
                InvokeOptions::sequential(),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Plugin for SessionPlugin {
    fn name(&self) -> &str {
        SESSION_PLUGIN
    }

    fn dependencies(&self) -> Vec<String> {
        vec![LOG_PLUGIN.to_string()]
    }

    async fn install(&self, state: AppState) -> anyhow::Result<()> {
        let keys: Vec<&str> = state.keys().collect();
        self.log("debug", "Session installed".into(), json!({ "keys": keys }))
            .await
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.set_active(true).await?;
        self.log("info", "Session started".into(), Value::Null).await
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.set_active(false).await?;
        self.log("info", "Session ended".into(), Value::Null).await
    }

    fn endpoints(self: Arc<Self>) -> EndpointMap {
        let mut map = EndpointMap::new();
        map.insert(
            STATE_ON_CHANGE.into(),
            endpoint(move |call: Call| {
                let this = Arc::clone(&self);
                async move {
                    let changed = call.json(0).cloned().unwrap_or(Value::Null);
                    this.log("info", "State changed".into(), json!({ "changed": changed }))
                        .await?;
                    Ok(Value::Null)
                }
            }),
        );
        map
    }
}
