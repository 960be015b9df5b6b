//! Editor Host
//!
//! This crate boots the plugin runtime for the editor:
//! - Host configuration (`editor-host.toml`)
//! - A JSON file store for persisted state keys
//! - Built-in `log` and `session` plugins

pub use plugin_runtime;

pub mod config;
pub mod plugins;
pub mod store;

use std::sync::Arc;

use plugin_runtime::{Application, Persistence, PluginSource};

pub use config::{HostConfig, HostError};
pub use plugins::{LogPlugin, SessionPlugin};
pub use store::FileStore;

/// Create the application, register the built-in plugins and initialize
/// state
pub fn bootstrap(config: &HostConfig) -> Result<Arc<Application>, HostError> {
    let app = Application::new(&config.runtime());

    app.register_plugins([
        PluginSource::instance(LogPlugin),
        PluginSource::instance(SessionPlugin::new(
            app.context_for(plugins::SESSION_PLUGIN),
        )),
    ])?;

    let persistence = match &config.state.store_path {
        Some(path) if !config.state.runtime.persist.is_empty() => {
            let store = FileStore::open(path)?;
            Some(Persistence::new(
                config.state.runtime.persist.clone(),
                Arc::new(store),
            ))
        }
        Some(_) => {
            tracing::warn!("state.store_path is set but no keys are persisted");
            None
        }
        None => None,
    };

    app.initialize_state(config.initial_state()?, persistence)?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_runtime::AppStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_bootstrap_restores_persisted_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("state.json");
        std::fs::write(&store_path, r#"{"xml": "restored.xml"}"#).unwrap();

        let config = HostConfig::from_toml_str(&format!(
            r#"
            [state]
            persist = ["xml"]
            store_path = "{}"

            [state.initial]
            xml = "default.xml"
            pdf = "default.pdf"
            "#,
            store_path.display()
        ))
        .unwrap();

        let app = bootstrap(&config).unwrap();
        assert_eq!(app.status(), AppStatus::Initialized);
        assert_eq!(app.plugins().dependency_order(), vec!["log", "session"]);

        let state = app.current_state().unwrap();
        assert_eq!(state.get("xml"), Some(&json!("restored.xml")));
        assert_eq!(state.get("pdf"), Some(&json!("default.pdf")));

        let installed = app.install_plugins(state).await.unwrap();
        assert_eq!(installed.len(), 2);
        app.start().await.unwrap();
        app.update_state(json!({"xml": "edited.xml"}).as_object().cloned().unwrap())
            .await
            .unwrap();
        app.shutdown().await;

        let saved = FileStore::open(&store_path).unwrap();
        assert_eq!(
            tokio_test::assert_ok!(plugin_runtime::StateStore::load(&saved, "xml")),
            Some(json!("edited.xml"))
        );
    }
}
