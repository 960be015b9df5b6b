//! Application Orchestrator
//!
//! Composes the plugin manager and the state transition engine into an
//! observable lifecycle:
//!
//! ```text
//! Uninitialized → Initialized → Installing → Installed → Starting → Running
//!                                                                     ⇅
//!                                                                  Updating
//!                                               ShuttingDown → ShutDown
//! ```
//!
//! Every state update runs inside a single-flight window. While the new
//! state is being fanned out to listeners, any further update fails with
//! [`RuntimeError::ReentrantStateUpdate`].

mod context;

pub use context::PluginContext;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::json;

use crate::config::RuntimeConfig;
use crate::endpoint::Args;
use crate::error::{Result, RuntimeError};
use crate::invoke::{InvokeOptions, Settlement};
use crate::manager::PluginManager;
use crate::persist::Persistence;
use crate::plugin::{PluginRecord, PluginSource, INSTALL, SHUTDOWN, START};
use crate::state::{apply_changes, apply_extension_changes, AppState, StateChanges, Transition};

/// Full new state, fired on every update call
pub const STATE_UPDATE: &str = "state.update";

/// Full new state, fired only when something changed
pub const STATE_UPDATE_INTERNAL: &str = "state.updateInternal";

/// Changed keys only, fired only when something changed
pub const STATE_ON_CHANGE: &str = "state.onChange";

// ─────────────────────────────────────────────────────────────────────────────
// App Status
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AppStatus {
    Uninitialized = 0,
    Initialized = 1,
    Installing = 2,
    Installed = 3,
    Starting = 4,
    Running = 5,
    /// A state update is propagating
    Updating = 6,
    ShuttingDown = 7,
    ShutDown = 8,
}

impl AppStatus {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Uninitialized,
            1 => Self::Initialized,
            2 => Self::Installing,
            3 => Self::Installed,
            4 => Self::Starting,
            5 => Self::Running,
            6 => Self::Updating,
            7 => Self::ShuttingDown,
            _ => Self::ShutDown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, AppStatus::Running | AppStatus::Updating)
    }

    pub fn is_shut_down(&self) -> bool {
        *self == AppStatus::ShutDown
    }
}

impl std::fmt::Display for AppStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppStatus::Uninitialized => write!(f, "uninitialized"),
            AppStatus::Initialized => write!(f, "initialized"),
            AppStatus::Installing => write!(f, "installing"),
            AppStatus::Installed => write!(f, "installed"),
            AppStatus::Starting => write!(f, "starting"),
            AppStatus::Running => write!(f, "running"),
            AppStatus::Updating => write!(f, "updating"),
            AppStatus::ShuttingDown => write!(f, "shutting down"),
            AppStatus::ShutDown => write!(f, "shut down"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Update Guard
// ─────────────────────────────────────────────────────────────────────────────

/// Holds the in-flight flag for the duration of one state update
///
/// Dropping the guard lowers the flag and leaves the `Updating` status,
/// whether the update finished, failed, panicked or was cancelled.
struct UpdateGuard<'a> {
    in_flight: &'a AtomicBool,
    status: &'a AtomicU8,
    resume: u8,
}

impl<'a> UpdateGuard<'a> {
    fn acquire(in_flight: &'a AtomicBool, status: &'a AtomicU8) -> Result<Self> {
        if in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RuntimeError::ReentrantStateUpdate);
        }
        let resume = status.swap(AppStatus::Updating as u8, Ordering::AcqRel);
        Ok(Self {
            in_flight,
            status,
            resume,
        })
    }
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        // a shutdown that began meanwhile keeps its own status
        let _ = self.status.compare_exchange(
            AppStatus::Updating as u8,
            self.resume,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.in_flight.store(false, Ordering::Release);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Application
// ─────────────────────────────────────────────────────────────────────────────

/// The plugin application
///
/// Created shared; plugins reach back into it through a [`PluginContext`]
/// obtained from [`Application::context_for`].
pub struct Application {
    plugins: PluginManager,
    state: RwLock<Option<AppState>>,
    persistence: RwLock<Option<Persistence>>,
    status: AtomicU8,
    in_flight: AtomicBool,
    this: Weak<Application>,
}

impl Application {
    pub fn new(config: &RuntimeConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            plugins: PluginManager::new(&config.invoke),
            state: RwLock::new(None),
            persistence: RwLock::new(None),
            status: AtomicU8::new(AppStatus::Uninitialized as u8),
            in_flight: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    pub fn register(&self, source: impl Into<PluginSource>) -> Result<Arc<PluginRecord>> {
        self.plugins.register(source)
    }

    pub fn register_plugins<I, S>(&self, sources: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<PluginSource>,
    {
        self.plugins.register_plugins(sources)
    }

    pub fn status(&self) -> AppStatus {
        AppStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: AppStatus) {
        self.status.store(status as u8, Ordering::Release);
        tracing::debug!(status = %status, "Application status changed");
    }

    /// Whether a state update is currently propagating
    pub fn is_updating(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// A facade scoped to one plugin
    pub fn context_for(&self, plugin: impl Into<String>) -> PluginContext {
        PluginContext::new(plugin.into(), self.this.clone())
    }

    pub fn current_state(&self) -> Result<AppState> {
        self.state
            .read()
            .clone()
            .ok_or(RuntimeError::StateNotInitialized)
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Set the initial application state
    ///
    /// Succeeds once per application. With persistence, previously saved
    /// values are restored for the configured keys and the result is saved
    /// back once.
    pub fn initialize_state(
        &self,
        state: AppState,
        persistence: Option<Persistence>,
    ) -> Result<AppState> {
        let mut current = self.state.write();
        if current.is_some() {
            return Err(RuntimeError::StateAlreadyInitialized);
        }

        let state = match &persistence {
            Some(p) => {
                let restored = p.restore(&state).state;
                p.mirror_all(&restored);
                tracing::info!(keys = ?p.keys(), "State persistence enabled");
                restored
            }
            None => state,
        };

        *current = Some(state.clone());
        *self.persistence.write() = persistence;
        drop(current);

        self.set_status(AppStatus::Initialized);
        Ok(state)
    }

    /// Call `install` on every plugin in dependency order
    pub async fn install_plugins(&self, state: AppState) -> Result<Vec<Settlement>> {
        tracing::info!(plugins = self.plugins.len(), "Installing plugins");
        self.set_status(AppStatus::Installing);
        let report = self.lifecycle(INSTALL, Args::one(state)).await?;
        self.set_status(AppStatus::Installed);
        Ok(report)
    }

    /// Call `start` on every plugin in dependency order
    pub async fn start(&self) -> Result<Vec<Settlement>> {
        tracing::info!("Starting plugins");
        self.set_status(AppStatus::Starting);
        let report = self.lifecycle(START, Args::none()).await?;
        self.set_status(AppStatus::Running);
        Ok(report)
    }

    /// Call `shutdown` on every plugin in dependency order
    ///
    /// Plugin errors are reported, never returned.
    pub async fn shutdown(&self) -> Vec<Settlement> {
        if self.status().is_shut_down() {
            tracing::debug!("Application already shut down");
            return Vec::new();
        }

        tracing::info!("Shutting down plugins");
        self.set_status(AppStatus::ShuttingDown);
        let report = match self.lifecycle(SHUTDOWN, Args::none()).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Shutdown fan-out failed");
                Vec::new()
            }
        };
        self.set_status(AppStatus::ShutDown);
        report
    }

    async fn lifecycle(&self, endpoint: &str, args: Args) -> Result<Vec<Settlement>> {
        let report = self
            .plugins
            .invoke_settled(endpoint, args, InvokeOptions::sequential().fail_fast(false))
            .await?;

        let failed = report.iter().filter(|s| !s.is_fulfilled()).count();
        if failed > 0 {
            tracing::warn!(endpoint, failed, total = report.len(), "Lifecycle phase had failures");
        } else {
            tracing::info!(endpoint, plugins = report.len(), "Lifecycle phase complete");
        }
        Ok(report)
    }

    // ── State Updates ──────────────────────────────────────────────────────

    /// Merge `changes` into the current state and notify listeners
    pub async fn update_state(&self, changes: StateChanges) -> Result<AppState> {
        let _guard = UpdateGuard::acquire(&self.in_flight, &self.status)?;
        let base = self.current_state()?;
        self.commit(apply_changes(&base, changes)).await
    }

    /// Merge `changes` into the extension data of `namespace` and notify
    /// listeners
    pub async fn update_state_ext(
        &self,
        namespace: &str,
        changes: StateChanges,
    ) -> Result<AppState> {
        let _guard = UpdateGuard::acquire(&self.in_flight, &self.status)?;
        let base = self.current_state()?;
        self.commit(apply_extension_changes(&base, namespace, changes))
            .await
    }

    async fn commit(&self, transition: Transition) -> Result<AppState> {
        let Transition { state, changed } = transition;

        if changed.is_empty() {
            self.broadcast(STATE_UPDATE, Args::one(state.clone())).await?;
            return Ok(state);
        }

        *self.state.write() = Some(state.clone());
        let persistence = self.persistence.read().clone();
        if let Some(p) = persistence {
            p.mirror(&state, &changed);
        }

        self.broadcast(STATE_UPDATE, Args::one(state.clone())).await?;
        self.broadcast(STATE_UPDATE_INTERNAL, Args::one(state.clone()))
            .await?;
        self.broadcast(STATE_ON_CHANGE, Args::one(json!(changed)))
            .await?;
        Ok(state)
    }

    async fn broadcast(&self, endpoint: &str, args: Args) -> Result<()> {
        self.plugins
            .invoke_settled(endpoint, args, InvokeOptions::sequential().fail_fast(false))
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("status", &self.status())
            .field("plugins", &self.plugins)
            .finish()
    }
}
