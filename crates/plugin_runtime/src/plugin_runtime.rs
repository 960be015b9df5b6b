//! Plugin Runtime - Plugin orchestration for the editor
//!
//! This crate contains the plugin registry, dependency resolution, endpoint
//! invocation and the immutable application state engine.

pub mod app;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod invoke;
pub mod manager;
pub mod namespace;
pub mod persist;
pub mod plugin;
pub mod registry;
pub mod resolver;
pub mod state;

pub use app::{
    AppStatus, Application, PluginContext, STATE_ON_CHANGE, STATE_UPDATE, STATE_UPDATE_INTERNAL,
};
pub use config::{InvokeConfig, RuntimeConfig, StateConfig};
pub use endpoint::{endpoint, Arg, Args, Call, Endpoint, FnEndpoint};
pub use error::{Result, RuntimeError, REENTRANT_UPDATE_MESSAGE};
pub use invoke::{InvokeOptions, InvokeOutput, Mode, Outcome, ResultKind, Settlement};
pub use manager::PluginManager;
pub use namespace::{Namespace, Node};
pub use persist::{MemoryStore, Persistence, StateStore};
pub use plugin::{EndpointMap, Plugin, PluginRecord, PluginSource, RecordBuilder};
pub use registry::{PluginList, Registry, ALL_PLUGINS};
pub use state::{AppState, StateChanges, Transition, EXT_KEY};
