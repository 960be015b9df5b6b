//! Invocation Engine
//!
//! Executes an endpoint across an ordered list of qualifying plugins.
//!
//! # Modes
//!
//! - **Sequential**: plugins are called one after another in dependency
//!   order. With fail-fast the first error aborts the whole call; otherwise
//!   errors are recorded and execution continues.
//! - **Parallel**: every plugin is called concurrently under one shared
//!   deadline and cancellation token. Calls that miss the deadline are
//!   reported as timed out and left to finish on their own. With fail-fast
//!   the first rejection is returned immediately.
//!
//! # Path sentinels
//!
//! A leading `!` returns the resolved member without calling it. A trailing
//! `!` forces fail-fast for that call.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::endpoint::{Arg, Call, Endpoint};
use crate::error::{Result, RuntimeError};
use crate::namespace::{split_path, Node};
use crate::plugin::PluginRecord;
use crate::registry::{PluginList, ALL_PLUGINS};

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Execution mode of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Parallel,
    Sequential,
}

/// Shape of an invocation result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    /// The first successful value in qualifying order
    First,
    /// All successful values in qualifying order
    Values,
    /// One settlement per qualifying plugin
    #[default]
    Settled,
}

/// Per-call invocation options
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub mode: Mode,

    /// Parallel batch timeout; the manager default applies when unset
    pub timeout: Option<Duration>,

    /// Fail-fast override; the manager default applies when unset
    pub fail_fast: Option<bool>,

    pub result: ResultKind,
}

impl InvokeOptions {
    pub fn sequential() -> Self {
        Self {
            mode: Mode::Sequential,
            ..Default::default()
        }
    }

    pub fn parallel() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = Some(fail_fast);
        self
    }

    pub fn result(mut self, kind: ResultKind) -> Self {
        self.result = kind;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// How one plugin's call ended
#[derive(Debug)]
pub enum Outcome {
    Fulfilled(Value),
    Rejected(RuntimeError),
}

/// Outcome of one plugin within an invocation batch
#[derive(Debug)]
pub struct Settlement {
    pub plugin: String,
    pub outcome: Outcome,
}

impl Settlement {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self.outcome, Outcome::Fulfilled(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Fulfilled(v) => Some(v),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RuntimeError> {
        match &self.outcome {
            Outcome::Rejected(e) => Some(e),
            Outcome::Fulfilled(_) => None,
        }
    }

    fn into_value(self) -> Option<Value> {
        match self.outcome {
            Outcome::Fulfilled(v) => Some(v),
            Outcome::Rejected(_) => None,
        }
    }
}

/// Invocation result shaped according to [`ResultKind`]
#[derive(Debug)]
pub enum InvokeOutput {
    First(Option<Value>),
    Values(Vec<Value>),
    Settled(Vec<Settlement>),
}

impl InvokeOutput {
    pub fn shape(kind: ResultKind, settlements: Vec<Settlement>) -> Self {
        match kind {
            ResultKind::First => {
                Self::First(settlements.into_iter().find_map(Settlement::into_value))
            }
            ResultKind::Values => Self::Values(
                settlements
                    .into_iter()
                    .filter_map(Settlement::into_value)
                    .collect(),
            ),
            ResultKind::Settled => Self::Settled(settlements),
        }
    }

    /// The first successful value, whatever the shape
    pub fn into_first(self) -> Option<Value> {
        match self {
            Self::First(v) => v,
            Self::Values(values) => values.into_iter().next(),
            Self::Settled(settlements) => settlements.into_iter().find_map(Settlement::into_value),
        }
    }

    /// All successful values, whatever the shape
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Self::First(v) => v.into_iter().collect(),
            Self::Values(values) => values,
            Self::Settled(settlements) => settlements
                .into_iter()
                .filter_map(Settlement::into_value)
                .collect(),
        }
    }

    /// The settle-report, or `None` when the output was shaped as
    /// [`ResultKind::First`] or [`ResultKind::Values`]
    pub fn into_settled(self) -> Option<Vec<Settlement>> {
        match self {
            Self::Settled(settlements) => Some(settlements),
            Self::First(_) | Self::Values(_) => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint Path
// ─────────────────────────────────────────────────────────────────────────────

/// A dotted endpoint path with its sentinels stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPath<'a> {
    pub path: &'a str,
    /// Leading `!`: never call the resolved member
    ///
    /// Static values resolve as usual. A callable terminal (or a namespace)
    /// settles as a fulfilled `Value::Null` for that plugin, so callers cannot
    /// tell it apart from an endpoint that returned `null`.
    pub static_value: bool,
    /// Trailing `!`: fail on the first error
    pub fail_fast: bool,
}

impl<'a> EndpointPath<'a> {
    pub fn parse(raw: &'a str) -> Result<Self> {
        let (static_value, rest) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let (fail_fast, path) = match rest.strip_suffix('!') {
            Some(path) => (true, path),
            None => (false, rest),
        };

        if path.is_empty() {
            return Err(RuntimeError::InvalidEndpoint(format!(
                "'{raw}' names no endpoint"
            )));
        }
        if path != ALL_PLUGINS {
            split_path(path)?;
        }

        Ok(Self {
            path,
            static_value,
            fail_fast,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution
// ─────────────────────────────────────────────────────────────────────────────

enum Prepared {
    Ready(Value),
    Call(std::sync::Arc<dyn Endpoint>, Call),
}

fn prepare(
    record: &PluginRecord,
    target: &EndpointPath<'_>,
    args: &[Arg],
    cancel: &CancellationToken,
) -> Option<Prepared> {
    let (receiver, node) = record.resolve(target.path)?;
    match node {
        Node::Endpoint(_) if target.static_value => Some(Prepared::Ready(Value::Null)),
        Node::Endpoint(endpoint) => Some(Prepared::Call(
            endpoint,
            Call {
                plugin: record.name().to_string(),
                path: target.path.to_string(),
                receiver,
                args: args.to_vec(),
                cancel: cancel.clone(),
            },
        )),
        Node::Value(value) => Some(Prepared::Ready(value)),
        Node::Namespace(_) => Some(Prepared::Ready(Value::Null)),
    }
}

fn log_rejection(err: &RuntimeError) {
    tracing::warn!(
        plugin = err.plugin().unwrap_or("?"),
        error = %err,
        "Endpoint invocation failed"
    );
}

/// Call plugins one at a time, in list order
pub async fn run_sequential(
    plugins: &PluginList,
    target: &EndpointPath<'_>,
    args: &[Arg],
    fail_fast: bool,
) -> Result<Vec<Settlement>> {
    let cancel = CancellationToken::new();
    let mut settlements = Vec::with_capacity(plugins.len());

    for record in plugins.iter() {
        let outcome = match prepare(record, target, args, &cancel) {
            None => continue,
            Some(Prepared::Ready(value)) => Outcome::Fulfilled(value),
            Some(Prepared::Call(endpoint, call)) => {
                let result = AssertUnwindSafe(endpoint.call(call)).catch_unwind().await;
                match result {
                    Ok(Ok(value)) => Outcome::Fulfilled(value),
                    Ok(Err(e)) => {
                        Outcome::Rejected(RuntimeError::invocation(record.name(), target.path, e))
                    }
                    Err(_) => Outcome::Rejected(RuntimeError::invocation(
                        record.name(),
                        target.path,
                        anyhow::anyhow!("endpoint panicked"),
                    )),
                }
            }
        };

        match outcome {
            Outcome::Rejected(err) if fail_fast => return Err(err),
            Outcome::Rejected(ref err) => log_rejection(err),
            Outcome::Fulfilled(_) => {}
        }
        settlements.push(Settlement {
            plugin: record.name().to_string(),
            outcome,
        });
    }

    Ok(settlements)
}

/// Call all plugins concurrently under one deadline
pub async fn run_parallel(
    plugins: &PluginList,
    target: &EndpointPath<'_>,
    args: &[Arg],
    timeout: Duration,
    fail_fast: bool,
) -> Result<Vec<Settlement>> {
    let cancel = CancellationToken::new();
    let deadline = Instant::now() + timeout;
    let mut slots: Vec<Option<Outcome>> = plugins.iter().map(|_| None).collect();
    let mut pending = FuturesUnordered::new();

    for (idx, record) in plugins.iter().enumerate() {
        match prepare(record, target, args, &cancel) {
            None => {}
            Some(Prepared::Ready(value)) => slots[idx] = Some(Outcome::Fulfilled(value)),
            Some(Prepared::Call(endpoint, call)) => {
                let handle = tokio::spawn(async move { endpoint.call(call).await });
                pending.push(async move { (idx, tokio::time::timeout_at(deadline, handle).await) });
            }
        }
    }

    while let Some((idx, result)) = pending.next().await {
        let name = plugins[idx].name();
        let outcome = match result {
            Ok(Ok(Ok(value))) => Outcome::Fulfilled(value),
            Ok(Ok(Err(e))) => Outcome::Rejected(RuntimeError::invocation(name, target.path, e)),
            Ok(Err(join_error)) => Outcome::Rejected(RuntimeError::invocation(
                name,
                target.path,
                anyhow::anyhow!("endpoint task failed: {join_error}"),
            )),
            Err(_elapsed) => {
                // Stop waiting; the task keeps running until it observes the signal
                cancel.cancel();
                Outcome::Rejected(RuntimeError::Timeout {
                    plugin: name.to_string(),
                    path: target.path.to_string(),
                    after: timeout,
                })
            }
        };

        match outcome {
            Outcome::Rejected(err) if fail_fast => {
                cancel.cancel();
                return Err(err);
            }
            Outcome::Rejected(ref err) => log_rejection(err),
            Outcome::Fulfilled(_) => {}
        }
        slots[idx] = Some(outcome);
    }

    Ok(plugins
        .iter()
        .zip(slots)
        .filter_map(|(record, slot)| {
            slot.map(|outcome| Settlement {
                plugin: record.name().to_string(),
                outcome,
            })
        })
        .collect())
}
