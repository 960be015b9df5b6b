//! Endpoints
//!
//! An endpoint is an async callable exposed by a plugin at a dotted path.
//! Every call receives a [`Call`] describing who is being called, the
//! namespace it lives in, its positional arguments and the cancellation
//! signal shared by its invocation batch.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::namespace::{Namespace, Node};
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

/// A single positional argument
#[derive(Debug, Clone)]
pub enum Arg {
    /// Plain JSON data
    Json(Value),
    /// An application state snapshot, passed by reference
    State(AppState),
}

impl Arg {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Arg::Json(v) => Some(v),
            Arg::State(_) => None,
        }
    }

    pub fn as_state(&self) -> Option<&AppState> {
        match self {
            Arg::State(s) => Some(s),
            Arg::Json(_) => None,
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Json(value)
    }
}

impl From<AppState> for Arg {
    fn from(state: AppState) -> Self {
        Arg::State(state)
    }
}

/// Positional arguments for an endpoint call
///
/// A JSON array converts into one argument per element; any other JSON value
/// becomes a single argument. Use [`Args::one`] to pass an array as a single
/// argument.
#[derive(Debug, Clone, Default)]
pub struct Args(Vec<Arg>);

impl Args {
    /// No arguments
    pub fn none() -> Self {
        Self(Vec::new())
    }

    /// Exactly one argument, never spread
    pub fn one(arg: impl Into<Arg>) -> Self {
        Self(vec![arg.into()])
    }

    /// Append an argument
    pub fn with(mut self, arg: impl Into<Arg>) -> Self {
        self.0.push(arg.into());
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Arg> {
        self.0
    }
}

impl From<()> for Args {
    fn from(_: ()) -> Self {
        Self::none()
    }
}

impl From<Value> for Args {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Self(items.into_iter().map(Arg::Json).collect()),
            other => Self(vec![Arg::Json(other)]),
        }
    }
}

impl From<AppState> for Args {
    fn from(state: AppState) -> Self {
        Self::one(state)
    }
}

impl From<Arg> for Args {
    fn from(arg: Arg) -> Self {
        Self(vec![arg])
    }
}

impl From<Vec<Arg>> for Args {
    fn from(args: Vec<Arg>) -> Self {
        Self(args)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Call
// ─────────────────────────────────────────────────────────────────────────────

/// Everything an endpoint receives when it is invoked
#[derive(Debug, Clone)]
pub struct Call {
    /// Name of the plugin that owns the endpoint
    pub plugin: String,

    /// Full dotted path of the endpoint
    pub path: String,

    /// The namespace that directly contains the endpoint
    pub receiver: Arc<Namespace>,

    /// Positional arguments
    pub args: Vec<Arg>,

    /// Tripped when the invocation batch times out or fails fast
    pub cancel: CancellationToken,
}

impl Call {
    pub fn arg(&self, index: usize) -> Option<&Arg> {
        self.args.get(index)
    }

    /// JSON argument at `index`
    pub fn json(&self, index: usize) -> Option<&Value> {
        self.arg(index).and_then(Arg::as_json)
    }

    /// State argument at `index`
    pub fn state(&self, index: usize) -> Option<&AppState> {
        self.arg(index).and_then(Arg::as_state)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Call another member of the same namespace
    ///
    /// Static members are returned as-is. The sibling shares this call's
    /// cancellation signal.
    pub async fn call_sibling(&self, name: &str, args: impl Into<Args>) -> anyhow::Result<Value> {
        let path = match self.path.rsplit_once('.') {
            Some((parent, _)) => format!("{parent}.{name}"),
            None => name.to_string(),
        };

        match self.receiver.get(name) {
            Some(Node::Endpoint(endpoint)) => {
                let call = Call {
                    plugin: self.plugin.clone(),
                    path,
                    receiver: Arc::clone(&self.receiver),
                    args: args.into().into_vec(),
                    cancel: self.cancel.clone(),
                };
                endpoint.call(call).await
            }
            Some(Node::Value(value)) => Ok(value.clone()),
            Some(Node::Namespace(_)) => {
                anyhow::bail!("'{path}' on plugin '{}' is a namespace", self.plugin)
            }
            None => anyhow::bail!("'{path}' not found on plugin '{}'", self.plugin),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint Trait
// ─────────────────────────────────────────────────────────────────────────────

/// An async callable reachable at a dotted path on a plugin
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    async fn call(&self, call: Call) -> anyhow::Result<Value>;
}

/// Closure-based endpoint
pub struct FnEndpoint<F> {
    func: F,
}

impl<F> FnEndpoint<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> Endpoint for FnEndpoint<F>
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, call: Call) -> anyhow::Result<Value> {
        (self.func)(call).await
    }
}

/// Wrap a closure returning a future as a shareable endpoint
pub fn endpoint<F, Fut>(func: F) -> Arc<dyn Endpoint>
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnEndpoint::new(func))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call_at(path: &str, receiver: Namespace) -> Call {
        Call {
            plugin: "test".into(),
            path: path.into(),
            receiver: Arc::new(receiver),
            args: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_array_spreads_into_positional_args() {
        let args: Args = json!([1, "two", null]).into();
        assert_eq!(args.len(), 3);

        let single: Args = json!({"a": 1}).into();
        assert_eq!(single.len(), 1);

        let kept = Args::one(json!([1, 2]));
        assert_eq!(kept.len(), 1);
        assert!(Args::from(()).is_empty());
    }

    #[tokio::test]
    async fn test_call_sibling_reaches_namespace_members() {
        let mut ns = Namespace::default();
        ns.insert("greet", Node::Value(json!("hello"))).unwrap();
        ns.insert(
            "shout",
            Node::Endpoint(endpoint(|call: Call| async move {
                let word = call.json(0).and_then(Value::as_str).unwrap_or_default();
                Ok(json!(word.to_uppercase()))
            })),
        )
        .unwrap();

        let call = call_at("text.run", ns);
        assert_eq!(call.call_sibling("greet", ()).await.unwrap(), json!("hello"));
        assert_eq!(
            call.call_sibling("shout", json!("hey")).await.unwrap(),
            json!("HEY")
        );
        assert!(call.call_sibling("missing", ()).await.is_err());
    }
}
