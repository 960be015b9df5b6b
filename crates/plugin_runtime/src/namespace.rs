//! Plugin Namespaces
//!
//! A plugin exposes a tree of named members. Each segment of a dotted path
//! selects a child: either a nested namespace, an endpoint, or a static value.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::endpoint::Endpoint;
use crate::error::{Result, RuntimeError};

/// A member of a plugin namespace
#[derive(Clone)]
pub enum Node {
    Namespace(Arc<Namespace>),
    Endpoint(Arc<dyn Endpoint>),
    Value(Value),
}

impl Node {
    pub fn is_endpoint(&self) -> bool {
        matches!(self, Node::Endpoint(_))
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Namespace(ns) => std::fmt::Debug::fmt(ns.as_ref(), f),
            Node::Endpoint(_) => write!(f, "<endpoint>"),
            Node::Value(v) => write!(f, "{v}"),
        }
    }
}

/// A tree of named plugin members
#[derive(Clone, Default)]
pub struct Namespace {
    entries: BTreeMap<String, Node>,
}

/// Split a dotted path, rejecting empty segments
pub(crate) fn split_path(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(RuntimeError::InvalidEndpoint("empty path".into()));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(RuntimeError::InvalidEndpoint(format!(
            "'{path}' contains an empty segment"
        )));
    }
    Ok(segments)
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct child by name
    pub fn get(&self, name: &str) -> Option<&Node> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a member at a dotted path, creating intermediate namespaces
    ///
    /// Fails if the path runs through an existing endpoint or value, or if
    /// the final segment is already taken.
    pub fn insert(&mut self, path: &str, node: Node) -> Result<()> {
        let segments = split_path(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(RuntimeError::InvalidEndpoint("empty path".into()));
        };

        let mut current = self;
        for segment in parents {
            let entry = current
                .entries
                .entry((*segment).to_string())
                .or_insert_with(|| Node::Namespace(Arc::new(Namespace::default())));
            current = match entry {
                Node::Namespace(ns) => Arc::make_mut(ns),
                _ => {
                    return Err(RuntimeError::InvalidPlugin(format!(
                        "path '{path}' descends through leaf '{segment}'"
                    )));
                }
            };
        }

        if current.entries.contains_key(*last) {
            return Err(RuntimeError::InvalidPlugin(format!(
                "path '{path}' is defined twice"
            )));
        }
        current.entries.insert((*last).to_string(), node);
        Ok(())
    }

    /// Walk a dotted path to its terminal member
    ///
    /// Returns the namespace that directly encloses the terminal together
    /// with the terminal itself. Static JSON values can be walked into; their
    /// enclosing namespace is the one holding the top-level value.
    pub fn resolve(self: &Arc<Self>, path: &str) -> Option<(Arc<Namespace>, Node)> {
        let mut receiver = Arc::clone(self);
        let mut segments = path.split('.').peekable();

        while let Some(segment) = segments.next() {
            let node = receiver.entries.get(segment)?.clone();
            if segments.peek().is_none() {
                return Some((receiver, node));
            }
            match node {
                Node::Namespace(ns) => receiver = ns,
                Node::Value(value) => {
                    let mut current = &value;
                    for rest in segments.by_ref() {
                        current = current.get(rest)?;
                    }
                    return Some((receiver, Node::Value(current.clone())));
                }
                Node::Endpoint(_) => return None,
            }
        }
        None
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}
