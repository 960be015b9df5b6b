//! Dependency Resolution
//!
//! Orders plugins so that every plugin comes after all of its registered
//! dependencies. Roots are visited in registration order and dependencies in
//! declaration order, which makes the result deterministic. Dependencies on
//! names that are not registered are skipped here; filtering such plugins out
//! of endpoint fan-out is the registry's job.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, RuntimeError};
use crate::plugin::PluginRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    /// On the active path
    InProgress,
    Done,
}

struct Resolver<'a> {
    records: &'a [Arc<PluginRecord>],
    index: HashMap<&'a str, usize>,
    marks: Vec<Mark>,
    path: Vec<usize>,
    order: Vec<Arc<PluginRecord>>,
}

impl<'a> Resolver<'a> {
    fn new(records: &'a [Arc<PluginRecord>]) -> Self {
        let index = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name(), i))
            .collect();
        Self {
            records,
            index,
            marks: vec![Mark::Unvisited; records.len()],
            path: Vec::new(),
            order: Vec::with_capacity(records.len()),
        }
    }

    /// Depth-first walk from `root` on an explicit stack of
    /// `(record, next dependency)` frames
    fn visit(&mut self, root: usize) -> Result<()> {
        if self.marks[root] != Mark::Unvisited {
            return Ok(());
        }

        let records = self.records;
        let mut stack = vec![self.enter(root)];
        while let Some(frame) = stack.last_mut() {
            let (idx, next) = *frame;
            let Some(dep) = records[idx].deps().get(next) else {
                stack.pop();
                self.path.pop();
                self.marks[idx] = Mark::Done;
                self.order.push(Arc::clone(&records[idx]));
                continue;
            };
            frame.1 += 1;

            let Some(&dep_idx) = self.index.get(dep.as_str()) else {
                continue;
            };
            match self.marks[dep_idx] {
                Mark::Done => {}
                Mark::InProgress => return Err(self.cycle_error(dep_idx)),
                Mark::Unvisited => {
                    let frame = self.enter(dep_idx);
                    stack.push(frame);
                }
            }
        }
        Ok(())
    }

    fn enter(&mut self, idx: usize) -> (usize, usize) {
        self.marks[idx] = Mark::InProgress;
        self.path.push(idx);
        (idx, 0)
    }

    /// The cycle runs from the first occurrence of `idx` on the active path
    /// back to `idx` itself.
    fn cycle_error(&self, idx: usize) -> RuntimeError {
        let start = self.path.iter().position(|&i| i == idx).unwrap_or(0);
        let cycle = self.path[start..]
            .iter()
            .chain(std::iter::once(&idx))
            .map(|&i| self.records[i].name().to_string())
            .collect();
        RuntimeError::CircularDependency(cycle)
    }
}

/// Compute the dependency order of `records`, given in registration order
pub fn dependency_order(records: &[Arc<PluginRecord>]) -> Result<Vec<Arc<PluginRecord>>> {
    let mut resolver = Resolver::new(records);
    for idx in 0..records.len() {
        resolver.visit(idx)?;
    }
    Ok(resolver.order)
}
