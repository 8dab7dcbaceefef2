//! The persistent, reusable graph container.

use crate::{
    graph::{Graph, NodeBody},
    subflow::Subflow,
    task::Task,
    types::TaskflowId,
};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide identity source. Identity only; all scheduling state is
/// scoped to an [`Executor`](crate::Executor) instance.
static NEXT_TASKFLOW_ID: AtomicU64 = AtomicU64::new(0);

/// A long-lived container owning one dependency graph.
///
/// A taskflow is built once and may be submitted to an
/// [`Executor`](crate::Executor) any number of times; every run reseeds the
/// same graph. Building requires `&mut self`.
///
/// Submitting the same taskflow repeatedly is explicitly supported: runs on
/// one executor are chained in strict submission order. Mutating a taskflow
/// while one of its runs is in flight, or running one taskflow on two
/// executors at once, stays memory-safe but leaves the affected runs'
/// behavior unspecified; treat both as misuse.
///
/// # Example
///
/// ```
/// use dagflow::{Executor, Taskflow};
///
/// let mut tf = Taskflow::new();
/// let hello = tf.emplace(|| println!("hello"));
/// let world = tf.emplace(|| println!("world"));
/// tf.precede(&hello, [&world]);
///
/// let executor = Executor::new();
/// executor.run(&tf).wait().unwrap();
/// ```
#[must_use]
#[derive(Debug)]
pub struct Taskflow {
    id: TaskflowId,
    name: Option<String>,
    graph: Graph,
}

impl Default for Taskflow {
    fn default() -> Self {
        Self::new()
    }
}

impl Taskflow {
    /// Create an empty taskflow.
    pub fn new() -> Self {
        Self {
            id: TaskflowId(NEXT_TASKFLOW_ID.fetch_add(1, Ordering::Relaxed)),
            name: None,
            graph: Graph::default(),
        }
    }

    /// Create an empty taskflow with a diagnostic name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new()
        }
    }

    /// Append a node with a plain body and return its handle.
    pub fn emplace(&mut self, body: impl FnMut() + Send + 'static) -> Task {
        self.graph.emplace(NodeBody::Static(Box::new(body)))
    }

    /// Append a dynamic-tasking node. At execution time its body receives a
    /// [`Subflow`] builder and may spawn a child graph; see the crate docs
    /// for join/detach semantics.
    pub fn emplace_dynamic(
        &mut self,
        body: impl FnMut(&mut Subflow) + Send + 'static,
    ) -> Task {
        self.graph.emplace(NodeBody::Dynamic(Box::new(body)))
    }

    /// Add an edge from `before` to each task in `afters`.
    ///
    /// The graph must stay acyclic; a cycle is not detected and makes the
    /// affected runs never complete.
    pub fn precede<'a>(&mut self, before: &Task, afters: impl IntoIterator<Item = &'a Task>) {
        for after in afters {
            self.graph.precede(before, after);
        }
    }

    /// Number of nodes currently in the graph.
    pub fn num_tasks(&self) -> usize {
        self.graph.len()
    }

    /// Whether the graph has no nodes. Runs of an empty taskflow complete
    /// immediately.
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// The diagnostic name given at construction, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Stable identity, assigned at construction.
    pub(crate) fn id(&self) -> TaskflowId {
        self.id
    }

    pub(crate) fn graph(&self) -> &Graph {
        &self.graph
    }
}
