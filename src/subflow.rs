//! Child-graph builder handed to dynamic task bodies.

use crate::{
    graph::{Graph, NodeBody},
    task::Task,
};

/// Builder for a child graph, created by the executor right before it
/// invokes a dynamic task's body and consumed when the body returns.
///
/// The building surface is the same as [`Taskflow`](crate::Taskflow)'s. By
/// default the child graph is *joined*: every sink of the child graph gains
/// an implicit edge back to the spawning node, so that node's successors do
/// not run until the whole child graph has drained. Calling
/// [`detach`](Self::detach) makes the child graph independent instead: the
/// spawning node completes as soon as its body returns, but the run as a
/// whole still waits for the detached nodes before finishing.
///
/// Child nodes may themselves be dynamic, nesting subflows to any depth.
///
/// # Example
///
/// ```
/// use dagflow::{Executor, Taskflow};
///
/// let mut tf = Taskflow::new();
/// let parent = tf.emplace_dynamic(|sf| {
///     let fetch = sf.emplace(|| { /* ... */ });
///     let merge = sf.emplace(|| { /* ... */ });
///     sf.precede(&fetch, [&merge]);
/// });
/// let report = tf.emplace(|| println!("all children done"));
/// tf.precede(&parent, [&report]);
///
/// let executor = Executor::new();
/// executor.run(&tf).wait().unwrap();
/// ```
#[must_use]
#[derive(Debug, Default)]
pub struct Subflow {
    graph: Graph,
    detached: bool,
}

impl Subflow {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a node with a plain body to the child graph.
    pub fn emplace(&mut self, body: impl FnMut() + Send + 'static) -> Task {
        self.graph.emplace(NodeBody::Static(Box::new(body)))
    }

    /// Append a dynamic-tasking node to the child graph (nested subflow).
    pub fn emplace_dynamic(
        &mut self,
        body: impl FnMut(&mut Subflow) + Send + 'static,
    ) -> Task {
        self.graph.emplace(NodeBody::Dynamic(Box::new(body)))
    }

    /// Add an edge from `before` to each task in `afters`. Same contract as
    /// [`Taskflow::precede`](crate::Taskflow::precede).
    pub fn precede<'a>(&mut self, before: &Task, afters: impl IntoIterator<Item = &'a Task>) {
        for after in afters {
            self.graph.precede(before, after);
        }
    }

    /// Run the child graph independently of the spawning node.
    pub fn detach(&mut self) {
        self.detached = true;
    }

    /// Whether [`detach`](Self::detach) has been called.
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Number of nodes added so far.
    pub fn num_tasks(&self) -> usize {
        self.graph.len()
    }

    pub(crate) fn into_parts(self) -> (Graph, bool) {
        (self.graph, self.detached)
    }
}
