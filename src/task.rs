//! Task handles returned by the graph builders.

use crate::graph::Node;
use std::sync::Arc;

/// Lightweight handle to a node inside a [`Taskflow`](crate::Taskflow) or
/// [`Subflow`](crate::Subflow) graph.
///
/// Handles are cheap to clone and remain valid as long as the graph that
/// created them. They carry identity only; edges and metadata are added
/// through the builder that produced the handle.
#[must_use]
#[derive(Debug, Clone)]
pub struct Task {
    pub(crate) node: Arc<Node>,
}

impl Task {
    /// Attach a human-readable name, used in diagnostics and observer
    /// records only; scheduling never looks at it.
    pub fn set_name(&self, name: impl Into<String>) {
        self.node.set_name(name);
    }

    /// The name previously set with [`set_name`](Self::set_name), if any.
    pub fn name(&self) -> Option<String> {
        self.node.name()
    }
}
