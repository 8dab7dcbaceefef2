//! Nodes and the graphs that own them.
//!
//! A [`Node`] is a single schedulable unit: a body, an edge list, and the two
//! counters the scheduler works with. The body and the edge list sit behind
//! mutexes, but neither is contended in a well-formed program: edges are
//! written while building (exclusive access through the builder) and a body
//! is executed by exactly one worker per pass, because a node is enqueued
//! only by the single thread that observes its join counter reach zero. The
//! locks exist so that a caller who violates the build-while-running
//! precondition gets unspecified scheduling, not undefined behavior.
//!
//! A [`Graph`] is just the owning collection. The persistent flavor lives in
//! a [`Taskflow`](crate::Taskflow) and is reseeded run after run; the
//! transient flavor is built by a [`Subflow`](crate::Subflow) inside a
//! dynamic task and lives until its topology finishes the current pass.

use crate::{subflow::Subflow, task::Task};
use derive_more::Debug;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

/// The two kinds of node bodies, matched by the scheduler at dispatch.
pub(crate) enum NodeBody {
    /// Plain callable; runs and completes.
    Static(Box<dyn FnMut() + Send>),
    /// Dynamic-tasking callable; receives a [`Subflow`] builder and may
    /// spawn a child graph that is spliced into the running topology.
    Dynamic(Box<dyn FnMut(&mut Subflow) + Send>),
}

impl core::fmt::Debug for NodeBody {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Static(_) => "Static",
            Self::Dynamic(_) => "Dynamic",
        })
    }
}

/// Edge list of a node, written while the owning graph is being built.
#[derive(Debug, Default)]
pub(crate) struct NodeEdges {
    /// Outgoing edges. May point into another graph: joined subflows link
    /// child sinks back to their parent node.
    #[debug(skip)]
    pub(crate) successors: Vec<Arc<Node>>,
    /// Incoming edge count; the value the join counter is reloaded with at
    /// the start of every pass.
    pub(crate) num_predecessors: usize,
}

/// A single schedulable unit of work.
#[derive(Debug)]
pub(crate) struct Node {
    name: Mutex<Option<String>>,
    #[debug(skip)]
    pub(crate) body: Mutex<NodeBody>,
    pub(crate) edges: Mutex<NodeEdges>,
    /// Remaining unfinished predecessors in the current pass. The completer
    /// that decrements this to zero enqueues the node.
    pub(crate) join: AtomicUsize,
    /// Set on a dynamic node whose joined child graph is still draining; the
    /// next time the node is dequeued it completes without re-running its
    /// body.
    pub(crate) spawned: AtomicBool,
}

impl Node {
    pub(crate) fn new(body: NodeBody) -> Arc<Self> {
        Arc::new(Self {
            name: Mutex::new(None),
            body: Mutex::new(body),
            edges: Mutex::new(NodeEdges::default()),
            join: AtomicUsize::new(0),
            spawned: AtomicBool::new(false),
        })
    }

    pub(crate) fn name(&self) -> Option<String> {
        self.name.lock().clone()
    }

    pub(crate) fn set_name(&self, name: impl Into<String>) {
        *self.name.lock() = Some(name.into());
    }

    /// Reload the per-pass counters from the stored edge structure and
    /// report the predecessor count (zero means the node seeds the pass).
    pub(crate) fn reset_for_pass(&self) -> usize {
        let num_predecessors = self.edges.lock().num_predecessors;
        self.join.store(num_predecessors, Ordering::Release);
        self.spawned.store(false, Ordering::Release);
        num_predecessors
    }
}

/// An owned collection of nodes forming one dependency structure.
#[derive(Debug, Default)]
pub(crate) struct Graph {
    nodes: Vec<Arc<Node>>,
}

impl Graph {
    pub(crate) fn emplace(&mut self, body: NodeBody) -> Task {
        let node = Node::new(body);
        self.nodes.push(Arc::clone(&node));
        Task { node }
    }

    /// Add the edge `before -> after` and bump `after`'s predecessor count.
    ///
    /// Both endpoints must belong to this graph; edges across graphs (other
    /// than the implicit subflow-join edges the scheduler adds itself) are a
    /// caller precondition violation. No cycle check is performed: a cyclic
    /// graph deadlocks its run, it does not fail.
    pub(crate) fn precede(&mut self, before: &Task, after: &Task) {
        debug_assert!(self.contains(before), "`before` built by another flow");
        debug_assert!(self.contains(after), "`after` built by another flow");
        before
            .node
            .edges
            .lock()
            .successors
            .push(Arc::clone(&after.node));
        after.node.edges.lock().num_predecessors += 1;
    }

    pub(crate) fn contains(&self, task: &Task) -> bool {
        self.nodes.iter().any(|node| Arc::ptr_eq(node, &task.node))
    }

    pub(crate) fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    /// Clone of the node list, taken by a topology at submission.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Node>> {
        self.nodes.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
