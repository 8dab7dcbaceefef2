//! Per-submission run state.
//!
//! A [`Topology`] is created for every run-family call and carries everything
//! one submission needs: a snapshot of the taskflow's node list, the
//! outstanding-node counter that detects the end of a pass, the repeat
//! policy, the completion callback, and the result slot the caller observes
//! through a [`RunHandle`].
//!
//! Lifecycle: a topology is *pending* while queued behind an earlier run of
//! the same taskflow, *running* while its nodes execute, loops back through
//! reseeding if its policy asks for another pass, and is *done* once the
//! callback has fired and the result slot is set. The worker that finishes
//! the final pass promotes the next pending topology of the same taskflow.

use crate::{
    graph::{Graph, Node},
    types::TaskflowId,
};
use derive_more::Debug;
use parking_lot::{Condvar, Mutex};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;

/// Error carried by a failed run's result channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RunError {
    /// A node's body (or a subflow body) panicked. The panic was caught on
    /// the executing worker; nodes not depending on the failed one keep
    /// running and the policy's remaining passes still execute.
    #[error("task `{task}` panicked: {message}")]
    TaskPanicked {
        /// Name of the failing task, or `"<unnamed>"`.
        task: String,
        /// Panic payload rendered to a string.
        message: String,
    },
}

/// How many passes a topology makes over its graph.
pub(crate) enum RunPolicy {
    /// Exactly this many passes; zero is a valid no-op run.
    Times(usize),
    /// Repeat until the predicate returns true. Evaluated exactly once per
    /// completed pass, never before the first.
    Until(Box<dyn FnMut() -> bool + Send>),
}

impl core::fmt::Debug for RunPolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Times(n) => write!(f, "Times({n})"),
            Self::Until(_) => f.write_str("Until"),
        }
    }
}

/// Decision taken after a pass completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassOutcome {
    /// Reseed the graph and run another pass.
    Continue,
    /// The policy is satisfied; fulfill the topology.
    Done,
}

pub(crate) type Callback = Box<dyn FnOnce() + Send>;

/// One unit of scheduled work: a node plus the run it belongs to.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub(crate) topology: Arc<Topology>,
    pub(crate) node: Arc<Node>,
}

/// Run state of one submission. See the module docs.
#[derive(Debug)]
pub(crate) struct Topology {
    pub(crate) taskflow: TaskflowId,
    nodes: Vec<Arc<Node>>,
    /// Nodes of the current pass that have not completed yet, including any
    /// spawned by subflows. The decrement that reaches zero ends the pass.
    outstanding: AtomicUsize,
    /// Completed passes.
    passes: AtomicUsize,
    policy: Mutex<RunPolicy>,
    #[debug(skip)]
    callback: Mutex<Option<Callback>>,
    /// First captured task failure of this run.
    failure: Mutex<Option<RunError>>,
    /// Child graphs spawned during the current pass, kept alive until the
    /// pass ends.
    spawned: Mutex<Vec<Graph>>,
    result: Arc<ResultSlot>,
}

impl Topology {
    pub(crate) fn new(
        taskflow: TaskflowId,
        nodes: Vec<Arc<Node>>,
        policy: RunPolicy,
        callback: Option<Callback>,
    ) -> (Arc<Self>, RunHandle) {
        let result = Arc::new(ResultSlot::default());
        let topology = Arc::new(Self {
            taskflow,
            nodes,
            outstanding: AtomicUsize::new(0),
            passes: AtomicUsize::new(0),
            policy: Mutex::new(policy),
            callback: Mutex::new(callback),
            failure: Mutex::new(None),
            spawned: Mutex::new(Vec::new()),
            result: Arc::clone(&result),
        });
        (topology, RunHandle { slot: result })
    }

    /// Reset every node for a fresh pass and return the jobs for the
    /// zero-predecessor roots. The outstanding count is armed before any job
    /// is handed out.
    pub(crate) fn seed(self: &Arc<Self>) -> Vec<Job> {
        self.outstanding.store(self.nodes.len(), Ordering::Release);
        let mut roots = Vec::new();
        for node in &self.nodes {
            if node.reset_for_pass() == 0 {
                roots.push(Job {
                    topology: Arc::clone(self),
                    node: Arc::clone(node),
                });
            }
        }
        roots
    }

    /// Account for `count` subflow-spawned nodes joining the current pass.
    pub(crate) fn add_outstanding(&self, count: usize) {
        self.outstanding.fetch_add(count, Ordering::AcqRel);
    }

    /// Record one node's completion; true when it was the pass's last.
    pub(crate) fn finish_node(&self) -> bool {
        self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Keep a spawned child graph alive until the pass ends.
    pub(crate) fn keep_graph(&self, graph: Graph) {
        self.spawned.lock().push(graph);
    }

    pub(crate) fn drop_spawned_graphs(&self) {
        self.spawned.lock().clear();
    }

    /// Store the run's failure; the first one wins.
    pub(crate) fn record_failure(&self, error: RunError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(error);
        }
    }

    /// Count the pass that just completed and consult the policy.
    ///
    /// A panicking predicate ends the run: letting it unwind would take a
    /// worker thread with it and leave the topology stuck.
    pub(crate) fn advance(&self) -> PassOutcome {
        let completed = self.passes.fetch_add(1, Ordering::AcqRel) + 1;
        match &mut *self.policy.lock() {
            RunPolicy::Times(total) => {
                if completed < *total {
                    PassOutcome::Continue
                } else {
                    PassOutcome::Done
                }
            }
            RunPolicy::Until(predicate) => {
                match catch_unwind(AssertUnwindSafe(predicate)) {
                    Ok(false) => PassOutcome::Continue,
                    Ok(true) => PassOutcome::Done,
                    Err(_) => {
                        self.record_failure(RunError::TaskPanicked {
                            task: "<run_until predicate>".to_owned(),
                            message: "predicate panicked".to_owned(),
                        });
                        PassOutcome::Done
                    }
                }
            }
        }
    }

    /// Fire the completion callback, then set the result slot.
    ///
    /// Callback first: once `RunHandle::wait` returns, the callback has
    /// finished. A panicking callback is caught and logged so the worker
    /// survives; it does not overwrite a task failure.
    pub(crate) fn fulfill(&self) {
        if let Some(callback) = self.callback.lock().take() {
            if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                tracing::error!(taskflow = %self.taskflow, "completion callback panicked");
            }
        }
        let result = match self.failure.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        };
        self.result.set(result);
    }
}

#[derive(Debug, Default)]
struct ResultSlot {
    state: Mutex<Option<Result<(), RunError>>>,
    ready: Condvar,
}

impl ResultSlot {
    fn set(&self, result: Result<(), RunError>) {
        let mut state = self.state.lock();
        *state = Some(result);
        self.ready.notify_all();
    }
}

/// Caller-side handle to one run's result channel.
///
/// Returned by the executor's run family. Dropping the handle does not
/// cancel or detach the run; the executor tracks it either way and
/// [`Executor::wait_for_all`](crate::Executor::wait_for_all) still covers
/// it.
#[must_use]
#[derive(Debug, Clone)]
pub struct RunHandle {
    slot: Arc<ResultSlot>,
}

impl RunHandle {
    /// Block until the run is done. By the time this returns the completion
    /// callback, if any, has finished.
    pub fn wait(&self) -> Result<(), RunError> {
        let mut state = self.slot.state.lock();
        while state.is_none() {
            self.slot.ready.wait(&mut state);
        }
        state.clone().expect("RunHandle::wait: checked above")
    }

    /// The run's result if it is already done.
    pub fn try_wait(&self) -> Option<Result<(), RunError>> {
        self.slot.state.lock().clone()
    }

    /// Block until the run is done or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), RunError>> {
        let mut state = self.slot.state.lock();
        if state.is_none() {
            self.slot.ready.wait_for(&mut state, timeout);
        }
        state.clone()
    }
}
