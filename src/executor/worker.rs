//! The per-thread scheduling loop.
//!
//! Every worker repeats: pop the bottom of its own queue; failing that,
//! sweep the other workers' queues round-robin and steal from the top;
//! failing that, take from the shared injector; failing everything, park
//! briefly and retry. The loop ends only when the executor shuts down,
//! which happens after all submitted topologies have drained.
//!
//! Readiness propagation is the join-counter protocol: the worker that
//! completes a node decrements each successor's counter, and the decrement
//! that observes zero enqueues that successor onto the worker's own queue.
//! `AcqRel` on the decrement makes every predecessor's effects visible to
//! the successor's body. The same decrement-and-test drives pass completion
//! through the topology's outstanding count.

use super::ExecutorInner;
use crate::{
    graph::{Node, NodeBody},
    queue::{Steal, WorkQueue},
    subflow::Subflow,
    topology::{Job, PassOutcome, RunError, Topology},
};
use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{atomic::Ordering, Arc},
    time::Duration,
};
use tracing::{debug, trace};

pub(super) struct WorkerCtx {
    pub(super) id: usize,
    pub(super) queue: WorkQueue<Job>,
    pub(super) inner: Arc<ExecutorInner>,
}

/// How a body invocation left its node.
enum BodyOutcome {
    /// The node is finished; release successors and count it.
    Finished,
    /// A joined subflow was spawned: completion is deferred until the child
    /// graph drains and re-enqueues the node.
    Deferred,
}

pub(super) fn worker_loop(ctx: WorkerCtx) {
    debug!(worker = ctx.id, "worker started");
    loop {
        if let Some(job) = ctx.queue.pop() {
            execute(&ctx, job);
            continue;
        }
        if let Some(job) = find_work(&ctx) {
            execute(&ctx, job);
            continue;
        }
        if ctx.inner.is_shutdown() {
            break;
        }
        park(&ctx);
    }
    debug!(worker = ctx.id, "worker stopped");
}

/// Steal sweep, then the injector. Victims are visited round-robin starting
/// after this worker's own index; a sweep that only lost races is repeated.
fn find_work(ctx: &WorkerCtx) -> Option<Job> {
    let stealers = ctx.inner.stealers();
    let num_workers = stealers.len();
    loop {
        let mut contended = false;
        for offset in 1..num_workers {
            let victim = (ctx.id + offset) % num_workers;
            match stealers[victim].steal() {
                Steal::Success(job) => return Some(job),
                Steal::Retry => contended = true,
                Steal::Empty => {}
            }
        }
        if !contended {
            break;
        }
    }
    ctx.inner.pop_injected()
}

/// Park on the idle condvar with a bounded timeout. The timeout keeps a
/// worker from sleeping through a wake-up it raced with; correctness never
/// depends on a notification arriving.
fn park(ctx: &WorkerCtx) {
    let (injector, idle) = ctx.inner.injector();
    ctx.inner.sleepers().fetch_add(1, Ordering::SeqCst);
    let mut guard = injector.lock();
    if guard.is_empty() && !ctx.inner.is_shutdown() {
        let _ = idle.wait_for(&mut guard, Duration::from_millis(1));
    }
    drop(guard);
    ctx.inner.sleepers().fetch_sub(1, Ordering::SeqCst);
}

fn execute(ctx: &WorkerCtx, job: Job) {
    let Job { topology, node } = job;

    if node.spawned.swap(false, Ordering::AcqRel) {
        // Deferred completion of a dynamic node whose joined child graph
        // just drained. The body already ran; no observer hooks here.
        complete(ctx, &topology, &node);
        return;
    }

    let observer = ctx.inner.observer();
    let name = if observer.is_some() { node.name() } else { None };
    if let Some(observer) = &observer {
        observer.on_entry(ctx.id, name.as_deref());
    }
    let outcome = run_body(ctx, &topology, &node);
    if let Some(observer) = &observer {
        observer.on_exit(ctx.id, name.as_deref());
    }

    match outcome {
        BodyOutcome::Finished => complete(ctx, &topology, &node),
        BodyOutcome::Deferred => {}
    }
}

fn run_body(ctx: &WorkerCtx, topology: &Arc<Topology>, node: &Arc<Node>) -> BodyOutcome {
    // Exclusive by scheduling: a node is enqueued once per pass, and runs of
    // one taskflow never overlap. The lock is uncontended unless the caller
    // breaks that contract, in which case bodies serialize instead of racing.
    let mut body = node.body.lock();
    match &mut *body {
        NodeBody::Static(body) => {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(body)) {
                topology.record_failure(panic_error(node, payload));
            }
            BodyOutcome::Finished
        }
        NodeBody::Dynamic(body) => {
            let mut subflow = Subflow::new();
            match catch_unwind(AssertUnwindSafe(|| body(&mut subflow))) {
                Err(payload) => {
                    // Whatever the body half-built is discarded; the node
                    // completes normally and the failure travels on the
                    // topology's channel.
                    topology.record_failure(panic_error(node, payload));
                    BodyOutcome::Finished
                }
                Ok(()) => splice(ctx, topology, node, subflow),
            }
        }
    }
}

/// Fold a populated subflow into the running topology.
///
/// Joined: child sinks get an implicit edge to the spawning node, whose join
/// counter is reloaded with the sink count; the last sink to finish
/// re-enqueues it for deferred completion. Detached: the spawning node
/// completes now and the children only gate the topology's overall end.
fn splice(
    ctx: &WorkerCtx,
    topology: &Arc<Topology>,
    parent: &Arc<Node>,
    subflow: Subflow,
) -> BodyOutcome {
    let (graph, detached) = subflow.into_parts();
    if graph.is_empty() {
        return BodyOutcome::Finished;
    }

    let mut roots = Vec::new();
    let mut sinks = Vec::new();
    for node in graph.nodes() {
        if node.reset_for_pass() == 0 {
            roots.push(Arc::clone(node));
        }
        // Outdegree before the implicit edges below.
        if node.edges.lock().successors.is_empty() {
            sinks.push(Arc::clone(node));
        }
    }

    if !detached {
        for sink in &sinks {
            sink.edges.lock().successors.push(Arc::clone(parent));
        }
        // The node's predecessor phase is over; its join counter now counts
        // child sinks. Arm it before any child can possibly finish.
        parent.join.store(sinks.len(), Ordering::Release);
        parent.spawned.store(true, Ordering::Release);
    }

    trace!(
        worker = ctx.id,
        nodes = graph.len(),
        detached,
        "subflow spawned"
    );
    topology.add_outstanding(graph.len());
    topology.keep_graph(graph);
    schedule(ctx, topology, roots);

    if detached {
        BodyOutcome::Finished
    } else {
        BodyOutcome::Deferred
    }
}

/// Release the node's successors, then count its completion; the worker
/// whose decrement ends the pass carries on to the pass epilogue.
fn complete(ctx: &WorkerCtx, topology: &Arc<Topology>, node: &Arc<Node>) {
    let ready: Vec<Arc<Node>> = {
        let edges = node.edges.lock();
        edges
            .successors
            .iter()
            .filter(|successor| successor.join.fetch_sub(1, Ordering::AcqRel) == 1)
            .map(Arc::clone)
            .collect()
    };
    schedule(ctx, topology, ready);

    if topology.finish_node() {
        finish_pass(ctx, topology);
    }
}

/// Push ready nodes onto the local queue, overflowing to the injector.
fn schedule(ctx: &WorkerCtx, topology: &Arc<Topology>, nodes: Vec<Arc<Node>>) {
    if nodes.is_empty() {
        return;
    }
    let mut overflow = Vec::new();
    for node in nodes {
        let job = Job {
            topology: Arc::clone(topology),
            node,
        };
        if let Err(job) = ctx.queue.push(job) {
            overflow.push(job);
        }
    }
    if overflow.is_empty() {
        ctx.inner.notify_idle();
    } else {
        ctx.inner.inject(overflow);
    }
}

/// Pass epilogue, run by the single worker that observed the outstanding
/// count reach zero: consult the policy, then either reseed the same graph
/// or fulfill the topology and promote the taskflow's next queued run.
fn finish_pass(ctx: &WorkerCtx, topology: &Arc<Topology>) {
    topology.drop_spawned_graphs();
    match topology.advance() {
        PassOutcome::Continue => {
            trace!(taskflow = %topology.taskflow, "pass complete, reseeding");
            ctx.inner.launch(topology);
        }
        PassOutcome::Done => {
            debug!(taskflow = %topology.taskflow, "run done");
            topology.fulfill();
            ctx.inner.topology_done(topology.taskflow);
        }
    }
}

fn panic_error(node: &Node, payload: Box<dyn Any + Send>) -> RunError {
    let message = match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_owned(),
            Err(_) => "task body panicked".to_owned(),
        },
    };
    RunError::TaskPanicked {
        task: node.name().unwrap_or_else(|| "<unnamed>".to_owned()),
        message,
    }
}
