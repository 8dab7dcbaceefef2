//! The worker pool and run orchestration.
//!
//! An [`Executor`] owns a fixed pool of worker threads, one work-stealing
//! queue per worker plus a shared injection queue, the per-taskflow chain of
//! pending runs, and the optional observer. Workers start at construction
//! and are joined when the executor drops; dropping first waits for every
//! submitted run, mirroring the guarantee of
//! [`wait_for_all`](Executor::wait_for_all).
//!
//! Run submissions create a [`Topology`] and either launch it immediately
//! (taskflow idle) or queue it behind the taskflow's in-flight run; the
//! worker that completes a run promotes the next queued one, so runs of one
//! taskflow never interleave even while unrelated taskflows execute
//! concurrently on the same pool.

mod worker;

use crate::{
    config::ExecutorConfig,
    observer::Observer,
    queue::{Stealer, WorkQueue},
    taskflow::Taskflow,
    topology::{Callback, Job, RunHandle, RunPolicy, Topology},
    types::{FxHashMap, TaskflowId},
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::{
    collections::{hash_map::Entry, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::JoinHandle,
};
use tracing::debug;

/// Work-stealing executor for [`Taskflow`] graphs.
///
/// # Example
///
/// ```
/// use dagflow::{Executor, Taskflow};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let counter = Arc::new(AtomicUsize::new(0));
/// let mut tf = Taskflow::new();
/// let tick = {
///     let counter = Arc::clone(&counter);
///     tf.emplace(move || {
///         counter.fetch_add(1, Ordering::Relaxed);
///     })
/// };
/// tick.set_name("tick");
///
/// let executor = Executor::with_workers(2);
/// executor.run_n(&tf, 3).wait().unwrap();
/// assert_eq!(counter.load(Ordering::Relaxed), 3);
/// ```
#[must_use]
pub struct Executor {
    inner: Arc<ExecutorInner>,
    workers: Vec<JoinHandle<()>>,
}

/// Queue of runs submitted for one taskflow while an earlier run is in
/// flight. Presence of the map entry itself marks the in-flight run.
#[derive(Default)]
struct FlowQueue {
    pending: VecDeque<Arc<Topology>>,
}

pub(crate) struct ExecutorInner {
    stealers: Vec<Stealer<Job>>,
    /// Entry queue for jobs produced off the worker pool (run submissions,
    /// pass reseeds) and overflow from full local queues.
    injector: Mutex<VecDeque<Job>>,
    /// Signaled when the injector gains work or shutdown begins; paired
    /// with the `injector` mutex.
    idle: Condvar,
    /// Workers currently parked on `idle`.
    sleepers: AtomicUsize,
    shutdown: AtomicBool,
    flows: Mutex<FxHashMap<TaskflowId, FlowQueue>>,
    /// Topologies submitted and not yet done, across all taskflows.
    inflight: AtomicUsize,
    wait_lock: Mutex<()>,
    wait_ready: Condvar,
    observer: RwLock<Option<Arc<dyn Observer>>>,
}

impl Executor {
    /// Create an executor with one worker per unit of available hardware
    /// parallelism.
    ///
    /// # Panics
    /// If a worker thread cannot be spawned; the executor is unusable in
    /// that case and construction is fatal.
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    /// Create an executor with exactly `workers` worker threads (at least
    /// one).
    ///
    /// # Panics
    /// See [`new`](Self::new).
    pub fn with_workers(workers: usize) -> Self {
        Self::with_config(ExecutorConfig {
            workers,
            ..ExecutorConfig::default()
        })
    }

    /// Create an executor from explicit configuration.
    ///
    /// # Panics
    /// See [`new`](Self::new).
    pub fn with_config(config: ExecutorConfig) -> Self {
        let num_workers = config.workers.max(1);
        let queues: Vec<_> = (0..num_workers)
            .map(|_| WorkQueue::with_capacity(config.queue_capacity))
            .collect();
        let inner = Arc::new(ExecutorInner {
            stealers: queues.iter().map(WorkQueue::stealer).collect(),
            injector: Mutex::new(VecDeque::new()),
            idle: Condvar::new(),
            sleepers: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            flows: Mutex::new(FxHashMap::default()),
            inflight: AtomicUsize::new(0),
            wait_lock: Mutex::new(()),
            wait_ready: Condvar::new(),
            observer: RwLock::new(None),
        });

        let workers = queues
            .into_iter()
            .enumerate()
            .map(|(id, queue)| {
                let inner = Arc::clone(&inner);
                std::thread::Builder::new()
                    .name(format!("dagflow-worker-{id}"))
                    .stack_size(config.stack_size)
                    .spawn(move || worker::worker_loop(worker::WorkerCtx { id, queue, inner }))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        debug!(workers = num_workers, "executor started");
        Self { inner, workers }
    }

    /// Number of worker threads in the pool.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Run the taskflow's graph once.
    pub fn run(&self, taskflow: &Taskflow) -> RunHandle {
        self.submit(taskflow, RunPolicy::Times(1), None)
    }

    /// Like [`run`](Self::run), with a completion callback invoked once, on
    /// a worker thread, after the pass finishes.
    pub fn run_with(
        &self,
        taskflow: &Taskflow,
        callback: impl FnOnce() + Send + 'static,
    ) -> RunHandle {
        self.submit(taskflow, RunPolicy::Times(1), Some(Box::new(callback)))
    }

    /// Run the taskflow's graph exactly `count` times. `count == 0` is a
    /// valid run that executes nothing and completes immediately.
    pub fn run_n(&self, taskflow: &Taskflow, count: usize) -> RunHandle {
        self.submit(taskflow, RunPolicy::Times(count), None)
    }

    /// Like [`run_n`](Self::run_n), with a completion callback invoked once
    /// after the final pass.
    pub fn run_n_with(
        &self,
        taskflow: &Taskflow,
        count: usize,
        callback: impl FnOnce() + Send + 'static,
    ) -> RunHandle {
        self.submit(taskflow, RunPolicy::Times(count), Some(Box::new(callback)))
    }

    /// Run the taskflow's graph repeatedly until `predicate` returns true.
    /// The predicate is evaluated exactly once per completed pass, never
    /// before the first.
    pub fn run_until(
        &self,
        taskflow: &Taskflow,
        predicate: impl FnMut() -> bool + Send + 'static,
    ) -> RunHandle {
        self.submit(taskflow, RunPolicy::Until(Box::new(predicate)), None)
    }

    /// Like [`run_until`](Self::run_until), with a completion callback
    /// invoked once after the final pass.
    pub fn run_until_with(
        &self,
        taskflow: &Taskflow,
        predicate: impl FnMut() -> bool + Send + 'static,
        callback: impl FnOnce() + Send + 'static,
    ) -> RunHandle {
        self.submit(
            taskflow,
            RunPolicy::Until(Box::new(predicate)),
            Some(Box::new(callback)),
        )
    }

    /// Block the calling thread until every topology submitted to this
    /// executor, across all taskflows, is done.
    pub fn wait_for_all(&self) {
        let mut guard = self.inner.wait_lock.lock();
        while self.inner.inflight.load(Ordering::SeqCst) != 0 {
            self.inner.wait_ready.wait(&mut guard);
        }
    }

    /// Construct, install, and return an observer of type `O`.
    ///
    /// At most one observer is active at a time; installing a new one
    /// replaces the previous, which stops receiving hooks immediately but
    /// stays alive through its returned handle.
    pub fn make_observer<O: Observer + Default>(&self) -> Arc<O> {
        let observer = Arc::new(O::default());
        *self.inner.observer.write() = Some(Arc::clone(&observer) as Arc<dyn Observer>);
        observer
    }

    /// Uninstall the current observer, if any.
    pub fn remove_observer(&self) {
        *self.inner.observer.write() = None;
    }

    fn submit(
        &self,
        taskflow: &Taskflow,
        policy: RunPolicy,
        callback: Option<Callback>,
    ) -> RunHandle {
        let immediate = taskflow.is_empty() || matches!(policy, RunPolicy::Times(0));
        let (topology, handle) = Topology::new(
            taskflow.id(),
            taskflow.graph().snapshot(),
            policy,
            callback,
        );

        if immediate {
            // Nothing to execute: fulfill on the submitting thread without
            // entering the taskflow's run chain.
            topology.fulfill();
            return handle;
        }

        self.inner.inflight.fetch_add(1, Ordering::SeqCst);
        debug!(taskflow = %topology.taskflow, "run submitted");

        let launch_now = {
            let mut flows = self.inner.flows.lock();
            match flows.entry(topology.taskflow) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().pending.push_back(Arc::clone(&topology));
                    false
                }
                Entry::Vacant(entry) => {
                    entry.insert(FlowQueue::default());
                    true
                }
            }
        };
        if launch_now {
            self.inner.launch(&topology);
        }
        handle
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.wait_for_all();
        self.inner.shutdown.store(true, Ordering::Release);
        // Taking the injector lock orders the shutdown store before any
        // worker's park decision, so no worker sleeps through it.
        drop(self.inner.injector.lock());
        self.inner.idle.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        debug!("executor stopped");
    }
}

impl ExecutorInner {
    /// Seed a topology's first (or next) pass into the injection queue.
    pub(crate) fn launch(&self, topology: &Arc<Topology>) {
        let roots = topology.seed();
        self.inject(roots);
    }

    /// Queue jobs on the injector and wake the pool.
    pub(crate) fn inject(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        let mut injector = self.injector.lock();
        injector.extend(jobs);
        drop(injector);
        self.idle.notify_all();
    }

    pub(crate) fn pop_injected(&self) -> Option<Job> {
        self.injector.lock().pop_front()
    }

    /// Wake one parked worker, if any. Used after pushes to a local queue,
    /// which parked workers can only reach by stealing.
    pub(crate) fn notify_idle(&self) {
        if self.sleepers.load(Ordering::Relaxed) > 0 {
            self.idle.notify_one();
        }
    }

    pub(crate) fn observer(&self) -> Option<Arc<dyn Observer>> {
        self.observer.read().clone()
    }

    pub(crate) fn stealers(&self) -> &[Stealer<Job>] {
        &self.stealers
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn sleepers(&self) -> &AtomicUsize {
        &self.sleepers
    }

    pub(crate) fn injector(&self) -> (&Mutex<VecDeque<Job>>, &Condvar) {
        (&self.injector, &self.idle)
    }

    /// A topology reached its final state: promote the taskflow's next
    /// queued run, then release `wait_for_all` waiters.
    pub(crate) fn topology_done(&self, taskflow: TaskflowId) {
        let next = {
            let mut flows = self.flows.lock();
            match flows.get_mut(&taskflow) {
                Some(queue) => match queue.pending.pop_front() {
                    Some(next) => Some(next),
                    None => {
                        flows.remove(&taskflow);
                        None
                    }
                },
                None => None,
            }
        };
        if let Some(next) = next {
            debug!(taskflow = %taskflow, "promoting queued run");
            self.launch(&next);
        }

        self.inflight.fetch_sub(1, Ordering::SeqCst);
        let _guard = self.wait_lock.lock();
        self.wait_ready.notify_all();
    }
}
