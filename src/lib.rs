//! Work-stealing executor for task dependency graphs with dynamic subflows.
//!
//! This crate schedules directed acyclic graphs of tasks over a pool of
//! worker threads. It:
//! - Separates the graph (a reusable [`Taskflow`]) from its runs: one
//!   taskflow can be submitted many times, and runs of the same taskflow
//!   execute in strict submission order while unrelated taskflows run
//!   concurrently on the same pool.
//! - Balances load with per-worker Chase-Lev deques: a worker pops its own
//!   most-recently-pushed node for locality and steals the oldest node from
//!   a busy peer when idle.
//! - Propagates readiness with atomic join counters: the worker whose
//!   decrement drops a successor's counter to zero enqueues it, so there is
//!   no global ready-set lock.
//! - Supports dynamic tasking: a running task receives a [`Subflow`] builder
//!   and can spawn an entire child graph at runtime, either joined into its
//!   own dependency chain or detached to run independently.
//! - Repeats runs by count ([`Executor::run_n`]) or until a predicate holds
//!   ([`Executor::run_until`]), and reports completion through a
//!   [`RunHandle`] future plus an optional callback.
//!
//! Key modules:
//! - `taskflow`/`subflow`: graph building (`emplace`, `precede`).
//! - `executor`: the worker pool, scheduling loop, and run orchestration.
//! - `topology`: per-run state (outstanding-node count, repeat policy,
//!   result channel).
//! - `queue`: the work-stealing deque, isolated so its steal/pop races can
//!   be model-checked on their own.
//! - `observer`: profiling hooks around every node execution.
//!
//! Quick start:
//! 1. Build a [`Taskflow`]: `emplace` bodies, wire edges with `precede`.
//! 2. Create an [`Executor`] (defaults to one worker per hardware thread).
//! 3. Submit with a run-family method and `wait()` on the returned handle,
//!    or `wait_for_all()` on the executor.
//!
//! ```
//! use dagflow::{Executor, Taskflow};
//!
//! let mut tf = Taskflow::named("diamond");
//! let a = tf.emplace(|| {});
//! let b = tf.emplace(|| {});
//! let c = tf.emplace(|| {});
//! let d = tf.emplace(|| {});
//! tf.precede(&a, [&b, &c]);
//! tf.precede(&b, [&d]);
//! tf.precede(&c, [&d]);
//!
//! let executor = Executor::new();
//! executor.run(&tf).wait().unwrap();
//! ```
//!
//! Graphs must be acyclic: no cycle check is performed, and a cyclic graph
//! leaves its run incomplete forever. A taskflow must not be mutated while
//! one of its runs is in flight; doing so is memory-safe but leaves the
//! run's behavior unspecified.

#![warn(missing_docs)]

pub mod config;
pub mod executor;
mod graph;
pub mod observer;
mod queue;
pub mod subflow;
mod sync;
pub mod task;
pub mod taskflow;
pub mod topology;
mod types;

pub use config::ExecutorConfig;
pub use executor::Executor;
pub use observer::{Observer, TimelineObserver};
pub use subflow::Subflow;
pub use task::Task;
pub use taskflow::Taskflow;
pub use topology::{RunError, RunHandle};
pub use types::{TaskflowId, WorkerId};
