//! Executor construction parameters.

use std::num::NonZeroUsize;

/// Tuning knobs for [`Executor::with_config`](crate::Executor::with_config).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of worker threads. Defaults to the platform-reported hardware
    /// parallelism, falling back to one.
    pub workers: usize,
    /// Stack size of each worker thread.
    pub stack_size: usize,
    /// Capacity of each worker's local work-stealing queue. Nodes that do
    /// not fit overflow into the executor's shared injection queue, so this
    /// bounds memory, not the schedulable graph size.
    pub queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            stack_size: 2 * 1024 * 1024,
            queue_capacity: 256,
        }
    }
}
