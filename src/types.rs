use derive_more::Display;
use rustc_hash::FxBuildHasher;
use std::collections::HashMap as _HashMap;

/// Unique identity of a [`Taskflow`](crate::Taskflow) within the process.
///
/// Used by the executor to key the per-taskflow run queue; never reused.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("taskflow-{_0}")]
pub struct TaskflowId(pub(crate) u64);

/// Index of a worker thread within its owning executor's pool.
///
/// Stable for the lifetime of the executor; passed to observer hooks so
/// recorded timelines can be grouped per thread.
pub type WorkerId = usize;

pub(crate) type FxHashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
