//! Profiling hooks around node execution.
//!
//! An executor carries at most one [`Observer`]. The executing worker calls
//! [`on_entry`](Observer::on_entry) immediately before a node's body and
//! [`on_exit`](Observer::on_exit) immediately after it returns: exactly
//! once per node execution, entry then exit, on the executing thread. For a
//! dynamic task the exit hook fires when the body call returns, not when a
//! joined child graph drains; the deferred completion of such a node fires
//! no hooks. Pairing is guaranteed per node; no ordering is promised across
//! nodes of unrelated taskflows.
//!
//! Observers are profiling collaborators only: nothing they do feeds back
//! into scheduling.

use crate::types::{FxHashMap, WorkerId};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Instant;

/// Entry/exit hook pair invoked around every node body.
///
/// Install with [`Executor::make_observer`](crate::Executor::make_observer).
/// Implementations must be cheap and non-blocking; the executing worker
/// calls them inline.
pub trait Observer: Send + Sync + 'static {
    /// Called on the executing worker right before a node's body.
    fn on_entry(&self, worker: WorkerId, task: Option<&str>);

    /// Called on the executing worker right after the node's body returns.
    fn on_exit(&self, worker: WorkerId, task: Option<&str>);
}

/// Built-in observer recording one timed span per node execution.
///
/// Timestamps are microseconds since the observer was created.
/// [`dump`](Self::dump) serializes the recording in Chrome trace-event
/// format, loadable by `chrome://tracing` and Perfetto.
#[derive(Debug)]
pub struct TimelineObserver {
    started: Instant,
    inner: Mutex<TimelineInner>,
}

#[derive(Debug, Default)]
struct TimelineInner {
    /// Span opened by `on_entry`, keyed by worker; hooks never nest on one
    /// worker, so a single slot per worker suffices.
    open: FxHashMap<WorkerId, OpenSpan>,
    spans: Vec<TaskSpan>,
}

#[derive(Debug)]
struct OpenSpan {
    name: Option<String>,
    begin_us: u64,
}

/// One recorded node execution.
#[derive(Debug, Clone)]
struct TaskSpan {
    name: Option<String>,
    worker: WorkerId,
    begin_us: u64,
    end_us: u64,
}

/// Chrome trace-event row; `ph = "X"` is a complete (duration) event.
#[derive(Serialize)]
struct TraceEvent<'a> {
    name: &'a str,
    ph: &'static str,
    ts: u64,
    dur: u64,
    pid: u32,
    tid: WorkerId,
}

impl Default for TimelineObserver {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(TimelineInner::default()),
        }
    }
}

impl TimelineObserver {
    fn now_us(&self) -> u64 {
        self.started.elapsed().as_micros() as u64
    }

    /// Number of completed entry/exit pairs recorded so far.
    pub fn num_tasks(&self) -> usize {
        self.inner.lock().spans.len()
    }

    /// Serialize the recording as a Chrome trace-event JSON array.
    pub fn dump(&self) -> String {
        let inner = self.inner.lock();
        let events: Vec<TraceEvent<'_>> = inner
            .spans
            .iter()
            .map(|span| TraceEvent {
                name: span.name.as_deref().unwrap_or("task"),
                ph: "X",
                ts: span.begin_us,
                dur: span.end_us.saturating_sub(span.begin_us),
                pid: 0,
                tid: span.worker,
            })
            .collect();
        serde_json::to_string(&events).expect("TimelineObserver::dump: serialization")
    }

    /// Discard everything recorded so far.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.open.clear();
        inner.spans.clear();
    }
}

impl Observer for TimelineObserver {
    fn on_entry(&self, worker: WorkerId, task: Option<&str>) {
        let begin_us = self.now_us();
        self.inner.lock().open.insert(
            worker,
            OpenSpan {
                name: task.map(str::to_owned),
                begin_us,
            },
        );
    }

    fn on_exit(&self, worker: WorkerId, _task: Option<&str>) {
        let end_us = self.now_us();
        let mut inner = self.inner.lock();
        if let Some(OpenSpan { name, begin_us }) = inner.open.remove(&worker) {
            inner.spans.push(TaskSpan {
                name,
                worker,
                begin_us,
                end_us,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_one_span_per_pair() {
        let observer = TimelineObserver::default();
        observer.on_entry(0, Some("a"));
        observer.on_exit(0, Some("a"));
        observer.on_entry(1, None);
        observer.on_exit(1, None);
        assert_eq!(observer.num_tasks(), 2);

        observer.clear();
        assert_eq!(observer.num_tasks(), 0);
    }

    #[test]
    fn dump_is_valid_trace_json() {
        let observer = TimelineObserver::default();
        observer.on_entry(3, Some("compress"));
        observer.on_exit(3, Some("compress"));

        let dump = observer.dump();
        let parsed: serde_json::Value = serde_json::from_str(&dump).unwrap();
        let events = parsed.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["name"], "compress");
        assert_eq!(events[0]["ph"], "X");
        assert_eq!(events[0]["tid"], 3);
    }
}
