//! Atomics used by the work-stealing deque, switchable to `loom` models.
//!
//! Only `queue` goes through this shim: the deque is the one place where the
//! crate hand-rolls a lock-free protocol, so it is the one place that gets
//! exhaustive interleaving checks. The rest of the crate mutates shared state
//! through locks or simple counters and uses `std` atomics directly.

#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::sync::atomic::{fence, AtomicIsize, AtomicPtr, Ordering};
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use core::sync::atomic::{fence, AtomicIsize, AtomicPtr, Ordering};
}

pub(crate) use imp::*;
