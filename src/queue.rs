//! Chase-Lev work-stealing deque.
//!
//! Each worker thread owns one [`WorkQueue`]: the owner pushes and pops at the
//! bottom (most-recently-pushed first, preserving locality), while any number
//! of [`Stealer`] handles concurrently take the oldest element from the top.
//!
//! The ring has a fixed capacity; a full `push` hands the element back so the
//! caller can overflow it elsewhere (the executor routes overflow through its
//! shared injection queue). Keeping the buffer fixed means no memory is ever
//! reclaimed while stealers may race on it.
//!
//! Slots hold raw pointers to boxed elements rather than the elements
//! themselves. A stealer speculatively reads the slot *before* claiming the
//! index with a CAS on `top`; with pointer-sized slots that speculative read
//! is a plain atomic load, and only the unique CAS winner ever dereferences
//! the pointer. This sidesteps the torn-read hazard of the classic algorithm
//! without an epoch collector.

use crate::sync::{fence, AtomicIsize, AtomicPtr, Ordering};
use core::marker::PhantomData;
use std::sync::Arc;

/// Outcome of a steal attempt.
#[must_use]
#[derive(Debug)]
pub(crate) enum Steal<T> {
    /// The queue was observed empty.
    Empty,
    /// Lost a race with the owner or another stealer; worth retrying.
    Retry,
    /// Took the oldest element.
    Success(T),
}

/// Owner handle of the deque. Not clonable: `push`/`pop` are single-producer
/// operations and the type system keeps them on one thread.
#[must_use]
pub(crate) struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

/// Shared handle used to take elements from the top of another worker's
/// queue. Cheap to clone.
#[must_use]
pub(crate) struct Stealer<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    /// Steal end. Monotonically increasing; claimed by CAS.
    top: AtomicIsize,
    /// Owner end. Written only by the owner.
    bottom: AtomicIsize,
    slots: Box<[AtomicPtr<T>]>,
    mask: usize,
    _marker: PhantomData<T>,
}

// SAFETY: Elements are moved through the queue (never shared by reference),
// so crossing threads only requires `T: Send`. The index protocol guarantees
// each element is claimed by exactly one thread.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Inner<T> {
    fn slot(&self, index: isize) -> &AtomicPtr<T> {
        &self.slots[index as usize & self.mask]
    }
}

impl<T> WorkQueue<T> {
    /// Create a deque holding at most `capacity` elements (rounded up to a
    /// power of two).
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| AtomicPtr::new(core::ptr::null_mut()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                top: AtomicIsize::new(0),
                bottom: AtomicIsize::new(0),
                slots,
                mask: capacity - 1,
                _marker: PhantomData,
            }),
        }
    }

    /// Create a stealer handle for this queue.
    pub(crate) fn stealer(&self) -> Stealer<T> {
        Stealer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Push onto the bottom. Returns the element back if the ring is full.
    pub(crate) fn push(&self, value: T) -> Result<(), T> {
        let inner = &*self.inner;
        let b = inner.bottom.load(Ordering::Relaxed);
        let t = inner.top.load(Ordering::Acquire);
        if b.wrapping_sub(t) >= (inner.mask + 1) as isize {
            return Err(value);
        }
        let ptr = Box::into_raw(Box::new(value));
        // The slot at `b` is dead: indexes below `top` were claimed and the
        // full check above keeps the ring from lapping an unclaimed `top`.
        inner.slot(b).store(ptr, Ordering::Relaxed);
        // Publish the slot write (and the boxed value) to stealers that
        // acquire-load `bottom`.
        inner.bottom.store(b.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pop from the bottom (most recently pushed first).
    pub(crate) fn pop(&self) -> Option<T> {
        let inner = &*self.inner;
        let b = inner.bottom.load(Ordering::Relaxed).wrapping_sub(1);
        inner.bottom.store(b, Ordering::Relaxed);
        // Order the speculative `bottom` decrement before the `top` read, so
        // that either a racing stealer observes the decrement or we observe
        // its CAS. Mirrored by the fence in `steal`.
        fence(Ordering::SeqCst);
        let t = inner.top.load(Ordering::Relaxed);

        if t > b {
            // Already empty; undo the decrement.
            inner.bottom.store(b.wrapping_add(1), Ordering::Relaxed);
            return None;
        }

        let ptr = inner.slot(b).load(Ordering::Relaxed);
        if t == b {
            // Last element: race the stealers for it.
            let won = inner
                .top
                .compare_exchange(t, t.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            inner.bottom.store(b.wrapping_add(1), Ordering::Relaxed);
            if !won {
                return None;
            }
        }
        // SAFETY: Index `b` is claimed exclusively: either `t < b` (stealers
        // cannot pass `bottom`) or the CAS above won the last-element race.
        // The pointer was stored by this thread's own `push`, so it is valid
        // and the box is unaliased.
        Some(*unsafe { Box::from_raw(ptr) })
    }
}

impl<T> Stealer<T> {
    /// Try to take the oldest element.
    pub(crate) fn steal(&self) -> Steal<T> {
        let inner = &*self.inner;
        let t = inner.top.load(Ordering::Acquire);
        // Pairs with the fence in `pop`; see there.
        fence(Ordering::SeqCst);
        let b = inner.bottom.load(Ordering::Acquire);
        if t >= b {
            return Steal::Empty;
        }
        // Speculative read: a pointer copy only, discarded if the CAS loses.
        // The acquire load of `bottom` above makes the owner's slot store for
        // index `t` (and the boxed value behind it) visible.
        let ptr = inner.slot(t).load(Ordering::Relaxed);
        if inner
            .top
            .compare_exchange(t, t.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return Steal::Retry;
        }
        // SAFETY: The successful CAS claimed index `t` uniquely; the owner's
        // full check guarantees the slot has not been lapped, so `ptr` is the
        // live element stored for this index.
        Steal::Success(*unsafe { Box::from_raw(ptr) })
    }
}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        // Unclaimed elements live exactly at indexes `top..bottom`; slots
        // below `top` hold stale pointers whose boxes were already taken.
        let t = self.top.load(Ordering::Relaxed);
        let b = self.bottom.load(Ordering::Relaxed);
        let mut i = t;
        while i < b {
            let ptr = self.slot(i).load(Ordering::Relaxed);
            // SAFETY: Exclusive access (`&mut self`); index `i` was pushed
            // and never claimed.
            drop(unsafe { Box::from_raw(ptr) });
            i = i.wrapping_add(1);
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn owner_pops_lifo() {
        let q = WorkQueue::with_capacity(8);
        for i in 0..3 {
            q.push(i).unwrap();
        }
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(0));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn stealers_take_fifo() {
        let q = WorkQueue::with_capacity(8);
        let s = q.stealer();
        for i in 0..3 {
            q.push(i).unwrap();
        }
        assert!(matches!(s.steal(), Steal::Success(0)));
        assert!(matches!(s.steal(), Steal::Success(1)));
        // Owner still takes the newest end.
        assert_eq!(q.pop(), Some(2));
        assert!(matches!(s.steal(), Steal::Empty));
    }

    #[test]
    fn push_reports_full() {
        let q = WorkQueue::with_capacity(2);
        q.push(0).unwrap();
        q.push(1).unwrap();
        assert_eq!(q.push(2), Err(2));
        assert_eq!(q.pop(), Some(1));
        q.push(2).unwrap();
    }

    #[test]
    fn unclaimed_elements_are_dropped() {
        let q = WorkQueue::with_capacity(8);
        let value = Arc::new(());
        for _ in 0..4 {
            q.push(Arc::clone(&value)).unwrap();
        }
        let _ = q.pop();
        drop(q);
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn concurrent_drain_takes_each_element_once() {
        const N: usize = 10_000;
        let q = WorkQueue::with_capacity(N.next_power_of_two());
        for i in 0..N {
            q.push(i).unwrap();
        }

        let seen: Vec<_> = (0..N)
            .map(|_| std::sync::atomic::AtomicUsize::new(0))
            .collect();
        let seen = Arc::new(seen);

        thread::scope(|scope| {
            for _ in 0..3 {
                let stealer = q.stealer();
                let seen = Arc::clone(&seen);
                scope.spawn(move || loop {
                    match stealer.steal() {
                        Steal::Success(i) => {
                            seen[i].fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                        Steal::Retry => {}
                        Steal::Empty => break,
                    }
                });
            }
            while let Some(i) = q.pop() {
                seen[i].fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        });

        for (i, count) in seen.iter().enumerate() {
            assert_eq!(
                count.load(std::sync::atomic::Ordering::Relaxed),
                1,
                "element {i} taken a wrong number of times"
            );
        }
    }
}
