//! Hand-off primitives between the pipeline stages
//!
//! Producers never wait on anything but the short critical section that
//! pushes an item; the single consumer swaps the whole buffer out and works
//! on it without holding the lock.

use parking_lot::{Condvar, Mutex};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Unbounded FIFO with one consumer
pub(crate) struct StageQueue<T> {
    items: Mutex<Vec<T>>,
    ready: Condvar,
}

impl<T> StageQueue<T> {
    pub fn new() -> Self {
        StageQueue {
            items: Mutex::new(Vec::new()),
            ready: Condvar::new(),
        }
    }

    /// Append one item and wake the consumer
    pub fn push(&self, item: T) {
        self.items.lock().push(item);
        self.ready.notify_one();
    }

    /// Block until items are queued or `exit` is raised, then move every
    /// queued item into `batch`
    ///
    /// `batch` must be empty; its allocation is recycled as the next
    /// producer buffer.
    ///
    /// # Returns
    /// `false` once `exit` is set. Items still queued at that point are
    /// abandoned.
    pub fn wait_drain(&self, batch: &mut Vec<T>, exit: &AtomicBool) -> bool {
        debug_assert!(batch.is_empty());
        let mut items = self.items.lock();

        while items.is_empty() && !exit.load(Ordering::Acquire) {
            self.ready.wait(&mut items);
        }

        if exit.load(Ordering::Acquire) {
            return false;
        }

        mem::swap(&mut *items, batch);
        true
    }

    /// Wake the consumer so it can observe a raised exit flag
    pub fn wake(&self) {
        let _items = self.items.lock();
        self.ready.notify_all();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }
}

/// Single-value hand-off where a newer value replaces an unconsumed one
pub(crate) struct LatestSlot<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        LatestSlot {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Store `value`, dropping whatever was not consumed yet
    pub fn publish(&self, value: T) {
        *self.value.lock() = Some(value);
        self.ready.notify_one();
    }

    /// Wait for a value and take it, but not before `not_before`
    ///
    /// Values published while waiting for `not_before` replace each other,
    /// so the caller always receives the newest one.
    ///
    /// # Returns
    /// `None` once `exit` is set
    pub fn wait_take(&self, exit: &AtomicBool, not_before: Option<Instant>) -> Option<T> {
        let mut value = self.value.lock();

        loop {
            if exit.load(Ordering::Acquire) {
                return None;
            }

            if value.is_none() {
                self.ready.wait(&mut value);
                continue;
            }

            match not_before {
                Some(deadline) if Instant::now() < deadline => {
                    self.ready.wait_until(&mut value, deadline);
                }
                _ => return value.take(),
            }
        }
    }

    pub fn wake(&self) {
        let _value = self.value.lock();
        self.ready.notify_all();
    }
}
