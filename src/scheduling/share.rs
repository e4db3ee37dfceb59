//! share.rs
//! Inter-task data primitives.
//!
//! - `Share<T>`: single latest value (mutex-protected, `parking_lot`).
//! - `TaskQueue<T>`: bounded FIFO (`crossbeam_queue::ArrayQueue`), either rejecting
//!   new items when full or overwriting the oldest.
//!
//! Both are safe from preemptive or interrupt-like contexts, so they stay valid if
//! tasks ever move off the single cooperative thread.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;

/// Named single-value share. Cloning shares the same slot.
#[derive(Clone)]
pub struct Share<T: Copy> {
    name: Arc<str>,
    value: Arc<Mutex<T>>,
}

impl<T: Copy> Share<T> {
    pub fn new(name: &str, initial: T) -> Self {
        Self {
            name: Arc::from(name),
            value: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn put(&self, value: T) {
        *self.value.lock() = value;
    }

    pub fn get(&self) -> T {
        *self.value.lock()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Copy + fmt::Debug> fmt::Display for Share<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<16} share  {:?}", self.name, self.get())
    }
}

/// Named bounded queue. Cloning shares the same buffer.
pub struct TaskQueue<T> {
    name: Arc<str>,
    queue: Arc<ArrayQueue<T>>,
    overwrite: bool,
    dropped: Arc<AtomicU64>,
    max_full: Arc<AtomicU64>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            queue: self.queue.clone(),
            overwrite: self.overwrite,
            dropped: self.dropped.clone(),
            max_full: self.max_full.clone(),
        }
    }
}

impl<T> TaskQueue<T> {
    /// `capacity` must be non-zero. With `overwrite`, a full queue drops its
    /// oldest item to admit a new one; otherwise the new item is rejected.
    pub fn new(name: &str, capacity: usize, overwrite: bool) -> Self {
        Self {
            name: Arc::from(name),
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            overwrite,
            dropped: Arc::new(AtomicU64::new(0)),
            max_full: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns `false` when an item was lost (rejected, or an old one overwritten).
    pub fn put(&self, item: T) -> bool {
        let accepted = if self.overwrite {
            self.queue.force_push(item).is_none()
        } else {
            self.queue.push(item).is_ok()
        };

        if !accepted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.max_full
            .fetch_max(self.queue.len() as u64, Ordering::Relaxed);
        accepted
    }

    pub fn get(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Removes and returns everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(item) = self.queue.pop() {
            out.push(item);
        }
        out
    }

    pub fn any(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether a full queue makes room by dropping its oldest item.
    pub fn overwrites(&self) -> bool {
        self.overwrite
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> fmt::Display for TaskQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<16} queue  {}/{} max_full={} dropped={}",
            self.name,
            self.len(),
            self.capacity(),
            self.max_full.load(Ordering::Relaxed),
            self.dropped()
        )
    }
}
