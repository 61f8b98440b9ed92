use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::guard_condition::GuardCondition;

/// Bounded keep-last queue whose guard condition is triggered while it
/// holds items.
///
/// Delivery triggers and take clears under the queue lock, so the guard
/// level always matches "queue not empty".
pub(crate) struct Inbox<T> {
    queue: Mutex<VecDeque<T>>,
    depth: usize,
    guard: Arc<GuardCondition>,
}

impl<T> Inbox<T> {
    pub(crate) fn new(depth: usize) -> Arc<Self> {
        let depth = depth.max(1);
        Arc::new(Self {
            queue: Mutex::new(VecDeque::with_capacity(depth.min(64))),
            depth,
            guard: GuardCondition::new(),
        })
    }

    pub(crate) fn guard(&self) -> &Arc<GuardCondition> {
        &self.guard
    }

    /// Enqueue, dropping the oldest item when full. Returns whether an item was dropped.
    pub(crate) fn deliver(&self, item: T) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let dropped = if queue.len() >= self.depth {
            queue.pop_front();
            true
        } else {
            false
        };
        queue.push_back(item);
        self.guard.trigger();
        dropped
    }

    pub(crate) fn take(&self) -> Option<T> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let item = queue.pop_front();
        if queue.is_empty() {
            self.guard.clear();
        }
        item
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
