use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use spindle_core::{EntityId, WaitSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorEventKind {
    /// An entity reported readiness.
    Entity { id: EntityId, entity_data: usize },
    /// The attached set changed or the executor was interrupted.
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorEvent {
    pub kind: ExecutorEventKind,
    pub num_events: usize,
}

/// FIFO of readiness events pushed from entity callbacks.
///
/// Pushing notifies the queue's [`WaitSignal`], which the spinning thread
/// blocks on together with its timers.
#[derive(Debug)]
pub struct EventQueue {
    events: Mutex<VecDeque<ExecutorEvent>>,
    signal: Arc<WaitSignal>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            signal: WaitSignal::new(),
        }
    }
}

impl EventQueue {
    pub fn signal(&self) -> &Arc<WaitSignal> {
        &self.signal
    }

    pub fn push(&self, event: ExecutorEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
        self.signal.notify();
    }

    /// Put events back at the head, preserving their order.
    pub fn push_front_all(&self, events: impl DoubleEndedIterator<Item = ExecutorEvent>) {
        {
            let mut queue = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            for event in events.rev() {
                queue.push_front(event);
            }
        }
        self.signal.notify();
    }

    pub fn pop(&self) -> Option<ExecutorEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
