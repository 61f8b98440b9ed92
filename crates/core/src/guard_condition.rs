use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::signal::{HandleId, SignalListeners, WaitSignal};

type TriggerCallback = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
struct CallbackState {
    callback: Option<TriggerCallback>,
    /// Triggers observed while no callback was installed.
    unread: usize,
}

/// A manually triggered, level-sensitive wake-up source.
///
/// `trigger()` latches the condition until [`clear`](Self::clear) and wakes
/// every wait set it has been added to. With an on-trigger callback installed
/// the condition becomes edge driven: each trigger calls the callback with a
/// count of one, and triggers that arrived before installation are delivered
/// as a single coalesced count.
pub struct GuardCondition {
    id: HandleId,
    triggered: AtomicBool,
    state: Mutex<CallbackState>,
    listeners: SignalListeners,
}

impl fmt::Debug for GuardCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardCondition")
            .field("id", &self.id)
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

impl Default for GuardCondition {
    fn default() -> Self {
        Self {
            id: HandleId::next(),
            triggered: AtomicBool::new(false),
            state: Mutex::new(CallbackState::default()),
            listeners: SignalListeners::default(),
        }
    }
}

impl GuardCondition {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);

        let callback = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &state.callback {
                Some(cb) => Some(Arc::clone(cb)),
                None => {
                    state.unread = state.unread.saturating_add(1);
                    None
                }
            }
        };
        // Invoked outside the lock: callbacks may re-enter and trigger other conditions.
        if let Some(cb) = callback {
            cb(1);
        }

        self.listeners.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Reset the level. Returns whether the condition was triggered.
    pub fn clear(&self) -> bool {
        self.triggered.swap(false, Ordering::SeqCst)
    }

    /// Install or remove the edge-driven callback.
    ///
    /// Passing `None` reverts to poll-only mode; later triggers accumulate
    /// again until the next callback is installed.
    pub fn set_on_trigger_callback(&self, callback: Option<Box<dyn Fn(usize) + Send + Sync>>) {
        let backlog = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match callback {
                Some(cb) => {
                    let cb: TriggerCallback = Arc::from(cb);
                    let unread = std::mem::take(&mut state.unread);
                    state.callback = Some(Arc::clone(&cb));
                    (unread > 0).then_some((cb, unread))
                }
                None => {
                    state.callback = None;
                    None
                }
            }
        };
        if let Some((cb, unread)) = backlog {
            cb(unread);
        }
    }

    pub fn has_trigger_callback(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.callback.is_some()
    }

    pub(crate) fn attach_signal(&self, signal: &Arc<WaitSignal>) {
        self.listeners.attach(signal);
    }

    pub(crate) fn detach_signal(&self, signal: &Arc<WaitSignal>) {
        self.listeners.detach(signal);
    }
}
