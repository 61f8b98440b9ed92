use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::info;
use uuid::Uuid;

use crate::guard_condition::GuardCondition;
use crate::registry::Registry;

type ShutdownCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`Context::add_on_shutdown_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShutdownCallbackHandle(u64);

/// Process-level lifetime scope shared by nodes and executors.
///
/// Shutdown is observable two ways: [`is_valid`](Self::is_valid) turns
/// false and the shutdown guard condition is triggered, which wakes every
/// executor that includes it in its wait set.
pub struct Context {
    id: Uuid,
    valid: AtomicBool,
    shutdown_guard: Arc<GuardCondition>,
    shutdown_reason: Mutex<Option<String>>,
    on_shutdown: Mutex<Vec<(ShutdownCallbackHandle, ShutdownCallback)>>,
    next_callback: AtomicU64,
    registry: Registry,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl Context {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            valid: AtomicBool::new(true),
            shutdown_guard: GuardCondition::new(),
            shutdown_reason: Mutex::new(None),
            on_shutdown: Mutex::new(Vec::new()),
            next_callback: AtomicU64::new(1),
            registry: Registry::default(),
        })
    }

    /// The process-wide default context.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<Context>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(Context::new))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Shut the context down. Only the first call has any effect; returns
    /// whether this call performed the shutdown.
    pub fn shutdown(&self, reason: &str) -> bool {
        if !self.valid.swap(false, Ordering::SeqCst) {
            return false;
        }
        *self.shutdown_reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
        info!(context = %self.id, reason, "context shut down");

        self.shutdown_guard.trigger();

        let callbacks: Vec<ShutdownCallback> = self
            .on_shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in callbacks {
            cb();
        }
        true
    }

    pub fn shutdown_reason(&self) -> Option<String> {
        self.shutdown_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn shutdown_guard_condition(&self) -> &Arc<GuardCondition> {
        &self.shutdown_guard
    }

    pub fn add_on_shutdown_callback<F>(&self, callback: F) -> ShutdownCallbackHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let handle = ShutdownCallbackHandle(self.next_callback.fetch_add(1, Ordering::Relaxed));
        self.on_shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((handle, Arc::new(callback)));
        handle
    }

    pub fn remove_on_shutdown_callback(&self, handle: ShutdownCallbackHandle) -> bool {
        let mut callbacks = self.on_shutdown.lock().unwrap_or_else(PoisonError::into_inner);
        let before = callbacks.len();
        callbacks.retain(|(h, _)| *h != handle);
        callbacks.len() != before
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn shutdown_is_idempotent() {
        let context = Context::new();
        assert!(context.is_valid());
        assert!(context.shutdown("first"));
        assert!(!context.shutdown("second"));
        assert!(!context.is_valid());
        assert_eq!(context.shutdown_reason().as_deref(), Some("first"));
        assert!(context.shutdown_guard_condition().is_triggered());
    }

    #[test]
    fn removed_callbacks_do_not_run() {
        let context = Context::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let kept = {
            let calls = Arc::clone(&calls);
            context.add_on_shutdown_callback(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        let removed = {
            let calls = Arc::clone(&calls);
            context.add_on_shutdown_callback(move || {
                calls.fetch_add(10, Ordering::SeqCst);
            })
        };
        assert_ne!(kept, removed);
        assert!(context.remove_on_shutdown_callback(removed));
        assert!(!context.remove_on_shutdown_callback(removed));

        context.shutdown("test");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn global_is_shared() {
        assert_eq!(Context::global().id(), Context::global().id());
    }
}
