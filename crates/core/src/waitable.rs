use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::ExecutorError;
use crate::wait_set::{WaitResult, WaitSet};

/// Entity category. Declaration order is dispatch priority: timers first,
/// generic waitables last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Timer = 0,
    Subscription = 1,
    Service = 2,
    Client = 3,
    Waitable = 4,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Timer,
        EntityKind::Subscription,
        EntityKind::Service,
        EntityKind::Client,
        EntityKind::Waitable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Timer => "timer",
            EntityKind::Subscription => "subscription",
            EntityKind::Service => "service",
            EntityKind::Client => "client",
            EntityKind::Waitable => "waitable",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier assigned to an entity when it joins a callback group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId(u64);

impl EntityId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        EntityId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Data handed from `take_data` to `execute`. Opaque to the scheduler.
pub type AnyData = Box<dyn Any + Send>;

/// Edge-driven readiness callback: `(number_of_events, entity_data)`.
///
/// `entity_data` lets a composite waitable tell the executor which of its
/// internal sources fired; it is passed back through
/// [`Waitable::take_data_by_entity_id`].
pub type ReadyCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Everything an executor can schedule.
///
/// The contract per readiness cycle is strict: `is_ready` must report true
/// against the current wait result before `take_data` is called, and
/// `take_data` must be called at most once before `execute`.
pub trait Waitable: Send + Sync {
    fn kind(&self) -> EntityKind {
        EntityKind::Waitable
    }

    /// Name used in logs and error messages.
    fn name(&self) -> &str {
        "waitable"
    }

    /// Register the guard conditions and timers this entity waits on.
    fn add_to_wait_set(&self, wait_set: &mut WaitSet);

    /// Non-blocking check against the result of the last wait.
    fn is_ready(&self, result: &WaitResult) -> bool;

    /// Take the data for one execution. `Ok(None)` means the readiness was
    /// spurious and nothing should run.
    fn take_data(&self) -> Result<Option<AnyData>, ExecutorError>;

    /// Event-driven counterpart of [`take_data`](Self::take_data); no prior
    /// `is_ready` call is made.
    fn take_data_by_entity_id(&self, entity_data: usize) -> Result<Option<AnyData>, ExecutorError> {
        let _ = entity_data;
        self.take_data()
    }

    fn execute(&self, data: AnyData) -> Result<(), ExecutorError>;

    /// Whether [`set_on_ready_callback`](Self::set_on_ready_callback) is
    /// honored. Event-driven executors poll entities that report false.
    fn supports_on_ready_callback(&self) -> bool {
        false
    }

    /// Switch this entity to edge-driven delivery. No-op for entities that
    /// can only be polled.
    fn set_on_ready_callback(&self, callback: ReadyCallback) {
        let _ = callback;
    }

    fn clear_on_ready_callback(&self) {}
}
