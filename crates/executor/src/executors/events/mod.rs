//! Event-driven executor.
//!
//! Instead of rebuilding and polling a wait set, every attached entity gets
//! an on-ready callback that pushes an [`ExecutorEvent`] onto a queue. The
//! spinning thread pops events and executes the entity directly. Timers, and
//! waitables that cannot install a callback, are polled instead: the
//! spinning thread waits on the queue and a wait set over them together.
//!
//! Attachment changes refresh the entity map on the calling thread and push
//! a synthetic `Notify` event. The spinning thread refreshes again when it
//! handles that event, so an entity event is acted on only once both the
//! refresh and the event have happened, whichever came first.

mod queue;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use spindle_core::{
    CallbackGroup, EntityId, EntityKind, ExecutorError, GuardCondition, Readiness,
    ShutdownCallbackHandle, WaitSet, Waitable,
};
use tracing::{debug, info, trace};

use crate::any_executable::AnyExecutable;
use crate::collection::CollectionEntry;
use crate::config::{ExecutorKind, ExecutorOptions};
use crate::executor::{Executor, ExecutorCore};

pub use self::queue::{EventQueue, ExecutorEvent, ExecutorEventKind};

#[derive(Default)]
struct EventsState {
    /// Entities with an installed on-ready callback.
    entities: HashMap<EntityId, CollectionEntry>,
    /// Timers and poll-only waitables, in dispatch order.
    polled: Vec<CollectionEntry>,
    /// Events for gated or busy groups, replayed on the next notify.
    deferred: VecDeque<ExecutorEvent>,
    /// Notify guard conditions carrying our trigger callback.
    hooked_guards: Vec<Arc<GuardCondition>>,
}

type Ready = (CollectionEntry, Arc<dyn Waitable>, Arc<CallbackGroup>);

/// Single-threaded executor driven by entity readiness callbacks.
pub struct EventsExecutor {
    core: ExecutorCore,
    queue: Arc<EventQueue>,
    notify_pending: Arc<AtomicBool>,
    state: Mutex<EventsState>,
    shutdown_callback: ShutdownCallbackHandle,
}

/// Builds the closure that enqueues one `Notify`, collapsing bursts while
/// one is still pending.
fn notify_pusher(queue: &Arc<EventQueue>, pending: &Arc<AtomicBool>) -> impl Fn() + Send + Sync + 'static {
    let queue = Arc::downgrade(queue);
    let pending = Arc::clone(pending);
    move || {
        let Some(queue) = queue.upgrade() else {
            return;
        };
        if !pending.swap(true, Ordering::SeqCst) {
            queue.push(ExecutorEvent {
                kind: ExecutorEventKind::Notify,
                num_events: 1,
            });
        }
    }
}

impl EventsExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        let context = Arc::clone(&options.context);
        let core = ExecutorCore::new(options.context, options.config, false);
        let queue = Arc::new(EventQueue::default());
        let notify_pending = Arc::new(AtomicBool::new(false));

        let push = notify_pusher(&queue, &notify_pending);
        core.interrupt_guard_condition()
            .set_on_trigger_callback(Some(Box::new(move |_| push())));
        let shutdown_callback = context.add_on_shutdown_callback(notify_pusher(&queue, &notify_pending));

        Self {
            core,
            queue,
            notify_pending,
            state: Mutex::new(EventsState::default()),
            shutdown_callback,
        }
    }

    /// Events waiting to be handled.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, EventsState>, ExecutorError> {
        self.state
            .lock()
            .map_err(|_| ExecutorError::poisoned("events executor state"))
    }

    fn push_notify(&self) {
        notify_pusher(&self.queue, &self.notify_pending)();
    }

    /// Diff the attached entities against the installed callbacks.
    fn refresh(&self, state: &mut EventsState) -> Result<(), ExecutorError> {
        let collection = self.core.collect_entities()?;

        let mut entities = HashMap::with_capacity(collection.len());
        let mut polled = Vec::new();
        for entry in collection.entries {
            let Some(entity) = entry.entity.upgrade() else {
                continue;
            };
            if entry.kind == EntityKind::Timer || !entity.supports_on_ready_callback() {
                polled.push(entry);
                continue;
            }
            if !state.entities.contains_key(&entry.id) {
                let queue = Arc::downgrade(&self.queue);
                let id = entry.id;
                entity.set_on_ready_callback(Arc::new(move |count, entity_data| {
                    if let Some(queue) = queue.upgrade() {
                        queue.push(ExecutorEvent {
                            kind: ExecutorEventKind::Entity { id, entity_data },
                            num_events: count,
                        });
                    }
                }));
            }
            entities.insert(entry.id, entry);
        }
        for (id, stale) in state.entities.iter() {
            if !entities.contains_key(id) {
                if let Some(entity) = stale.entity.upgrade() {
                    entity.clear_on_ready_callback();
                }
            }
        }

        let current: HashSet<_> = collection.notify_guards.iter().map(|g| g.id()).collect();
        let previous: HashSet<_> = state.hooked_guards.iter().map(|g| g.id()).collect();
        for guard in &state.hooked_guards {
            if !current.contains(&guard.id()) {
                guard.set_on_trigger_callback(None);
            }
        }
        for guard in &collection.notify_guards {
            if !previous.contains(&guard.id()) {
                let push = notify_pusher(&self.queue, &self.notify_pending);
                guard.set_on_trigger_callback(Some(Box::new(move |_| push())));
            }
        }

        debug!(
            executor = %self.core.id(),
            entities = entities.len(),
            polled = polled.len(),
            "events executor refreshed"
        );
        state.entities = entities;
        state.polled = polled;
        state.hooked_guards = collection.notify_guards;
        Ok(())
    }

    fn handle_event(&self, event: ExecutorEvent) -> Result<(), ExecutorError> {
        match event.kind {
            ExecutorEventKind::Notify => {
                self.notify_pending.store(false, Ordering::SeqCst);
                let deferred = {
                    let mut state = self.lock_state()?;
                    self.refresh(&mut state)?;
                    std::mem::take(&mut state.deferred)
                };
                if !deferred.is_empty() {
                    trace!(executor = %self.core.id(), count = deferred.len(), "replaying deferred events");
                    self.queue.push_front_all(deferred.into_iter());
                }
                Ok(())
            }
            ExecutorEventKind::Entity { id, entity_data } => self.execute_entity_event(event, id, entity_data),
        }
    }

    fn execute_entity_event(&self, event: ExecutorEvent, id: EntityId, entity_data: usize) -> Result<(), ExecutorError> {
        let entry = {
            let state = self.lock_state()?;
            match state.entities.get(&id) {
                Some(entry) => entry.clone(),
                None => {
                    trace!(executor = %self.core.id(), %id, "event for unknown entity dropped");
                    return Ok(());
                }
            }
        };
        let Some((entity, group)) = entry.upgrade() else {
            return Ok(());
        };

        for done in 0..event.num_events {
            if !group.is_takeable() || !self.core.try_claim(id, &group) {
                let remaining = ExecutorEvent {
                    num_events: event.num_events - done,
                    ..event
                };
                self.lock_state()?.deferred.push_back(remaining);
                return Ok(());
            }
            match entity.take_data_by_entity_id(entity_data) {
                Ok(Some(data)) => self.core.execute_any_executable(AnyExecutable {
                    id,
                    kind: entry.kind,
                    entity: Arc::clone(&entity),
                    callback_group: Arc::clone(&group),
                    data,
                }),
                Ok(None) => self.core.release_claim(id, &group),
                Err(e) => {
                    self.core.release_claim(id, &group);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Takeable polled entities and a wait set over them bound to the queue
    /// signal.
    fn polled_wait_set(&self) -> Result<(WaitSet, Vec<Ready>), ExecutorError> {
        let polled = self.lock_state()?.polled.clone();
        let mut wait_set = WaitSet::new(Arc::clone(self.queue.signal()));
        let mut eligible = Vec::with_capacity(polled.len());
        for entry in polled {
            let Some((entity, group)) = entry.upgrade() else {
                continue;
            };
            if !group.is_takeable() || self.core.is_executing(entry.id) {
                continue;
            }
            entity.add_to_wait_set(&mut wait_set);
            eligible.push((entry, entity, group));
        }
        Ok((wait_set, eligible))
    }

    fn execute_polled(&self, wait_set: &WaitSet, polled: &[Ready]) -> Result<bool, ExecutorError> {
        let result = wait_set.poll();
        for (entry, entity, group) in polled {
            if !entity.is_ready(&result) || !self.core.try_claim(entry.id, group) {
                continue;
            }
            match entity.take_data() {
                Ok(Some(data)) => {
                    self.core.execute_any_executable(AnyExecutable {
                        id: entry.id,
                        kind: entry.kind,
                        entity: Arc::clone(entity),
                        callback_group: Arc::clone(group),
                        data,
                    });
                    return Ok(true);
                }
                Ok(None) => self.core.release_claim(entry.id, group),
                Err(e) => {
                    self.core.release_claim(entry.id, group);
                    return Err(e);
                }
            }
        }
        Ok(false)
    }

    /// Run a ready polled entity, else handle the oldest event. Returns
    /// whether anything was processed.
    fn run_once(&self) -> Result<bool, ExecutorError> {
        let (wait_set, polled) = self.polled_wait_set()?;
        if self.execute_polled(&wait_set, &polled)? {
            return Ok(true);
        }
        match self.queue.pop() {
            Some(event) => {
                self.handle_event(event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn spin_some_impl(&self, max_duration: Duration, exhaustive: bool) -> Result<(), ExecutorError> {
        let start = Instant::now();
        let within_budget = || max_duration.is_zero() || start.elapsed() < max_duration;

        let events_at_start = self.queue.len();
        let polled_at_start = {
            let (wait_set, _) = self.polled_wait_set()?;
            wait_set.poll().ready_count()
        };
        let mut executed_events = 0;
        let mut executed_polled = 0;

        while self.core.should_continue() && within_budget() {
            if exhaustive || executed_events < events_at_start {
                if let Some(event) = self.queue.pop() {
                    self.handle_event(event)?;
                    executed_events += 1;
                    continue;
                }
            }
            if exhaustive || executed_polled < polled_at_start {
                let (wait_set, polled) = self.polled_wait_set()?;
                if self.execute_polled(&wait_set, &polled)? {
                    executed_polled += 1;
                    continue;
                }
            }
            break;
        }
        Ok(())
    }
}

impl Default for EventsExecutor {
    fn default() -> Self {
        Self::new(ExecutorOptions::default())
    }
}

impl Executor for EventsExecutor {
    fn core(&self) -> &ExecutorCore {
        &self.core
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Events
    }

    fn spin(&self) -> Result<(), ExecutorError> {
        let _spinning = self.core.begin_spin("spin")?;
        info!(executor = %self.core.id(), "events spin started");
        while self.core.should_continue() {
            self.spin_once_impl(None)?;
        }
        info!(executor = %self.core.id(), "events spin stopped");
        Ok(())
    }

    fn spin_some(&self, max_duration: Duration) -> Result<(), ExecutorError> {
        let _spinning = self.core.begin_spin("spin_some")?;
        self.spin_some_impl(max_duration, false)
    }

    fn spin_all(&self, max_duration: Duration) -> Result<(), ExecutorError> {
        let _spinning = self.core.begin_spin("spin_all")?;
        self.spin_some_impl(max_duration, true)
    }

    fn spin_once_impl(&self, timeout: Option<Duration>) -> Result<(), ExecutorError> {
        if !self.core.should_continue() || self.run_once()? {
            return Ok(());
        }

        let (wait_set, _) = self.polled_wait_set()?;
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        self.queue.signal().wait_until(deadline, || {
            let polled_ready = wait_set.poll().ready_count() > 0;
            if polled_ready || !self.queue.is_empty() || !self.core.should_continue() {
                Readiness::Ready
            } else {
                Readiness::Pending(wait_set.next_timer_deadline())
            }
        });

        if self.core.should_continue() {
            self.run_once()?;
        }
        Ok(())
    }

    fn entities_changed(&self) -> Result<(), ExecutorError> {
        {
            let mut state = self.lock_state()?;
            self.refresh(&mut state)?;
        }
        self.push_notify();
        Ok(())
    }
}

impl Drop for EventsExecutor {
    fn drop(&mut self) {
        let state = std::mem::take(self.state.get_mut().unwrap_or_else(PoisonError::into_inner));
        for entity in state.entities.values().filter_map(|e| e.entity.upgrade()) {
            entity.clear_on_ready_callback();
        }
        for guard in &state.hooked_guards {
            guard.set_on_trigger_callback(None);
        }
        self.core.interrupt_guard_condition().set_on_trigger_callback(None);
        self.core
            .context()
            .remove_on_shutdown_callback(self.shutdown_callback);
    }
}
