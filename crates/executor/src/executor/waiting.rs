use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use spindle_core::{ExecutorError, WaitResult, WaitResultKind, WaitSet, WaitSignal};
use tracing::{trace, warn};

use crate::any_executable::AnyExecutable;
use crate::collection::{CollectionEntry, EntitiesCollection};

use super::ExecutorCore;

/// When the entity collection behind the wait set is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPolicy {
    /// Walk nodes and groups before every wait.
    EveryWait,
    /// Reuse the previous collection until [`WaitDispatcher::invalidate`].
    OnInvalidation,
}

struct DispatchState {
    collection: Option<EntitiesCollection>,
    wait_set: WaitSet,
    /// Result of the last wait; `None` once its ready entries are used up.
    result: Option<WaitResult>,
    ready: VecDeque<CollectionEntry>,
}

/// Wait-set orchestration shared by the polling strategies.
///
/// Holds one wait-set snapshot at a time: readiness observed by a wait is
/// fully consumed before the next wait is taken. The state lock is held
/// across the blocking wait, so concurrent workers queue up behind the
/// waiting thread instead of racing on the same snapshot.
pub struct WaitDispatcher {
    policy: RebuildPolicy,
    needs_rebuild: AtomicBool,
    state: Mutex<DispatchState>,
}

impl WaitDispatcher {
    pub fn new(policy: RebuildPolicy) -> Self {
        Self {
            policy,
            needs_rebuild: AtomicBool::new(true),
            state: Mutex::new(DispatchState {
                collection: None,
                wait_set: WaitSet::new(WaitSignal::new()),
                result: None,
                ready: VecDeque::new(),
            }),
        }
    }

    pub fn policy(&self) -> RebuildPolicy {
        self.policy
    }

    /// Force a collection rebuild before the next wait.
    pub fn invalidate(&self) {
        self.needs_rebuild.store(true, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, DispatchState>, ExecutorError> {
        self.state
            .lock()
            .map_err(|_| ExecutorError::poisoned("wait dispatcher"))
    }

    /// Rebuild (per policy), populate the wait set, block, and queue the
    /// ready entries in priority order.
    fn wait_for_work(
        &self,
        core: &ExecutorCore,
        state: &mut DispatchState,
        timeout: Option<Duration>,
    ) -> Result<WaitResultKind, ExecutorError> {
        let rebuild = self.policy == RebuildPolicy::EveryWait
            || self.needs_rebuild.swap(false, Ordering::SeqCst)
            || state.collection.is_none();
        if rebuild {
            state.collection = Some(core.collect_entities()?);
        }
        let Some(collection) = state.collection.as_ref() else {
            return Err(ExecutorError::RuntimeFault("entity collection missing".into()));
        };

        state.ready.clear();
        state.result = None;

        let wait_set = &mut state.wait_set;
        wait_set.clear();
        wait_set.add_guard_condition(&core.interrupt_guard);
        wait_set.add_guard_condition(core.context.shutdown_guard_condition());
        for gc in &collection.notify_guards {
            wait_set.add_guard_condition(gc);
        }

        // Gated groups, busy exclusive groups and in-flight entities stay out
        // of the wait so their pending readiness cannot make it spin.
        let mut eligible = Vec::with_capacity(collection.len());
        for entry in &collection.entries {
            let Some((entity, group)) = entry.upgrade() else {
                continue;
            };
            if !group.is_takeable() || core.is_executing(entry.id) {
                continue;
            }
            entity.add_to_wait_set(wait_set);
            eligible.push(entry.clone());
        }

        let result = wait_set.wait(timeout)?;

        core.interrupt_guard.clear();
        for gc in &collection.notify_guards {
            gc.clear();
        }

        let kind = result.kind;
        core.with_metrics(|m| m.record_wait(kind != WaitResultKind::Ready));
        match kind {
            WaitResultKind::Ready => {
                trace!(executor = %core.id, ready = result.ready_count(), "wait ready");
                state.ready.extend(eligible);
                state.result = Some(result);
            }
            WaitResultKind::Timeout => trace!(executor = %core.id, "wait timed out"),
            WaitResultKind::Empty => warn!(executor = %core.id, "empty wait set received in wait()"),
        }
        Ok(kind)
    }

    fn next_ready(
        &self,
        core: &ExecutorCore,
        state: &mut DispatchState,
    ) -> Result<Option<AnyExecutable>, ExecutorError> {
        let DispatchState { result, ready, .. } = state;
        let Some(wait_result) = result.as_ref() else {
            return Ok(None);
        };
        let found = core.next_ready(ready, wait_result)?;
        if found.is_none() {
            *result = None;
        }
        Ok(found)
    }

    /// Take the next ready executable, waiting up to `timeout` when the
    /// current snapshot is exhausted.
    pub fn get_next_executable(
        &self,
        core: &ExecutorCore,
        timeout: Option<Duration>,
    ) -> Result<Option<AnyExecutable>, ExecutorError> {
        let mut state = self.lock()?;
        // Workers queued on the lock across a cancel must not run stale entries.
        if !core.should_continue() {
            return Ok(None);
        }
        if let Some(executable) = self.next_ready(core, &mut state)? {
            return Ok(Some(executable));
        }
        self.wait_for_work(core, &mut state, timeout)?;
        if !core.is_spinning() {
            return Ok(None);
        }
        self.next_ready(core, &mut state)
    }

    /// One select-and-execute.
    pub fn spin_once_impl(&self, core: &ExecutorCore, timeout: Option<Duration>) -> Result<bool, ExecutorError> {
        match self.get_next_executable(core, timeout)? {
            Some(executable) => {
                core.execute_any_executable(executable);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Shared body of `spin_some` and `spin_all`.
    ///
    /// Polls once up front; `spin_some` then drains that snapshot only,
    /// `spin_all` keeps polling until a fresh poll finds nothing. A zero
    /// `max_duration` means no time bound.
    pub fn spin_some_impl(
        &self,
        core: &ExecutorCore,
        max_duration: Duration,
        exhaustive: bool,
    ) -> Result<(), ExecutorError> {
        let start = Instant::now();
        let within_budget = || max_duration.is_zero() || start.elapsed() < max_duration;

        {
            let mut state = self.lock()?;
            self.wait_for_work(core, &mut state, Some(Duration::ZERO))?;
        }
        let mut just_waited = true;

        while core.should_continue() && within_budget() {
            let next = {
                let mut state = self.lock()?;
                self.next_ready(core, &mut state)?
            };
            match next {
                Some(executable) => {
                    core.execute_any_executable(executable);
                    just_waited = false;
                }
                None if just_waited || !exhaustive => break,
                None => {
                    let mut state = self.lock()?;
                    self.wait_for_work(core, &mut state, Some(Duration::ZERO))?;
                    just_waited = true;
                }
            }
        }
        Ok(())
    }

    /// Wait once (up to `timeout`) and execute every entity ready in that
    /// snapshot, in priority order. With `only_one`, stop after the first.
    /// Returns whether anything ran.
    pub fn execute_ready_executables(
        &self,
        core: &ExecutorCore,
        timeout: Option<Duration>,
        only_one: bool,
    ) -> Result<bool, ExecutorError> {
        {
            let mut state = self.lock()?;
            if self.wait_for_work(core, &mut state, timeout)? != WaitResultKind::Ready {
                return Ok(false);
            }
        }
        let mut any = false;
        while core.context.is_valid() {
            let next = {
                let mut state = self.lock()?;
                self.next_ready(core, &mut state)?
            };
            let Some(executable) = next else {
                break;
            };
            core.execute_any_executable(executable);
            any = true;
            if only_one {
                break;
            }
        }
        Ok(any)
    }

    /// Number of entities in the cached collection, if built.
    pub fn collection_size(&self) -> Option<usize> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.collection.as_ref().map(|c| c.len()))
    }
}
