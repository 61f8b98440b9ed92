use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::entities::TimerHandle;
use crate::error::ExecutorError;
use crate::guard_condition::GuardCondition;
use crate::signal::{HandleId, Readiness, WaitSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResultKind {
    Ready,
    Timeout,
    /// The wait set had no members; nothing was waited on.
    Empty,
}

/// Which members of a [`WaitSet`] were ready when the wait returned.
#[derive(Debug, Clone)]
pub struct WaitResult {
    pub kind: WaitResultKind,
    ready_guards: HashSet<HandleId>,
    ready_timers: HashSet<HandleId>,
}

impl WaitResult {
    pub fn empty(kind: WaitResultKind) -> Self {
        Self {
            kind,
            ready_guards: HashSet::new(),
            ready_timers: HashSet::new(),
        }
    }

    pub fn is_guard_ready(&self, id: HandleId) -> bool {
        self.ready_guards.contains(&id)
    }

    pub fn is_timer_ready(&self, id: HandleId) -> bool {
        self.ready_timers.contains(&id)
    }

    pub fn ready_count(&self) -> usize {
        self.ready_guards.len() + self.ready_timers.len()
    }
}

/// The members of one blocking wait: guard conditions and timers.
///
/// Every member is bound to the set's [`WaitSignal`] when added, so
/// triggering a guard or resetting a timer wakes a wait in progress.
#[derive(Debug)]
pub struct WaitSet {
    signal: Arc<WaitSignal>,
    guard_conditions: Vec<Arc<GuardCondition>>,
    timers: Vec<Arc<TimerHandle>>,
}

impl WaitSet {
    pub fn new(signal: Arc<WaitSignal>) -> Self {
        Self {
            signal,
            guard_conditions: Vec::new(),
            timers: Vec::new(),
        }
    }

    pub fn signal(&self) -> &Arc<WaitSignal> {
        &self.signal
    }

    pub fn clear(&mut self) {
        self.guard_conditions.clear();
        self.timers.clear();
    }

    pub fn add_guard_condition(&mut self, gc: &Arc<GuardCondition>) {
        if self.guard_conditions.iter().any(|g| g.id() == gc.id()) {
            return;
        }
        gc.attach_signal(&self.signal);
        self.guard_conditions.push(Arc::clone(gc));
    }

    pub fn add_timer(&mut self, timer: &Arc<TimerHandle>) {
        if self.timers.iter().any(|t| t.id() == timer.id()) {
            return;
        }
        timer.attach_signal(&self.signal);
        self.timers.push(Arc::clone(timer));
    }

    pub fn is_empty(&self) -> bool {
        self.guard_conditions.is_empty() && self.timers.is_empty()
    }

    pub fn size(&self) -> usize {
        self.guard_conditions.len() + self.timers.len()
    }

    /// Earliest deadline among the non-canceled timers.
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.iter().filter_map(|t| t.deadline()).min()
    }

    /// Non-blocking poll.
    pub fn poll(&self) -> WaitResult {
        let (guards, timers) = self.scan();
        Self::into_result(guards, timers)
    }

    /// Block until a member is ready or `timeout` elapses.
    ///
    /// `None` blocks until ready; `Some(Duration::ZERO)` is a poll. Waiting
    /// forever on an empty set is a fault because nothing could ever wake it.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<WaitResult, ExecutorError> {
        if self.is_empty() {
            if timeout.is_none() {
                return Err(ExecutorError::RuntimeFault(
                    "infinite wait on an empty wait set".into(),
                ));
            }
            return Ok(WaitResult::empty(WaitResultKind::Empty));
        }
        if timeout == Some(Duration::ZERO) {
            return Ok(self.poll());
        }

        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut found = (HashSet::new(), HashSet::new());
        self.signal.wait_until(deadline, || {
            let (guards, timers) = self.scan();
            if guards.is_empty() && timers.is_empty() {
                Readiness::Pending(self.next_timer_deadline())
            } else {
                found = (guards, timers);
                Readiness::Ready
            }
        });

        // A wake-up at a timer deadline can race the clock; settle with one more scan.
        if found.0.is_empty() && found.1.is_empty() {
            found = self.scan();
        }
        let result = Self::into_result(found.0, found.1);
        trace!(kind = ?result.kind, ready = result.ready_count(), "wait returned");
        Ok(result)
    }

    fn scan(&self) -> (HashSet<HandleId>, HashSet<HandleId>) {
        let guards = self
            .guard_conditions
            .iter()
            .filter(|g| g.is_triggered())
            .map(|g| g.id())
            .collect();
        let timers = self
            .timers
            .iter()
            .filter(|t| t.is_due())
            .map(|t| t.id())
            .collect();
        (guards, timers)
    }

    fn into_result(guards: HashSet<HandleId>, timers: HashSet<HandleId>) -> WaitResult {
        let kind = if guards.is_empty() && timers.is_empty() {
            WaitResultKind::Timeout
        } else {
            WaitResultKind::Ready
        };
        WaitResult {
            kind,
            ready_guards: guards,
            ready_timers: timers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_polls() {
        let gc = GuardCondition::new();
        let mut ws = WaitSet::new(WaitSignal::new());
        ws.add_guard_condition(&gc);

        let result = ws.wait(Some(Duration::ZERO)).unwrap();
        assert_eq!(result.kind, WaitResultKind::Timeout);

        gc.trigger();
        let result = ws.wait(Some(Duration::ZERO)).unwrap();
        assert_eq!(result.kind, WaitResultKind::Ready);
        assert!(result.is_guard_ready(gc.id()));
    }

    #[test]
    fn timeout_is_respected() {
        let gc = GuardCondition::new();
        let mut ws = WaitSet::new(WaitSignal::new());
        ws.add_guard_condition(&gc);

        let start = Instant::now();
        let result = ws.wait(Some(Duration::from_millis(30))).unwrap();
        assert_eq!(result.kind, WaitResultKind::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn trigger_from_another_thread_wakes_infinite_wait() {
        let gc = GuardCondition::new();
        let mut ws = WaitSet::new(WaitSignal::new());
        ws.add_guard_condition(&gc);

        let trigger = {
            let gc = Arc::clone(&gc);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                gc.trigger();
            })
        };
        let result = ws.wait(None).unwrap();
        trigger.join().unwrap();
        assert!(result.is_guard_ready(gc.id()));
    }

    #[test]
    fn empty_set_never_blocks() {
        let ws = WaitSet::new(WaitSignal::new());
        let result = ws.wait(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(result.kind, WaitResultKind::Empty);
        assert!(ws.wait(None).is_err());
    }

    #[test]
    fn timer_deadline_ends_wait() {
        let timer = TimerHandle::new(Duration::from_millis(15));
        let mut ws = WaitSet::new(WaitSignal::new());
        ws.add_timer(&timer);

        let start = Instant::now();
        let result = ws.wait(Some(Duration::from_secs(5))).unwrap();
        assert!(result.is_timer_ready(timer.id()));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn duplicate_members_are_ignored() {
        let gc = GuardCondition::new();
        let mut ws = WaitSet::new(WaitSignal::new());
        ws.add_guard_condition(&gc);
        ws.add_guard_condition(&gc);
        assert_eq!(ws.size(), 1);
        ws.clear();
        assert!(ws.is_empty());
    }
}
