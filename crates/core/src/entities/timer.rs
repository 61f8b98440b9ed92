use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::ExecutorError;
use crate::signal::{HandleId, SignalListeners, WaitSignal};
use crate::wait_set::{WaitResult, WaitSet};
use crate::waitable::{AnyData, EntityKind, Waitable};

/// Clock state of a periodic timer, shared with the wait sets it joins.
#[derive(Debug)]
pub struct TimerHandle {
    id: HandleId,
    period: Duration,
    next_call: Mutex<Instant>,
    canceled: AtomicBool,
    listeners: SignalListeners,
}

impl TimerHandle {
    pub fn new(period: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: HandleId::next(),
            period,
            next_call: Mutex::new(Instant::now() + period),
            canceled: AtomicBool::new(false),
            listeners: SignalListeners::default(),
        })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Next expiry, or `None` when canceled.
    pub fn deadline(&self) -> Option<Instant> {
        if self.is_canceled() {
            return None;
        }
        Some(*self.next_call.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_due(&self) -> bool {
        self.deadline().is_some_and(|d| Instant::now() >= d)
    }

    pub fn time_until_trigger(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Consume one expiry if due and re-arm.
    ///
    /// Missed periods are skipped rather than replayed, so a stalled
    /// executor sees one call followed by the next aligned deadline.
    /// Returns the deadline that was consumed.
    pub fn call(&self) -> Option<Instant> {
        if self.is_canceled() {
            return None;
        }
        let now = Instant::now();
        let mut next_call = self.next_call.lock().unwrap_or_else(PoisonError::into_inner);
        let expected = *next_call;
        if now < expected {
            return None;
        }

        *next_call = if self.period.is_zero() {
            now
        } else {
            let period = self.period.as_nanos();
            let behind = now.duration_since(expected).as_nanos();
            let skip = behind / period + 1;
            let advance = u64::try_from(period.saturating_mul(skip)).unwrap_or(u64::MAX);
            expected
                .checked_add(Duration::from_nanos(advance))
                .unwrap_or(now + self.period)
        };
        Some(expected)
    }

    pub fn reset(&self) {
        {
            let mut next_call = self.next_call.lock().unwrap_or_else(PoisonError::into_inner);
            *next_call = Instant::now() + self.period;
        }
        self.canceled.store(false, Ordering::SeqCst);
        self.listeners.notify_all();
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.listeners.notify_all();
    }

    pub(crate) fn attach_signal(&self, signal: &Arc<WaitSignal>) {
        self.listeners.attach(signal);
    }
}

/// A periodic callback.
pub struct Timer {
    name: String,
    handle: Arc<TimerHandle>,
    callback: Box<dyn Fn() + Send + Sync>,
}

impl Timer {
    pub fn new<F>(name: impl Into<String>, period: Duration, callback: F) -> Arc<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            handle: TimerHandle::new(period),
            callback: Box::new(callback),
        })
    }

    pub fn handle(&self) -> &Arc<TimerHandle> {
        &self.handle
    }

    pub fn period(&self) -> Duration {
        self.handle.period()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn reset(&self) {
        self.handle.reset();
    }

    pub fn is_canceled(&self) -> bool {
        self.handle.is_canceled()
    }

    pub fn time_until_trigger(&self) -> Option<Duration> {
        self.handle.time_until_trigger()
    }
}

impl Waitable for Timer {
    fn kind(&self) -> EntityKind {
        EntityKind::Timer
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn add_to_wait_set(&self, wait_set: &mut WaitSet) {
        wait_set.add_timer(&self.handle);
    }

    fn is_ready(&self, result: &WaitResult) -> bool {
        result.is_timer_ready(self.handle.id())
    }

    fn take_data(&self) -> Result<Option<AnyData>, ExecutorError> {
        Ok(self.handle.call().map(|expected| Box::new(expected) as AnyData))
    }

    fn execute(&self, _data: AnyData) -> Result<(), ExecutorError> {
        (self.callback)();
        Ok(())
    }
}
