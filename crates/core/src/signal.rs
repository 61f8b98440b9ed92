//! Blocking primitive shared by wait sets and the event queue.
//!
//! A [`WaitSignal`] is a generation counter guarded by a mutex and paired
//! with a condvar. Producers (guard conditions, timers, the event queue)
//! change their own state first and then call [`WaitSignal::notify`], which
//! bumps the generation under the lock. Waiters evaluate their readiness
//! predicate while holding the same lock, so a notification racing with the
//! check is never lost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

/// Stable identifier for a wait-set member (guard condition or timer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HandleId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Outcome of one readiness check inside [`WaitSignal::wait_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Not ready yet; optionally re-check at the given instant (timer deadline).
    Pending(Option<Instant>),
}

#[derive(Debug, Default)]
pub struct WaitSignal {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl WaitSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        // The guarded value is a plain counter; a panic elsewhere cannot leave it inconsistent.
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake every thread blocked in [`wait_until`](Self::wait_until).
    pub fn notify(&self) {
        let mut generation = self.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Block until `check` reports [`Readiness::Ready`] or `deadline` passes.
    ///
    /// Returns `true` when woken by readiness (or a due wake-up instant) and
    /// `false` on deadline expiry. `deadline == None` blocks until ready.
    pub fn wait_until<F>(&self, deadline: Option<Instant>, mut check: F) -> bool
    where
        F: FnMut() -> Readiness,
    {
        let mut generation = self.lock();
        loop {
            let wake_at = match check() {
                Readiness::Ready => return true,
                Readiness::Pending(wake_at) => wake_at,
            };

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return false;
            }
            let until = match (deadline, wake_at) {
                (Some(d), Some(w)) => Some(d.min(w)),
                (d, w) => d.or(w),
            };

            let seen = *generation;
            match until {
                None => {
                    generation = self
                        .cond
                        .wait_while(generation, |g| *g == seen)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(t) if t <= now => return true,
                Some(t) => {
                    let (guard, _) = self
                        .cond
                        .wait_timeout_while(generation, t - now, |g| *g == seen)
                        .unwrap_or_else(PoisonError::into_inner);
                    generation = guard;
                }
            }
        }
    }
}

/// The set of wait signals a wait-set member must wake when its state changes.
///
/// Held weakly: a dropped wait set or event queue never stays registered.
#[derive(Debug, Default)]
pub struct SignalListeners {
    signals: Mutex<Vec<Weak<WaitSignal>>>,
}

impl SignalListeners {
    pub fn attach(&self, signal: &Arc<WaitSignal>) {
        let mut signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        signals.retain(|s| s.strong_count() > 0);
        let target = Arc::as_ptr(signal);
        if !signals.iter().any(|s| std::ptr::eq(s.as_ptr(), target)) {
            signals.push(Arc::downgrade(signal));
        }
    }

    pub fn detach(&self, signal: &Arc<WaitSignal>) {
        let mut signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        let target = Arc::as_ptr(signal);
        signals.retain(|s| s.strong_count() > 0 && !std::ptr::eq(s.as_ptr(), target));
    }

    pub fn notify_all(&self) {
        let live: Vec<Arc<WaitSignal>> = {
            let signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
            signals.iter().filter_map(Weak::upgrade).collect()
        };
        for signal in live {
            signal.notify();
        }
    }

    pub fn len(&self) -> usize {
        let signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        signals.iter().filter(|s| s.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_false_on_deadline() {
        let signal = WaitSignal::new();
        let start = Instant::now();
        let deadline = start + Duration::from_millis(20);
        assert!(!signal.wait_until(Some(deadline), || Readiness::Pending(None)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn notify_wakes_blocked_waiter() {
        let signal = WaitSignal::new();
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let signal = Arc::clone(&signal);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                signal.wait_until(None, || {
                    if flag.load(Ordering::SeqCst) {
                        Readiness::Ready
                    } else {
                        Readiness::Pending(None)
                    }
                })
            })
        };

        thread::sleep(Duration::from_millis(10));
        flag.store(true, Ordering::SeqCst);
        signal.notify();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn due_wake_instant_returns_ready() {
        let signal = WaitSignal::new();
        let wake = Instant::now() + Duration::from_millis(5);
        let woke = signal.wait_until(None, || {
            if Instant::now() >= wake {
                Readiness::Ready
            } else {
                Readiness::Pending(Some(wake))
            }
        });
        assert!(woke);
        assert!(Instant::now() >= wake);
    }

    #[test]
    fn listeners_are_deduplicated_and_weak() {
        let listeners = SignalListeners::default();
        let signal = WaitSignal::new();
        listeners.attach(&signal);
        listeners.attach(&signal);
        assert_eq!(listeners.len(), 1);

        drop(signal);
        assert!(listeners.is_empty());
    }
}
