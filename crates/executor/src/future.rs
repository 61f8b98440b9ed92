//! Spinning until a future resolves, plus the one-node convenience wrappers.

use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, Weak};
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};

use futures::task::{waker, ArcWake};
use spindle_core::{ExecutorError, GuardCondition, Node};

use crate::config::ExecutorOptions;
use crate::executor::{with_node, Executor};
use crate::executors::SingleThreadedExecutor;

/// How a `spin_until_future_complete` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FutureReturnCode<T> {
    /// The future resolved with this output.
    Success(T),
    /// The timeout elapsed first.
    Timeout,
    /// The executor was canceled or the context shut down first.
    Interrupted,
}

impl<T> FutureReturnCode<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, FutureReturnCode::Success(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FutureReturnCode::Timeout)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, FutureReturnCode::Interrupted)
    }

    pub fn into_success(self) -> Option<T> {
        match self {
            FutureReturnCode::Success(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> fmt::Display for FutureReturnCode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FutureReturnCode::Success(_) => "SUCCESS",
            FutureReturnCode::Timeout => "TIMEOUT",
            FutureReturnCode::Interrupted => "INTERRUPTED",
        })
    }
}

/// Wakes the executor's blocking wait when the future makes progress.
struct InterruptWaker {
    guard: Weak<GuardCondition>,
}

impl ArcWake for InterruptWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if let Some(guard) = arc_self.guard.upgrade() {
            guard.trigger();
        }
    }
}

/// Spin `executor` one item at a time until `future` resolves.
///
/// The future is polled before every wait, so an already-complete future
/// returns without blocking. `timeout == None` never times out. Pass
/// `&mut fut` to keep an `Unpin` future for a later retry.
pub fn spin_executor_until_future_complete<E, F>(
    executor: &E,
    future: F,
    timeout: Option<Duration>,
) -> Result<FutureReturnCode<F::Output>, ExecutorError>
where
    E: Executor + ?Sized,
    F: Future,
{
    let core = executor.core();
    let waker = waker(Arc::new(InterruptWaker {
        guard: Arc::downgrade(core.interrupt_guard_condition()),
    }));
    let mut cx = TaskContext::from_waker(&waker);
    let mut future = pin!(future);

    if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
        return Ok(FutureReturnCode::Success(output));
    }

    let deadline = timeout.map(|t| Instant::now().checked_add(t));
    let _spinning = core.begin_spin("spin_until_future_complete")?;
    let mut timeout_left = timeout;

    while core.should_continue() {
        executor.spin_once_impl(timeout_left)?;

        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return Ok(FutureReturnCode::Success(output));
        }
        match deadline {
            None | Some(None) => continue,
            Some(Some(deadline)) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(FutureReturnCode::Timeout);
                }
                timeout_left = Some(deadline - now);
            }
        }
    }
    Ok(FutureReturnCode::Interrupted)
}

/// Attach `node` to `executor`, spin until `future` resolves, detach.
pub fn spin_node_until_future_complete<E, F>(
    executor: &E,
    node: &Arc<Node>,
    future: F,
    timeout: Option<Duration>,
) -> Result<FutureReturnCode<F::Output>, ExecutorError>
where
    E: Executor + ?Sized,
    F: Future,
{
    with_node(executor, node, || {
        spin_executor_until_future_complete(executor, future, timeout)
    })
}

/// Spin `node` on a temporary single-threaded executor until `future`
/// resolves.
pub fn spin_until_future_complete<F>(
    node: &Arc<Node>,
    future: F,
    timeout: Option<Duration>,
) -> Result<FutureReturnCode<F::Output>, ExecutorError>
where
    F: Future,
{
    let executor = SingleThreadedExecutor::new(ExecutorOptions::with_context(Arc::clone(node.context())));
    spin_node_until_future_complete(&executor, node, future, timeout)
}

/// Execute the work currently ready on `node` with a temporary executor.
pub fn spin_node_some(node: &Arc<Node>) -> Result<(), ExecutorError> {
    let executor = SingleThreadedExecutor::new(ExecutorOptions::with_context(Arc::clone(node.context())));
    executor.spin_node_some(node, Duration::ZERO)
}

/// Spin `node` on a temporary executor until its context shuts down.
pub fn spin_node(node: &Arc<Node>) -> Result<(), ExecutorError> {
    let executor = SingleThreadedExecutor::new(ExecutorOptions::with_context(Arc::clone(node.context())));
    with_node(&executor, node, || executor.spin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_code_accessors() {
        let ok = FutureReturnCode::Success(7);
        assert!(ok.is_success());
        assert_eq!(ok.to_string(), "SUCCESS");
        assert_eq!(ok.into_success(), Some(7));

        let timeout: FutureReturnCode<()> = FutureReturnCode::Timeout;
        assert!(timeout.is_timeout());
        assert_eq!(timeout.into_success(), None);
        assert!(FutureReturnCode::<()>::Interrupted.is_interrupted());
    }
}
