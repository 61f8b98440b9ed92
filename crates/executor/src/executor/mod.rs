//! The executor contract and the machinery shared by every strategy.
//!
//! Split into focused submodules:
//! - `core`: attachment bookkeeping, spin state, execution claims
//! - `execution`: running one selected executable
//! - `scheduling`: priority-ordered selection from a ready snapshot
//! - `waiting`: wait-set orchestration for the polling strategies

mod core;
mod execution;
mod scheduling;
mod waiting;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use spindle_core::{CallbackGroup, Context, ExecutorError, Node};

use crate::config::ExecutorKind;
use crate::future::{spin_executor_until_future_complete, FutureReturnCode};
use crate::metrics::ExecutorMetrics;

pub use self::core::{ExecutorCore, SpinGuard};
pub use self::waiting::{RebuildPolicy, WaitDispatcher};

/// Decides which ready entity runs next, on which thread, under the
/// callback-group exclusion rules.
///
/// Only one `spin*` call may be active per instance; a second fails with
/// [`ExecutorError::ConcurrentSpin`]. Timeouts are `None` for "block until
/// ready or canceled" and `Some(Duration::ZERO)` for a non-blocking poll.
pub trait Executor: Send + Sync {
    fn core(&self) -> &ExecutorCore;

    fn kind(&self) -> ExecutorKind;

    /// Process work until [`cancel`](Self::cancel) or context shutdown.
    fn spin(&self) -> Result<(), ExecutorError>;

    /// Execute the work ready right now, without picking up work that
    /// becomes ready meanwhile. `Duration::ZERO` means no time bound.
    fn spin_some(&self, max_duration: Duration) -> Result<(), ExecutorError>;

    /// Execute ready work, including newly ready work, until none is left
    /// or `max_duration` elapses. `Duration::ZERO` means no time bound.
    fn spin_all(&self, max_duration: Duration) -> Result<(), ExecutorError>;

    /// One select-and-execute, assuming the caller holds the spin guard.
    fn spin_once_impl(&self, timeout: Option<Duration>) -> Result<(), ExecutorError>;

    /// Hook run after every attachment change.
    fn entities_changed(&self) -> Result<(), ExecutorError> {
        Ok(())
    }

    /// Execute at most one ready item, waiting up to `timeout` for one.
    fn spin_once(&self, timeout: Option<Duration>) -> Result<(), ExecutorError> {
        let _spinning = self.core().begin_spin("spin_once")?;
        self.spin_once_impl(timeout)
    }

    fn spin_until_future_complete<F>(
        &self,
        future: F,
        timeout: Option<Duration>,
    ) -> Result<FutureReturnCode<F::Output>, ExecutorError>
    where
        F: Future,
        Self: Sized,
    {
        spin_executor_until_future_complete(self, future, timeout)
    }

    fn add_node(&self, node: &Arc<Node>, notify: bool) -> Result<(), ExecutorError> {
        self.core().add_node(node, notify)?;
        self.entities_changed()
    }

    /// Detach a node so it can be added to another executor.
    fn remove_node(&self, node: &Arc<Node>, notify: bool) -> Result<(), ExecutorError> {
        self.core().remove_node(node, notify)?;
        self.entities_changed()
    }

    fn add_callback_group(&self, group: &Arc<CallbackGroup>, notify: bool) -> Result<(), ExecutorError> {
        self.core().add_callback_group(group, notify)?;
        self.entities_changed()
    }

    fn remove_callback_group(&self, group: &Arc<CallbackGroup>, notify: bool) -> Result<(), ExecutorError> {
        self.core().remove_callback_group(group, notify)?;
        self.entities_changed()
    }

    fn get_all_callback_groups(&self) -> Vec<Arc<CallbackGroup>> {
        self.core().get_all_callback_groups()
    }

    fn get_manually_added_callback_groups(&self) -> Vec<Arc<CallbackGroup>> {
        self.core().get_manually_added_callback_groups()
    }

    fn get_automatically_added_callback_groups_from_nodes(&self) -> Vec<Arc<CallbackGroup>> {
        self.core().get_automatically_added_callback_groups_from_nodes()
    }

    /// Attach `node`, run one `spin_once`, detach.
    fn spin_node_once(&self, node: &Arc<Node>, timeout: Option<Duration>) -> Result<(), ExecutorError> {
        with_node(self, node, || self.spin_once(timeout))
    }

    fn spin_node_some(&self, node: &Arc<Node>, max_duration: Duration) -> Result<(), ExecutorError> {
        with_node(self, node, || self.spin_some(max_duration))
    }

    fn spin_node_all(&self, node: &Arc<Node>, max_duration: Duration) -> Result<(), ExecutorError> {
        with_node(self, node, || self.spin_all(max_duration))
    }

    /// Stop the active spin. Idempotent; no effect when not spinning.
    fn cancel(&self) {
        self.core().cancel();
    }

    fn is_spinning(&self) -> bool {
        self.core().is_spinning()
    }

    fn context(&self) -> &Arc<Context> {
        self.core().context()
    }

    fn metrics(&self) -> ExecutorMetrics {
        self.core().metrics()
    }
}

/// Run `f` with `node` attached, detaching afterwards even if `f` failed.
pub(crate) fn with_node<E, R>(
    executor: &E,
    node: &Arc<Node>,
    f: impl FnOnce() -> Result<R, ExecutorError>,
) -> Result<R, ExecutorError>
where
    E: Executor + ?Sized,
{
    executor.add_node(node, false)?;
    let result = f();
    executor.remove_node(node, false)?;
    result
}
