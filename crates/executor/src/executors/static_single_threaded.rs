use std::time::Duration;

use spindle_core::ExecutorError;
use tracing::{debug, info};

use crate::config::{ExecutorKind, ExecutorOptions};
use crate::executor::{Executor, ExecutorCore, RebuildPolicy, WaitDispatcher};

/// Single-threaded executor that caches its entity collection.
///
/// The collection is rebuilt only when the attached set changes through
/// this executor's `add_*`/`remove_*` methods. Entities or callback groups
/// created on an attached node afterwards are not seen until the next such
/// call (or [`invalidate`](Self::invalidate)); their events are missed
/// meanwhile. Every wait executes the whole ready batch in priority order.
pub struct StaticSingleThreadedExecutor {
    core: ExecutorCore,
    dispatcher: WaitDispatcher,
}

impl StaticSingleThreadedExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self {
            core: ExecutorCore::new(options.context, options.config, false),
            dispatcher: WaitDispatcher::new(RebuildPolicy::OnInvalidation),
        }
    }

    /// Rebuild the cached collection before the next wait.
    pub fn invalidate(&self) {
        self.dispatcher.invalidate();
    }

    /// Entities in the cached collection, or `None` before the first wait.
    pub fn cached_entity_count(&self) -> Option<usize> {
        self.dispatcher.collection_size()
    }
}

impl Default for StaticSingleThreadedExecutor {
    fn default() -> Self {
        Self::new(ExecutorOptions::default())
    }
}

impl Executor for StaticSingleThreadedExecutor {
    fn core(&self) -> &ExecutorCore {
        &self.core
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::StaticSingleThreaded
    }

    fn spin(&self) -> Result<(), ExecutorError> {
        let _spinning = self.core.begin_spin("spin")?;
        info!(executor = %self.core.id(), "static single-threaded spin started");
        while self.core.should_continue() {
            self.dispatcher
                .execute_ready_executables(&self.core, None, false)?;
        }
        info!(executor = %self.core.id(), "static single-threaded spin stopped");
        Ok(())
    }

    fn spin_some(&self, max_duration: Duration) -> Result<(), ExecutorError> {
        let _spinning = self.core.begin_spin("spin_some")?;
        self.dispatcher.spin_some_impl(&self.core, max_duration, false)
    }

    fn spin_all(&self, max_duration: Duration) -> Result<(), ExecutorError> {
        let _spinning = self.core.begin_spin("spin_all")?;
        self.dispatcher.spin_some_impl(&self.core, max_duration, true)
    }

    fn spin_once_impl(&self, timeout: Option<Duration>) -> Result<(), ExecutorError> {
        if self.core.should_continue() {
            self.dispatcher
                .execute_ready_executables(&self.core, timeout, true)?;
        }
        Ok(())
    }

    fn entities_changed(&self) -> Result<(), ExecutorError> {
        debug!(executor = %self.core.id(), "entity collection invalidated");
        self.dispatcher.invalidate();
        Ok(())
    }
}
