use std::time::Duration;

use spindle_core::ExecutorError;
use tracing::info;

use crate::config::{ExecutorKind, ExecutorOptions};
use crate::executor::{Executor, ExecutorCore, RebuildPolicy, WaitDispatcher};

/// Runs every callback on the thread that calls `spin`.
pub struct SingleThreadedExecutor {
    core: ExecutorCore,
    dispatcher: WaitDispatcher,
}

impl SingleThreadedExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self {
            core: ExecutorCore::new(options.context, options.config, false),
            dispatcher: WaitDispatcher::new(RebuildPolicy::EveryWait),
        }
    }
}

impl Default for SingleThreadedExecutor {
    fn default() -> Self {
        Self::new(ExecutorOptions::default())
    }
}

impl Executor for SingleThreadedExecutor {
    fn core(&self) -> &ExecutorCore {
        &self.core
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::SingleThreaded
    }

    fn spin(&self) -> Result<(), ExecutorError> {
        let _spinning = self.core.begin_spin("spin")?;
        info!(executor = %self.core.id(), "single-threaded spin started");
        while self.core.should_continue() {
            self.dispatcher.spin_once_impl(&self.core, None)?;
        }
        info!(executor = %self.core.id(), "single-threaded spin stopped");
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
        self.dispatcher.spin_once_impl(&self.core, timeout)?;
        Ok(())
    }
}
