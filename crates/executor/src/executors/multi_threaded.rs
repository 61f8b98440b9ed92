use std::sync::Mutex;
use std::time::Duration;

use spindle_core::ExecutorError;
use tracing::{debug, error, info};

use crate::config::{ExecutorKind, ExecutorOptions};
use crate::executor::{Executor, ExecutorCore, RebuildPolicy, WaitDispatcher};

/// Runs callbacks on a pool of worker threads.
///
/// Workers take turns waiting on the shared wait set; whoever selects an
/// executable runs it outside the dispatcher lock so the next worker can
/// select concurrently. Mutually exclusive groups still run one callback at
/// a time; reentrant groups run distinct entities in parallel.
pub struct MultiThreadedExecutor {
    core: ExecutorCore,
    dispatcher: WaitDispatcher,
    number_of_threads: usize,
    yield_before_execute: bool,
    next_exec_timeout: Option<Duration>,
}

impl MultiThreadedExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        let number_of_threads = options.config.resolved_number_of_threads();
        let yield_before_execute = options.config.yield_before_execute;
        let next_exec_timeout = options.config.next_exec_timeout();
        Self {
            core: ExecutorCore::new(options.context, options.config, true),
            dispatcher: WaitDispatcher::new(RebuildPolicy::EveryWait),
            number_of_threads,
            yield_before_execute,
            next_exec_timeout,
        }
    }

    pub fn number_of_threads(&self) -> usize {
        self.number_of_threads
    }

    fn run_worker(&self, worker: usize) -> Result<(), ExecutorError> {
        debug!(executor = %self.core.id(), worker, "worker started");
        while self.core.should_continue() {
            let Some(executable) = self
                .dispatcher
                .get_next_executable(&self.core, self.next_exec_timeout)?
            else {
                continue;
            };
            if self.yield_before_execute {
                std::thread::yield_now();
            }
            self.core.execute_any_executable(executable);
        }
        debug!(executor = %self.core.id(), worker, "worker stopped");
        Ok(())
    }
}

impl Default for MultiThreadedExecutor {
    fn default() -> Self {
        Self::new(ExecutorOptions::default())
    }
}

impl Executor for MultiThreadedExecutor {
    fn core(&self) -> &ExecutorCore {
        &self.core
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::MultiThreaded
    }

    fn spin(&self) -> Result<(), ExecutorError> {
        let _spinning = self.core.begin_spin("spin")?;
        let threads = self.number_of_threads;
        info!(executor = %self.core.id(), threads, "multi-threaded spin started");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("spindle-worker-{i}"))
            .build()
            .map_err(|e| ExecutorError::RuntimeFault(format!("failed to build worker pool: {e}")))?;

        let first_error: Mutex<Option<ExecutorError>> = Mutex::new(None);
        pool.scope(|scope| {
            for worker in 0..threads {
                let first_error = &first_error;
                scope.spawn(move |_| {
                    if let Err(e) = self.run_worker(worker) {
                        error!(executor = %self.core.id(), worker, error = %e, "worker failed, stopping spin");
                        if let Ok(mut slot) = first_error.lock() {
                            slot.get_or_insert(e);
                        }
                        self.core.cancel();
                    }
                });
            }
        });

        info!(executor = %self.core.id(), "multi-threaded spin stopped");
        match first_error.into_inner() {
            Ok(Some(e)) => Err(e),
            Ok(None) => Ok(()),
            Err(_) => Err(ExecutorError::poisoned("worker error slot")),
        }
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
