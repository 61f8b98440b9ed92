//! Shared fixtures for the executor integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use spindle_core::{AnyData, ExecutorError, GuardCondition, ReadyCallback, WaitResult, WaitSet, Waitable};
use spindle_executor::{
    Context, EventsExecutor, Executor, ExecutorConfig, ExecutorKind, ExecutorOptions,
    MultiThreadedExecutor, Node, SingleThreadedExecutor, StaticSingleThreadedExecutor,
};

/// Executors buildable from options, so every scenario can run on all
/// strategies.
pub trait TestExecutor: Executor + Sized + 'static {
    fn build(options: ExecutorOptions) -> Self;
}

impl TestExecutor for SingleThreadedExecutor {
    fn build(options: ExecutorOptions) -> Self {
        Self::new(options)
    }
}

impl TestExecutor for MultiThreadedExecutor {
    fn build(options: ExecutorOptions) -> Self {
        let config = ExecutorConfig {
            kind: ExecutorKind::MultiThreaded,
            number_of_threads: 4,
            ..options.config.clone()
        };
        Self::new(options.config(config))
    }
}

impl TestExecutor for StaticSingleThreadedExecutor {
    fn build(options: ExecutorOptions) -> Self {
        Self::new(options)
    }
}

impl TestExecutor for EventsExecutor {
    fn build(options: ExecutorOptions) -> Self {
        Self::new(options)
    }
}

/// A fresh context and node per test, so shutdown in one test never leaks
/// into another.
pub struct Fixture {
    pub context: Arc<Context>,
    pub node: Arc<Node>,
}

impl Fixture {
    pub fn new(name: &str) -> Self {
        let context = Context::new();
        let node = Node::with_context(name, Arc::clone(&context)).unwrap();
        Self { context, node }
    }

    pub fn executor<E: TestExecutor>(&self) -> E {
        E::build(ExecutorOptions::with_context(Arc::clone(&self.context)))
    }
}

/// Guard-backed waitable that counts executions and resolves a resettable
/// future on each one.
///
/// `take_data` fails unless `is_ready` reported true since the last take.
pub struct TestWaitable {
    guard: Arc<GuardCondition>,
    checked: AtomicBool,
    count: AtomicUsize,
    promise: Mutex<Option<oneshot::Sender<()>>>,
    execute_delay: Duration,
    edge_driven: bool,
}

impl TestWaitable {
    pub fn new() -> Arc<Self> {
        Self::build(true)
    }

    /// A waitable that never accepts an on-ready callback and must be
    /// polled through a wait set.
    pub fn poll_only() -> Arc<Self> {
        Self::build(false)
    }

    fn build(edge_driven: bool) -> Arc<Self> {
        Arc::new(Self {
            guard: GuardCondition::new(),
            checked: AtomicBool::new(false),
            count: AtomicUsize::new(0),
            promise: Mutex::new(None),
            execute_delay: Duration::from_millis(3),
            edge_driven,
        })
    }

    pub fn trigger(&self) {
        self.guard.trigger();
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Future resolved by the next execution.
    pub fn reset_execute_promise(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.promise.lock().unwrap() = Some(tx);
        rx
    }
}

impl Waitable for TestWaitable {
    fn name(&self) -> &str {
        "test_waitable"
    }

    fn add_to_wait_set(&self, wait_set: &mut WaitSet) {
        wait_set.add_guard_condition(&self.guard);
    }

    fn is_ready(&self, result: &WaitResult) -> bool {
        let ready = result.is_guard_ready(self.guard.id());
        if ready {
            self.checked.store(true, Ordering::SeqCst);
        }
        ready
    }

    fn take_data(&self) -> Result<Option<AnyData>, ExecutorError> {
        if !self.checked.swap(false, Ordering::SeqCst) {
            return Err(ExecutorError::TakeWithoutReady(self.name().to_string()));
        }
        self.guard.clear();
        Ok(Some(Box::new(())))
    }

    fn take_data_by_entity_id(&self, _entity_data: usize) -> Result<Option<AnyData>, ExecutorError> {
        self.guard.clear();
        Ok(Some(Box::new(())))
    }

    fn execute(&self, _data: AnyData) -> Result<(), ExecutorError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.execute_delay);
        if let Some(tx) = self.promise.lock().unwrap().take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    fn supports_on_ready_callback(&self) -> bool {
        self.edge_driven
    }

    fn set_on_ready_callback(&self, callback: ReadyCallback) {
        self.guard
            .set_on_trigger_callback(Some(Box::new(move |count| callback(count, 0))));
    }

    fn clear_on_ready_callback(&self) {
        self.guard.set_on_trigger_callback(None);
    }
}

/// Poll `cond` every millisecond until it holds or `limit` elapses.
pub fn wait_for(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
