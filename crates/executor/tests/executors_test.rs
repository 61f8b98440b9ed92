//! Scenarios every executor strategy must pass.
//!
//! Each scenario is a generic function; `for_each_executor!` instantiates it
//! once per strategy.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use futures::future;
use spindle_executor::{
    create_executor, spin_node_until_future_complete, CallbackGroupType, EventsExecutor, Executor,
    ExecutorConfig, ExecutorError, ExecutorKind, ExecutorOptions, FutureReturnCode, MultiThreadedExecutor,
    Node, SingleThreadedExecutor, StaticSingleThreadedExecutor,
};

use common::{wait_for, Fixture, TestExecutor, TestWaitable};

const LONG: Duration = Duration::from_secs(1);

macro_rules! for_each_executor {
    ($($scenario:ident),* $(,)?) => {
        mod single_threaded {
            $( #[test] fn $scenario() { super::$scenario::<super::SingleThreadedExecutor>(); } )*
        }
        mod multi_threaded {
            $( #[test] fn $scenario() { super::$scenario::<super::MultiThreadedExecutor>(); } )*
        }
        mod static_single_threaded {
            $( #[test] fn $scenario() { super::$scenario::<super::StaticSingleThreadedExecutor>(); } )*
        }
        mod events {
            $( #[test] fn $scenario() { super::$scenario::<super::EventsExecutor>(); } )*
        }
    };
}

for_each_executor!(
    detach_on_drop,
    add_temporary_node,
    empty_executor_cancels,
    add_node_to_two_executors,
    add_node_concurrently_to_two_executors,
    spin_with_timer,
    spin_while_already_spinning,
    future_already_complete,
    future_never_completes_times_out,
    future_completed_from_another_thread,
    gated_group_does_not_lose_events,
    spin_all_picks_up_new_work,
    spin_some_runs_ready_work,
    spin_node_until_future_complete_detaches,
    shutdown_interrupts_future_wait,
    add_node_while_spinning_then_cancel,
    entity_triggered_during_add_node_runs,
    poll_only_waitable_runs,
    service_round_trip,
    subscription_drains_backlog,
);

// ── Attachment ──────────────────────────────────────────────────────

fn detach_on_drop<E: TestExecutor>() {
    let fx = Fixture::new("detach_on_drop");
    {
        let executor: E = fx.executor();
        executor.add_node(&fx.node, true).unwrap();
    }
    let executor: E = fx.executor();
    executor.add_node(&fx.node, true).unwrap();
}

fn add_temporary_node<E: TestExecutor>() {
    let fx = Fixture::new("anchor");
    let executor: E = fx.executor();
    for _ in 0..10 {
        let node = Node::with_context("temporary", Arc::clone(&fx.context)).unwrap();
        executor.spin_node_some(&node, Duration::ZERO).unwrap();
        assert!(!node.is_associated_with_executor());
    }
}

fn add_node_to_two_executors<E: TestExecutor>() {
    let fx = Fixture::new("two_executors");
    let first: E = fx.executor();
    let second: E = fx.executor();

    first.add_node(&fx.node, true).unwrap();
    assert!(matches!(
        second.add_node(&fx.node, true),
        Err(ExecutorError::AlreadyAttached { .. })
    ));
    first.remove_node(&fx.node, true).unwrap();
    second.add_node(&fx.node, true).unwrap();
}

fn add_node_concurrently_to_two_executors<E: TestExecutor>() {
    for round in 0..10 {
        let fx = Fixture::new("contended");
        let first: E = fx.executor();
        let second: E = fx.executor();
        let barrier = Barrier::new(2);

        let (a, b) = thread::scope(|s| {
            let a = s.spawn(|| {
                barrier.wait();
                first.add_node(&fx.node, true)
            });
            let b = s.spawn(|| {
                barrier.wait();
                second.add_node(&fx.node, true)
            });
            (a.join().unwrap(), b.join().unwrap())
        });

        assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1, "round {round}");
        let rejected = if a.is_ok() { b } else { a };
        assert!(matches!(rejected, Err(ExecutorError::AlreadyAttached { .. })));
    }
}

// ── Spinning ────────────────────────────────────────────────────────

fn empty_executor_cancels<E: TestExecutor>() {
    let fx = Fixture::new("empty");
    let executor: E = fx.executor();
    thread::scope(|s| {
        let spinner = s.spawn(|| executor.spin());
        assert!(wait_for(LONG, || executor.is_spinning()));
        let canceled_at = Instant::now();
        executor.cancel();
        spinner.join().unwrap().unwrap();
        assert!(canceled_at.elapsed() < LONG, "took {:?}", canceled_at.elapsed());
    });
    assert!(!executor.is_spinning());
}

fn spin_with_timer<E: TestExecutor>() {
    let fx = Fixture::new("timer");
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    let _timer = fx
        .node
        .create_timer(Duration::from_millis(1), None, move || flag.store(true, Ordering::SeqCst))
        .unwrap();

    let executor: E = fx.executor();
    executor.add_node(&fx.node, true).unwrap();
    thread::scope(|s| {
        let spinner = s.spawn(|| executor.spin());
        assert!(wait_for(LONG, || fired.load(Ordering::SeqCst)));
        assert!(wait_for(LONG, || executor.is_spinning()));
        executor.cancel();
        spinner.join().unwrap().unwrap();
    });
    assert!(executor.metrics().total_executions() >= 1);
}

fn spin_while_already_spinning<E: TestExecutor>() {
    let fx = Fixture::new("double_spin");
    let executor: E = fx.executor();
    executor.add_node(&fx.node, true).unwrap();
    thread::scope(|s| {
        let spinner = s.spawn(|| executor.spin());
        assert!(wait_for(LONG, || executor.is_spinning()));

        assert!(matches!(executor.spin(), Err(ExecutorError::ConcurrentSpin(_))));
        assert!(matches!(
            executor.spin_some(Duration::ZERO),
            Err(ExecutorError::ConcurrentSpin(_))
        ));
        assert!(matches!(
            executor.spin_once(Some(Duration::ZERO)),
            Err(ExecutorError::ConcurrentSpin(_))
        ));

        executor.cancel();
        spinner.join().unwrap().unwrap();
    });
}

fn spin_all_picks_up_new_work<E: TestExecutor>() {
    let fx = Fixture::new("spin_all");
    let waitable = TestWaitable::new();
    fx.node.add_waitable(waitable.clone(), None).unwrap();
    let executor: E = fx.executor();
    executor.add_node(&fx.node, true).unwrap();

    let exited = AtomicBool::new(false);
    waitable.trigger();
    thread::scope(|s| {
        let spinner = s.spawn(|| {
            let result = executor.spin_all(LONG);
            exited.store(true, Ordering::SeqCst);
            result
        });
        let start = Instant::now();
        while waitable.count() <= 1 && !exited.load(Ordering::SeqCst) && start.elapsed() < LONG {
            waitable.trigger();
            thread::sleep(Duration::from_millis(1));
        }
        executor.cancel();
        spinner.join().unwrap().unwrap();
    });
    assert!(waitable.count() > 1, "count = {}", waitable.count());
}

fn spin_some_runs_ready_work<E: TestExecutor>() {
    let fx = Fixture::new("spin_some");
    let waitable = TestWaitable::new();
    fx.node.add_waitable(waitable.clone(), None).unwrap();
    let executor: E = fx.executor();
    executor.add_node(&fx.node, true).unwrap();

    let exited = AtomicBool::new(false);
    waitable.trigger();
    thread::scope(|s| {
        let spinner = s.spawn(|| {
            let result = executor.spin_some(LONG);
            exited.store(true, Ordering::SeqCst);
            result
        });
        let start = Instant::now();
        while waitable.count() <= 1 && !exited.load(Ordering::SeqCst) && start.elapsed() < LONG {
            waitable.trigger();
            thread::sleep(Duration::from_millis(1));
        }
        assert!(wait_for(LONG, || exited.load(Ordering::SeqCst)));
        executor.cancel();
        spinner.join().unwrap().unwrap();
    });
    assert!(waitable.count() >= 1);
}

// ── Futures ─────────────────────────────────────────────────────────

fn future_already_complete<E: TestExecutor>() {
    let fx = Fixture::new("ready_future");
    let executor: E = fx.executor();
    executor.add_node(&fx.node, true).unwrap();

    let start = Instant::now();
    let code = executor
        .spin_until_future_complete(future::ready(true), Some(LONG))
        .unwrap();
    assert_eq!(code, FutureReturnCode::Success(true));
    assert!(start.elapsed() < LONG);
    assert!(!executor.is_spinning());
}

fn future_never_completes_times_out<E: TestExecutor>() {
    let fx = Fixture::new("pending_future");
    let executor: E = fx.executor();
    executor.add_node(&fx.node, true).unwrap();

    let timeout = Duration::from_millis(50);
    let start = Instant::now();
    let code = executor
        .spin_until_future_complete(future::pending::<()>(), Some(timeout))
        .unwrap();
    assert_eq!(code, FutureReturnCode::Timeout);
    assert!(start.elapsed() >= timeout);
}

fn future_completed_from_another_thread<E: TestExecutor>() {
    let fx = Fixture::new("remote_future");
    let executor: E = fx.executor();
    executor.add_node(&fx.node, true).unwrap();

    let (tx, rx) = oneshot::channel();
    thread::scope(|s| {
        s.spawn(move || {
            thread::sleep(Duration::from_millis(10));
            tx.send(42).unwrap();
        });
        let code = executor.spin_until_future_complete(rx, None).unwrap();
        assert_eq!(code, FutureReturnCode::Success(Ok(42)));
    });
}

fn spin_node_until_future_complete_detaches<E: TestExecutor>() {
    let fx = Fixture::new("spin_node_future");
    let executor: E = fx.executor();
    let code =
        spin_node_until_future_complete(&executor, &fx.node, future::ready("done"), Some(LONG)).unwrap();
    assert_eq!(code.to_string(), "SUCCESS");
    assert_eq!(code.into_success(), Some("done"));
    assert!(!fx.node.is_associated_with_executor());
}

fn shutdown_interrupts_future_wait<E: TestExecutor>() {
    let fx = Fixture::new("interrupted");
    let executor: E = fx.executor();
    executor.add_node(&fx.node, true).unwrap();

    thread::scope(|s| {
        let spinner = s.spawn(|| {
            executor
                .spin_until_future_complete(future::pending::<()>(), Some(LONG))
                .unwrap()
        });
        assert!(wait_for(LONG, || executor.is_spinning()));
        fx.context.shutdown("test over");
        let code = spinner.join().unwrap();
        assert!(code.is_interrupted(), "got {code}");
    });
}

/// Readiness of a member of a closed group is held back, not dropped, and
/// delivered once the group reopens.
fn gated_group_does_not_lose_events<E: TestExecutor>() {
    let fx = Fixture::new("missing_event");
    let group = fx
        .node
        .create_callback_group(CallbackGroupType::MutuallyExclusive, false);
    let first = TestWaitable::new();
    let second = TestWaitable::new();
    fx.node.add_waitable(first.clone(), Some(&group)).unwrap();
    fx.node.add_waitable(second.clone(), Some(&group)).unwrap();

    let executor: E = fx.executor();
    executor.add_callback_group(&group, true).unwrap();

    first.trigger();
    second.trigger();

    let done = first.reset_execute_promise();
    let code = executor.spin_until_future_complete(done, Some(Duration::from_secs(2))).unwrap();
    assert!(code.is_success());
    assert_eq!(first.count(), 1);
    assert_eq!(second.count(), 0);

    group.can_be_taken_from().exchange(false);
    let done = second.reset_execute_promise();
    let code = executor
        .spin_until_future_complete(done, Some(Duration::from_millis(100)))
        .unwrap();
    assert!(code.is_timeout());
    assert_eq!(first.count(), 1);
    assert_eq!(second.count(), 0);

    group.can_be_taken_from().exchange(true);
    let done = second.reset_execute_promise();
    let code = executor.spin_until_future_complete(done, Some(Duration::from_secs(2))).unwrap();
    assert!(code.is_success());
    assert_eq!(first.count(), 1);
    assert_eq!(second.count(), 1);
}

// ── Concurrency ─────────────────────────────────────────────────────

/// Attaching a node while another thread spins, with the machine under
/// load, must leave the executor responsive to `cancel`.
fn add_node_while_spinning_then_cancel<E: TestExecutor>() {
    let fx = Fixture::new("race_add_node");
    let executor: E = fx.executor();
    let stop_load = AtomicBool::new(false);
    let exited = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut x = 0u64;
                while !stop_load.load(Ordering::Relaxed) {
                    x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
                    std::hint::black_box(x);
                }
            });
        }
        let spinner = s.spawn(|| {
            let result = executor.spin();
            exited.store(true, Ordering::SeqCst);
            result
        });

        assert!(wait_for(LONG, || executor.is_spinning()));
        executor.add_node(&fx.node, true).unwrap();
        thread::sleep(Duration::from_millis(5));
        executor.cancel();

        let responsive = wait_for(LONG, || exited.load(Ordering::SeqCst));
        stop_load.store(true, Ordering::Relaxed);
        assert!(responsive, "executor did not react to cancel");
        spinner.join().unwrap().unwrap();
    });
}

/// An entity that becomes ready while its node is being attached to a
/// spinning executor is executed, whichever of the two lands first.
fn entity_triggered_during_add_node_runs<E: TestExecutor>() {
    let fx = Fixture::new("anchor");
    let executor: E = fx.executor();
    executor.add_node(&fx.node, true).unwrap();

    thread::scope(|s| {
        let spinner = s.spawn(|| executor.spin());
        assert!(wait_for(LONG, || executor.is_spinning()));

        let mut attached = Vec::new();
        for round in 0..10 {
            let node = Node::with_context(&format!("late_{round}"), Arc::clone(&fx.context)).unwrap();
            let waitable = TestWaitable::new();
            node.add_waitable(waitable.clone(), None).unwrap();

            let barrier = Barrier::new(2);
            thread::scope(|inner| {
                inner.spawn(|| {
                    barrier.wait();
                    waitable.trigger();
                });
                barrier.wait();
                executor.add_node(&node, true).unwrap();
            });

            assert!(wait_for(LONG, || waitable.count() == 1), "round {round}");
            attached.push((node, waitable));
        }

        executor.cancel();
        spinner.join().unwrap().unwrap();
    });
}

// ── Entities ────────────────────────────────────────────────────────

/// A waitable without on-ready callback support is polled by every
/// strategy, the event-driven one included.
fn poll_only_waitable_runs<E: TestExecutor>() {
    let fx = Fixture::new("poll_only");
    let waitable = TestWaitable::poll_only();
    fx.node.add_waitable(waitable.clone(), None).unwrap();
    let executor: E = fx.executor();
    executor.add_node(&fx.node, true).unwrap();

    waitable.trigger();
    executor.spin_all(Duration::from_millis(200)).unwrap();
    assert_eq!(waitable.count(), 1);

    let done = waitable.reset_execute_promise();
    thread::scope(|s| {
        s.spawn(|| {
            thread::sleep(Duration::from_millis(10));
            waitable.trigger();
        });
        let code = executor.spin_until_future_complete(done, Some(LONG)).unwrap();
        assert!(code.is_success());
    });
    assert_eq!(waitable.count(), 2);
}

fn service_round_trip<E: TestExecutor>() {
    let fx = Fixture::new("adder");
    let _service = fx
        .node
        .create_service::<(i64, i64), i64, _>("add_two_ints", None, |(a, b)| a + b)
        .unwrap();
    let client = fx.node.create_client::<(i64, i64), i64>("add_two_ints", None).unwrap();
    assert!(client.service_is_ready());

    let executor: E = fx.executor();
    executor.add_node(&fx.node, true).unwrap();

    let response = client.async_send_request((2, 3)).unwrap();
    let code = executor.spin_until_future_complete(response, Some(LONG)).unwrap();
    assert_eq!(code, FutureReturnCode::Success(Ok(5)));
    assert_eq!(client.pending_requests(), 0);
}

fn subscription_drains_backlog<E: TestExecutor>() {
    let fx = Fixture::new("listener");
    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    let subscription = fx
        .node
        .create_subscription::<String, _>("chatter", 10, None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let publisher = fx.node.create_publisher::<String>("chatter");
    for i in 0..3 {
        assert_eq!(publisher.publish(format!("hello {i}")).unwrap(), 1);
    }

    let executor: E = fx.executor();
    executor.add_node(&fx.node, true).unwrap();
    executor.spin_all(LONG).unwrap();

    assert_eq!(received.load(Ordering::SeqCst), 3);
    assert_eq!(subscription.pending(), 0);
}

// ── Strategy-specific ───────────────────────────────────────────────

#[test]
fn factory_builds_requested_strategy() {
    for kind in [
        ExecutorKind::SingleThreaded,
        ExecutorKind::MultiThreaded,
        ExecutorKind::StaticSingleThreaded,
        ExecutorKind::Events,
    ] {
        let config = ExecutorConfig {
            kind,
            ..ExecutorConfig::default()
        };
        let executor = create_executor(ExecutorOptions::with_context(spindle_executor::Context::new()).config(config));
        assert_eq!(executor.kind(), kind);
        assert!(!executor.is_spinning());
    }
}

fn max_parallelism(kind: CallbackGroupType) -> usize {
    let fx = Fixture::new("parallel");
    let group = fx.node.create_callback_group(kind, true);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let mut timers = Vec::new();
    for _ in 0..2 {
        let (in_flight, peak, runs) = (Arc::clone(&in_flight), Arc::clone(&peak), Arc::clone(&runs));
        timers.push(
            fx.node
                .create_timer(Duration::from_millis(5), Some(&group), move || {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(30));
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    runs.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap(),
        );
    }

    let executor: MultiThreadedExecutor = fx.executor();
    executor.add_node(&fx.node, true).unwrap();
    thread::scope(|s| {
        let spinner = s.spawn(|| executor.spin());
        wait_for(Duration::from_secs(2), || {
            peak.load(Ordering::SeqCst) >= 2 || runs.load(Ordering::SeqCst) >= 10
        });
        executor.cancel();
        spinner.join().unwrap().unwrap();
    });
    peak.load(Ordering::SeqCst)
}

#[test]
fn multi_threaded_runs_reentrant_group_in_parallel() {
    assert_eq!(max_parallelism(CallbackGroupType::Reentrant), 2);
}

#[test]
fn multi_threaded_serializes_exclusive_group() {
    assert_eq!(max_parallelism(CallbackGroupType::MutuallyExclusive), 1);
}

#[test]
fn multi_threaded_reports_thread_count() {
    let fx = Fixture::new("threads");
    let executor: MultiThreadedExecutor = fx.executor();
    assert_eq!(executor.number_of_threads(), 4);
}

#[test]
fn tokio_oneshot_resolves_without_a_runtime() {
    let fx = Fixture::new("tokio_future");
    let executor: SingleThreadedExecutor = fx.executor();
    executor.add_node(&fx.node, true).unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel::<u8>();
    thread::scope(|s| {
        s.spawn(move || {
            thread::sleep(Duration::from_millis(10));
            tx.send(7).unwrap();
        });
        let code = executor.spin_until_future_complete(rx, Some(LONG)).unwrap();
        assert_eq!(code.into_success().map(|r| r.ok()), Some(Some(7)));
    });
}
