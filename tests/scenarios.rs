//! Integration tests for the concrete scenarios in §8 of the design that
//! don't fit naturally as a colocated unit test — each exercises a full
//! [`Environment`] with real worker threads.
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use synctask::task;
use synctask::{EnvConfig, Environment};

fn small_env(proc_min: usize, proc_max: usize) -> Arc<Environment> {
    Environment::new(EnvConfig {
        proc_min,
        proc_max,
        idle_timeout: Duration::from_millis(50),
        ..EnvConfig::default()
    })
    .unwrap()
}

/// Scenario 1: cold start. Two workers come up immediately, no task has
/// run, and the queues are empty.
#[test]
fn cold_start_has_no_runnable_tasks() {
    let env = small_env(2, 8);
    assert_eq!(env.procs(), 2);
    assert_eq!(env.runcount(), 0);
    assert_eq!(env.waitcount(), 0);
    env.shutdown();
}

/// Scenario 2: fire-and-forget. `cbk` runs exactly once with the task's
/// return value, and `spawn_with_callback` itself returns immediately.
#[test]
fn fire_and_forget_invokes_callback_exactly_once() {
    let env = small_env(2, 4);
    let (tx, rx) = mpsc::channel::<i32>();
    let invocations = Arc::new(AtomicUsize::new(0));
    let invocations2 = invocations.clone();

    env.spawn_with_callback(
        None,
        || 42,
        move |ret| {
            invocations2.fetch_add(1, Ordering::SeqCst);
            tx.send(ret).unwrap();
        },
    )
    .unwrap();

    let ret = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(ret, 42);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    env.shutdown();
}

/// Scenario 3: synchronous submit blocks the creator and returns the
/// fiber's return value.
#[test]
fn synchronous_submit_blocks_and_returns_value() {
    let env = small_env(1, 4);
    let ret = env.spawn_sync(None, || 7).unwrap();
    assert_eq!(ret, 7);
    env.shutdown();
}

/// Scenario 4: multi-wake. Two wakes arriving before a `wait_for(2)`
/// satisfy it immediately — the fiber never actually suspends.
#[test]
fn multi_wake_satisfies_waitfor_without_suspending() {
    let env = small_env(2, 4);
    let resumed = Arc::new(AtomicI32::new(0));
    let resumed2 = resumed.clone();

    let ret = env
        .spawn_sync(None, move || {
            let me = task::current().unwrap();
            me.yawn();

            let a = me.clone();
            let b = me.clone();
            let h1 = std::thread::spawn(move || a.wake());
            let h2 = std::thread::spawn(move || b.wake());
            h1.join().unwrap();
            h2.join().unwrap();

            // Both wakes landed before this wait_for runs; per the
            // wake-coalescing law the task resumes without ever being
            // placed back on the wait queue.
            task::wait_for(2);
            resumed2.store(1, Ordering::SeqCst);
            9
        })
        .unwrap();

    assert_eq!(ret, 9);
    assert_eq!(resumed.load(Ordering::SeqCst), 1);
    env.shutdown();
}

/// Scenario 6: scale-up and self-retire. Submitting more long-running
/// tasks than `proc_min` but within `proc_max` grows the worker pool; once
/// they finish and the idle timeout passes, the pool shrinks back to
/// `proc_min`.
#[test]
fn scale_up_then_self_retire_to_minimum() {
    let env = small_env(2, 8);
    let started = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel::<()>();

    for _ in 0..20 {
        let started = started.clone();
        let tx = tx.clone();
        env.spawn_with_callback(
            None,
            move || {
                started.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(40));
                0
            },
            move |_| {
                tx.send(()).unwrap();
            },
        )
        .unwrap();
    }
    drop(tx);

    for _ in 0..20 {
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
    assert_eq!(started.load(Ordering::SeqCst), 20);
    assert!(env.procs() > 2, "pool should have scaled up under load");

    // Past the idle timeout with nothing left to run, every worker above
    // proc_min self-retires.
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(env.procs(), 2);
    env.shutdown();
}
