//! End-to-end tests for named thread pools.
//!
//! ```bash
//! cargo test --test pool_e2e -- --nocapture
//! ```

mod common;
use common::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use weft::{current_task, PoolConfig, TaskId, Weft};

#[test]
fn pool_drains_the_function_queue() {
    init_test_logging();
    weft::test_phase!("pool_drains_the_function_queue");

    let weft = Weft::new();
    let queue = weft.new_function_queue(16);
    let pool = weft
        .new_pool(PoolConfig::new(
            "drain",
            1,
            2,
            Duration::from_millis(100),
            queue.clone(),
        ))
        .expect("pool");

    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let done = Arc::clone(&done);
        queue
            .enqueue(move || {
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("enqueue");
    }

    assert!(
        wait_until(Duration::from_secs(5), || done.load(Ordering::SeqCst) == 10),
        "pool never drained the queue"
    );
    pool.close();
    weft::test_complete!("pool_drains_the_function_queue");
}

#[test]
fn pool_scales_to_max_then_decays_to_min() {
    init_test_logging();
    weft::test_phase!("pool_scales_to_max_then_decays_to_min");

    let weft = Weft::new();
    let queue = weft.new_function_queue(16);
    let pool = weft
        .new_pool(PoolConfig::new(
            "elastic",
            1,
            3,
            Duration::from_millis(50),
            queue.clone(),
        ))
        .expect("pool");

    // Three functions that all block until released force full scale-up.
    let gate = Arc::new(Barrier::new(4));
    for _ in 0..3 {
        let gate = Arc::clone(&gate);
        queue
            .enqueue(move || {
                gate.wait();
                Ok(())
            })
            .expect("enqueue");
    }

    let probe = pool.clone();
    assert!(
        wait_until(Duration::from_secs(5), || probe.busy_workers() == 3),
        "pool never scaled to max"
    );
    assert_eq!(pool.live_workers(), 3);

    gate.wait();

    // Idle workers above the minimum retire after the decay window.
    let probe = pool.clone();
    assert!(
        wait_until(Duration::from_secs(5), || probe.live_workers() <= 1),
        "surplus workers never retired"
    );
    pool.close();
    weft::test_complete!("pool_scales_to_max_then_decays_to_min");
}

#[test]
fn workers_are_managed_tasks() {
    init_test_logging();
    weft::test_phase!("workers_are_managed_tasks");

    let weft = Weft::new();
    let queue = weft.new_function_queue(4);
    let pool = weft
        .new_pool(PoolConfig::new(
            "managed",
            1,
            1,
            Duration::from_millis(100),
            queue.clone(),
        ))
        .expect("pool");

    let (tx, rx) = std::sync::mpsc::channel();
    queue
        .enqueue(move || {
            tx.send(current_task()).expect("send identity");
            Ok(())
        })
        .expect("enqueue");

    let id = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("function ran")
        .expect("worker has an identity");
    assert!(id.as_u64() >= TaskId::FIRST_USER);
    pool.close();
    weft::test_complete!("workers_are_managed_tasks");
}

#[test]
fn function_errors_reach_the_error_queue() {
    init_test_logging();
    weft::test_phase!("function_errors_reach_the_error_queue");

    let weft = Weft::new();
    let queue = weft.new_function_queue(4);
    let errors = weft.new_error_queue(4);
    let pool = weft
        .new_pool(
            PoolConfig::new("faulty", 1, 1, Duration::from_millis(100), queue.clone())
                .error_queue(errors.clone()),
        )
        .expect("pool");

    queue.enqueue(|| Err("broken".into())).expect("enqueue");

    assert!(
        wait_until(Duration::from_secs(5), || !errors.is_empty()),
        "error never reached the queue"
    );
    let report = errors.pop().expect("report");
    assert_eq!(report.error().to_string(), "broken");
    assert!(report.task().is_some());
    pool.close();
    weft::test_complete!("function_errors_reach_the_error_queue");
}

#[test]
fn worker_survives_panicking_function() {
    init_test_logging();
    weft::test_phase!("worker_survives_panicking_function");

    let weft = Weft::new();
    let queue = weft.new_function_queue(4);
    let errors = weft.new_error_queue(4);
    let pool = weft
        .new_pool(
            PoolConfig::new("resilient", 1, 1, Duration::from_millis(200), queue.clone())
                .error_queue(errors.clone()),
        )
        .expect("pool");

    queue
        .enqueue(|| panic!("function exploded"))
        .expect("enqueue panicking function");

    let done = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&done);
    queue
        .enqueue(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .expect("enqueue follow-up");

    assert!(
        wait_until(Duration::from_secs(5), || done.load(Ordering::SeqCst) == 1),
        "worker did not survive the panic"
    );
    let report = errors.pop().expect("panic captured as error");
    assert!(report.error().to_string().contains("function exploded"));
    pool.close();
    weft::test_complete!("worker_survives_panicking_function");
}

#[test]
fn close_unregisters_and_is_idempotent() {
    init_test_logging();
    weft::test_phase!("close_unregisters_and_is_idempotent");

    let weft = Weft::new();
    let queue = weft.new_function_queue(4);
    let pool = weft
        .new_pool(PoolConfig::new(
            "transient",
            0,
            1,
            Duration::from_millis(50),
            queue,
        ))
        .expect("pool");
    assert!(weft.get_pool("transient").is_some());

    pool.close();
    assert!(pool.is_closed());
    assert!(weft.get_pool("transient").is_none());
    pool.close();
    assert!(pool.is_closed());

    // The name is free again after closure.
    let queue = weft.new_function_queue(4);
    let reopened = weft
        .new_pool(PoolConfig::new(
            "transient",
            0,
            1,
            Duration::from_millis(50),
            queue,
        ))
        .expect("name is reusable after close");
    reopened.close();
    weft::test_complete!("close_unregisters_and_is_idempotent");
}
