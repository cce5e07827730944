//! End-to-end tests for task-local storage.
//!
//! Covers initializer/destroyer lifecycles across real managed tasks,
//! including cleanup at task exit.
//!
//! ```bash
//! cargo test --test local_e2e -- --nocapture
//! ```

mod common;
use common::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weft::{current_task, ErrorKind, ErrorReport, LocalOptions, Weft};

#[test]
fn destroyer_sees_stored_value_after_task_exit() {
    init_test_logging();
    weft::test_phase!("destroyer_sees_stored_value_after_task_exit");

    let weft = Weft::new();
    let sink = weft.new_error_queue(8);
    let report_sink = sink.clone();
    weft.establish_local(
        "db",
        LocalOptions::new()
            .initializer(|cell| {
                cell.set(42_u32);
                Ok(())
            })
            .destroyer(move |cell| {
                let value = cell.take::<u32>().expect("value stored by initializer");
                report_sink.push(ErrorReport::new(Some(cell.task()), value.to_string().into()));
                Ok(())
            }),
    )
    .expect("establish");

    let probe = weft.clone();
    on_task(&weft, move || {
        let value = probe
            .with_local("db", |cell| cell.get::<u32>().copied())
            .expect("local access");
        assert_eq!(value, Some(42));
    });

    assert!(
        wait_until(Duration::from_secs(5), || !sink.is_empty()),
        "destroyer never ran"
    );
    let report = sink.pop().expect("exactly one report");
    assert_eq!(report.error().to_string(), "42");
    assert!(sink.is_empty(), "destroyer must run exactly once");
    weft::test_complete!("destroyer_sees_stored_value_after_task_exit");
}

#[test]
fn value_is_stable_within_a_task() {
    init_test_logging();
    weft::test_phase!("value_is_stable_within_a_task");

    let weft = Weft::new();
    let init_runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&init_runs);
    weft.establish_local(
        "session",
        LocalOptions::new().initializer(move |cell| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            cell.set(n);
            Ok(())
        }),
    )
    .expect("establish");

    let probe = weft.clone();
    on_task(&weft, move || {
        let first = probe
            .with_local("session", |cell| cell.get::<usize>().copied())
            .expect("first access");
        let second = probe
            .with_local("session", |cell| cell.get::<usize>().copied())
            .expect("second access");
        assert_eq!(first, second);
    });
    assert_eq!(init_runs.load(Ordering::SeqCst), 1);
    weft::test_complete!("value_is_stable_within_a_task");
}

#[test]
fn tasks_get_independent_cells() {
    init_test_logging();
    weft::test_phase!("tasks_get_independent_cells");

    let weft = Weft::new();
    for expected in [1_u64, 2, 3] {
        let probe = weft.clone();
        on_task(&weft, move || {
            let observed = probe
                .with_local("scratch", |cell| {
                    assert!(!cell.is_set(), "cell must start empty per task");
                    cell.set(expected);
                    cell.get::<u64>().copied()
                })
                .expect("local access");
            assert_eq!(observed, Some(expected));
        });
    }
    weft::test_complete!("tasks_get_independent_cells");
}

#[test]
fn local_access_requires_managed_task() {
    init_test_logging();
    weft::test_phase!("local_access_requires_managed_task");

    let weft = Weft::new();
    let kind = weft
        .with_local("anything", |_| ())
        .expect_err("off task")
        .kind();
    assert_eq!(kind, ErrorKind::NotManagedTask);
    weft::test_complete!("local_access_requires_managed_task");
}

#[test]
fn establish_is_first_come_only() {
    init_test_logging();
    weft::test_phase!("establish_is_first_come_only");

    let weft = Weft::new();
    weft.establish_local("unique", LocalOptions::new())
        .expect("first establish");
    let kind = weft
        .establish_local("unique", LocalOptions::new())
        .expect_err("duplicate")
        .kind();
    assert_eq!(kind, ErrorKind::SlotAlreadyExists);
    weft::test_complete!("establish_is_first_come_only");
}

#[test]
fn cell_records_owning_task() {
    init_test_logging();
    weft::test_phase!("cell_records_owning_task");

    let weft = Weft::new();
    let probe = weft.clone();
    on_task(&weft, move || {
        let me = current_task().expect("managed");
        let owner = probe
            .with_local("owner", |cell| cell.task())
            .expect("local access");
        assert_eq!(owner, me);
    });
    weft::test_complete!("cell_records_owning_task");
}
