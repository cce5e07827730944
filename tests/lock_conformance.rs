//! Conformance tests for the identity-keyed re-entrant reader/writer lock.
//!
//! Covers cross-task behavior through the public API: shared reads,
//! recursion pairing, upgrades, and writer preference.
//!
//! ```bash
//! cargo test --test lock_conformance -- --nocapture
//! ```

mod common;
use common::*;

use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::time::Duration;
use weft::{ErrorKind, Weft};

#[test]
fn readers_proceed_concurrently() {
    init_test_logging();
    weft::test_phase!("readers_proceed_concurrently");

    let weft = Weft::new();
    let lock = weft.new_lock();
    let rendezvous = Arc::new(Barrier::new(2));
    let (tx, rx) = mpsc::channel();

    for _ in 0..2 {
        let lock = lock.clone();
        let rendezvous = Arc::clone(&rendezvous);
        let tx = tx.clone();
        weft.spawn(move || {
            lock.read_lock().expect("read");
            // Both tasks hold the read here; a writer would deadlock this.
            rendezvous.wait();
            lock.read_unlock().expect("release");
            tx.send(()).expect("done");
        });
    }

    for _ in 0..2 {
        rx.recv_timeout(Duration::from_secs(5))
            .expect("concurrent readers never met");
    }
    weft::test_complete!("readers_proceed_concurrently");
}

#[test]
fn full_recursion_sequence_unwinds_cleanly() {
    init_test_logging();
    weft::test_phase!("full_recursion_sequence_unwinds_cleanly");

    let weft = Weft::new();
    let lock = weft.new_lock();
    let probe = lock.clone();
    on_task(&weft, move || {
        probe.write_lock().expect("write 1");
        probe.write_lock().expect("write 2");
        probe.read_lock().expect("covered read");
        probe.read_unlock().expect("covered read release");
        probe.write_unlock().expect("write 2 release");
        probe.write_unlock().expect("write 1 release");
    });

    // The lock is idle again: an unrelated task can take the write at once.
    let probe = lock.clone();
    on_task(&weft, move || {
        probe.write_lock().expect("fresh write");
        probe.write_unlock().expect("fresh release");
    });
    weft::test_complete!("full_recursion_sequence_unwinds_cleanly");
}

#[test]
fn upgrade_waits_for_other_readers() {
    init_test_logging();
    weft::test_phase!("upgrade_waits_for_other_readers");

    let weft = Weft::new();
    let lock = weft.new_lock();

    // Task B holds a read until told to release.
    let b_lock = lock.clone();
    let (b_read_tx, b_read_rx) = mpsc::channel();
    let (b_release_tx, b_release_rx) = mpsc::channel::<()>();
    weft.spawn(move || {
        b_lock.read_lock().expect("B read");
        b_read_tx.send(()).expect("signal");
        b_release_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("release signal");
        b_lock.read_unlock().expect("B release");
    });
    b_read_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("B never read");

    // Task A reads then upgrades; the upgrade must block on B.
    let a_lock = lock.clone();
    let (a_write_tx, a_write_rx) = mpsc::channel();
    weft.spawn(move || {
        a_lock.read_lock().expect("A read");
        a_lock.write_lock().expect("A upgrade");
        a_write_tx.send(()).expect("signal");
        a_lock.write_unlock().expect("A write release");
        a_lock.read_unlock().expect("A read release");
    });

    let blocked = a_write_rx.recv_timeout(Duration::from_millis(100)).is_err();
    assert!(blocked, "upgrade should wait for the other reader");

    b_release_tx.send(()).expect("release B");
    a_write_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("upgrade never completed");
    weft::test_complete!("upgrade_waits_for_other_readers");
}

#[test]
fn lock_requires_managed_task() {
    init_test_logging();
    weft::test_phase!("lock_requires_managed_task");

    let weft = Weft::new();
    let lock = weft.new_lock();
    let kind = lock.write_lock().expect_err("off task").kind();
    assert_eq!(kind, ErrorKind::NotManagedTask);
    weft::test_complete!("lock_requires_managed_task");
}
