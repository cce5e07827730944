//! Shared helpers for Weft integration tests.

#![allow(dead_code)]

pub use weft::test_utils::{init_test_logging, wait_until};

use std::sync::mpsc;
use std::time::Duration;
use weft::Weft;

/// Runs `f` on a fresh managed task and blocks until it finishes.
///
/// Panics if the task does not finish within five seconds.
pub fn on_task(weft: &Weft, f: impl FnOnce() + Send + 'static) {
    let (tx, rx) = mpsc::channel();
    weft.spawn(move || {
        f();
        let _ = tx.send(());
    });
    rx.recv_timeout(Duration::from_secs(5))
        .expect("managed task did not finish in time");
}
