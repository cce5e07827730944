//! Named thread pools with idle decay.
//!
//! A pool drains a shared [`FunctionQueue`], scaling its worker count
//! between configured bounds:
//!
//! - `min_workers` workers are spawned eagerly when the pool opens.
//! - When work arrives and every live worker is busy, a new worker is
//!   spawned, up to `max_workers`.
//! - A worker idle past `idle_decay` retires when live workers exceed
//!   `min_workers`.
//!
//! Workers are managed tasks spawned through the owning facade, so pooled
//! functions can use identity-keyed locks and task locals. Function errors
//! and panics are pushed to the pool's error queue (or dropped when none is
//! configured); a panicking function does not take its worker down.
//!
//! Pools are registered by name with their facade; [`Pool::close`]
//! unregisters the name and lets the workers drain away.

use crate::error::{Error, ErrorKind};
use crate::facade::{Weft, WeftInner};
use crate::queue::{ErrorQueue, ErrorReport, FunctionQueue};
use crate::task::current_task;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Creation parameters for a pool.
#[derive(Clone)]
pub struct PoolConfig {
    /// Pool name; must be non-empty and unique within the facade.
    pub name: String,
    /// Workers kept alive while the pool is open.
    pub min_workers: usize,
    /// Upper bound on simultaneously live workers.
    pub max_workers: usize,
    /// How long a surplus worker may sit idle before retiring.
    pub idle_decay: Duration,
    /// The queue this pool drains.
    pub function_queue: FunctionQueue,
    /// Receives function errors; errors are dropped when unset.
    pub error_queue: Option<ErrorQueue>,
}

impl PoolConfig {
    /// Creates a configuration with the required parameters and no error
    /// queue.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        min_workers: usize,
        max_workers: usize,
        idle_decay: Duration,
        function_queue: FunctionQueue,
    ) -> Self {
        Self {
            name: name.into(),
            min_workers,
            max_workers,
            idle_decay,
            function_queue,
            error_queue: None,
        }
    }

    /// Sets the error queue.
    #[must_use]
    pub fn error_queue(mut self, queue: ErrorQueue) -> Self {
        self.error_queue = Some(queue);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), PoolError> {
        if self.name.is_empty() {
            return Err(PoolError::InvalidConfig("pool name must not be empty"));
        }
        if self.max_workers < self.min_workers {
            return Err(PoolError::InvalidConfig(
                "max_workers must be at least min_workers",
            ));
        }
        if self.min_workers == 0 && self.max_workers == 0 {
            return Err(PoolError::InvalidConfig(
                "min_workers and max_workers must not both be zero",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("name", &self.name)
            .field("min_workers", &self.min_workers)
            .field("max_workers", &self.max_workers)
            .field("idle_decay", &self.idle_decay)
            .field("error_queue", &self.error_queue.is_some())
            .finish()
    }
}

/// Error returned by [`Weft::new_pool`](crate::Weft::new_pool).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    /// A pool with this name is already registered. The existing pool is
    /// carried for convenience.
    #[error("pool {:?} already exists", .0.name())]
    AlreadyExists(Pool),
    /// The creation parameters are invalid.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(&'static str),
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::AlreadyExists(pool) => Self::new(ErrorKind::PoolAlreadyExists)
                .with_context(format!("pool {:?}", pool.name())),
            PoolError::InvalidConfig(reason) => {
                Self::new(ErrorKind::InvalidPoolConfig).with_context(reason)
            }
        }
    }
}

pub(crate) struct PoolInner {
    name: String,
    min_workers: usize,
    max_workers: usize,
    idle_decay: Duration,
    queue: FunctionQueue,
    errors: Option<ErrorQueue>,
    live: AtomicUsize,
    busy: AtomicUsize,
    idle: AtomicUsize,
    closed: AtomicBool,
    facade: Weak<WeftInner>,
}

/// A named thread pool. Handles are cheap to clone.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Opens a pool and eagerly spawns its minimum workers.
    ///
    /// The configuration must already be validated.
    pub(crate) fn open(config: PoolConfig, facade: Weak<WeftInner>) -> Self {
        let inner = Arc::new(PoolInner {
            name: config.name,
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            idle_decay: config.idle_decay,
            queue: config.function_queue,
            errors: config.error_queue,
            live: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            facade,
        });

        let hook_target = Arc::downgrade(&inner);
        inner.queue.set_hook(Box::new(move || {
            if let Some(inner) = hook_target.upgrade() {
                maybe_spawn_worker(&inner);
            }
        }));

        for _ in 0..inner.min_workers {
            spawn_worker(&inner);
        }

        Self { inner }
    }

    /// Returns the pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the number of live workers.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.inner.live.load(Ordering::Relaxed)
    }

    /// Returns the number of workers currently executing a function.
    #[must_use]
    pub fn busy_workers(&self) -> usize {
        self.inner.busy.load(Ordering::Relaxed)
    }

    /// Returns true once the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes the pool.
    ///
    /// Unregisters the name from the facade, detaches from the function
    /// queue, and wakes idle workers so they retire. Functions already
    /// executing run to completion. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(pool = %self.inner.name, "closing pool");
        self.inner.queue.clear_hook();
        self.inner.queue.notify_all();
        if let Some(facade) = self.inner.facade.upgrade() {
            Weft::from_inner(facade).remove_pool(&self.inner.name);
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("min_workers", &self.inner.min_workers)
            .field("max_workers", &self.inner.max_workers)
            .field("live", &self.live_workers())
            .field("busy", &self.busy_workers())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Counter decrement that survives worker panics.
struct CountGuard<'a>(&'a AtomicUsize);

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

fn spawn_worker(inner: &Arc<PoolInner>) {
    let Some(facade) = inner.facade.upgrade().map(Weft::from_inner) else {
        return;
    };
    inner.live.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(pool = %inner.name, live = inner.live.load(Ordering::Relaxed), "spawning pool worker");
    let worker = Arc::clone(inner);
    facade.spawn(move || {
        let _live = CountGuard(&worker.live);
        worker_loop(&worker);
    });
}

/// Spawn a new worker when work is pending and no live worker is parked
/// waiting for it.
fn maybe_spawn_worker(inner: &Arc<PoolInner>) {
    if inner.closed.load(Ordering::Acquire) {
        return;
    }
    let live = inner.live.load(Ordering::Relaxed);
    let idle = inner.idle.load(Ordering::Relaxed);
    if live < inner.max_workers && idle == 0 && !inner.queue.is_empty() {
        spawn_worker(inner);
    }
}

fn worker_loop(inner: &Arc<PoolInner>) {
    loop {
        if inner.closed.load(Ordering::Acquire) {
            return;
        }
        inner.idle.fetch_add(1, Ordering::Relaxed);
        let thunk = inner
            .queue
            .dequeue_timeout(inner.idle_decay, || inner.closed.load(Ordering::Acquire));
        inner.idle.fetch_sub(1, Ordering::Relaxed);
        match thunk {
            Some(thunk) => {
                // More work is queued behind the item just taken; the
                // enqueue-side check may have counted this worker as
                // available, so re-check from here.
                if !inner.queue.is_empty() {
                    maybe_spawn_worker(inner);
                }
                inner.busy.fetch_add(1, Ordering::Relaxed);
                let _busy = CountGuard(&inner.busy);
                let outcome = catch_unwind(AssertUnwindSafe(thunk));
                let result = outcome
                    .unwrap_or_else(|payload| Err(worker_panic_message(payload.as_ref()).into()));
                if let Err(error) = result {
                    match &inner.errors {
                        Some(queue) => queue.push(ErrorReport::new(current_task(), error)),
                        None => {
                            tracing::debug!(pool = %inner.name, %error, "pool function error dropped, no error queue");
                        }
                    }
                }
            }
            None => {
                if inner.closed.load(Ordering::Acquire) {
                    return;
                }
                // A function may have been enqueued in the instant between
                // the timed-out dequeue and this point; take it instead of
                // retiring and stranding it.
                if !inner.queue.is_empty() {
                    continue;
                }
                if inner.live.load(Ordering::Relaxed) > inner.min_workers {
                    tracing::debug!(pool = %inner.name, "retiring idle pool worker");
                    return;
                }
            }
        }
    }
}

fn worker_panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("pool function panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("pool function panicked: {message}")
    } else {
        "pool function panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, min: usize, max: usize) -> PoolConfig {
        PoolConfig::new(
            name,
            min,
            max,
            Duration::from_millis(50),
            FunctionQueue::new(16),
        )
    }

    #[test]
    fn validate_rejects_empty_name() {
        let err = config("", 1, 2).validate().expect_err("empty name");
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }

    #[test]
    fn validate_rejects_max_below_min() {
        let err = config("p", 3, 2).validate().expect_err("max < min");
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }

    #[test]
    fn validate_rejects_zero_zero() {
        let err = config("p", 0, 0).validate().expect_err("(0, 0)");
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }

    #[test]
    fn validate_accepts_fixed_size() {
        config("p", 2, 2).validate().expect("fixed-size pool");
        config("p", 0, 4).validate().expect("on-demand pool");
    }

    #[test]
    fn pool_error_converts_to_crate_error() {
        let err: Error = PoolError::InvalidConfig("reason").into();
        assert_eq!(err.kind(), ErrorKind::InvalidPoolConfig);
    }
}
