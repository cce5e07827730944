//! Bounded function and error queues.
//!
//! Both queues are fixed-capacity FIFO structures over
//! [`crossbeam_queue::ArrayQueue`]. The [`FunctionQueue`] feeds thread
//! pools: `enqueue` rejects with `QueueFull`, `dequeue` with `QueueEmpty`,
//! and each successful enqueue wakes a parked pool worker. The
//! [`ErrorQueue`] collects asynchronous failures as [`ErrorReport`]s and
//! silently drops new entries when full — size it generously or drain it
//! promptly.

use crate::error::{BoxError, Error, ErrorKind, Result};
use crate::task::TaskId;
use crossbeam_queue::ArrayQueue;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A queued unit of pool work.
pub type Thunk = Box<dyn FnOnce() -> std::result::Result<(), BoxError> + Send + 'static>;

type EnqueueHook = Box<dyn Fn() + Send + Sync>;

struct FunctionQueueInner {
    queue: ArrayQueue<Thunk>,
    lock: Mutex<()>,
    available: Condvar,
    hook: Mutex<Option<EnqueueHook>>,
}

/// A bounded FIFO of functions awaiting execution.
///
/// Handles are cheap to clone and share one underlying queue.
#[derive(Clone)]
pub struct FunctionQueue {
    inner: Arc<FunctionQueueInner>,
}

impl FunctionQueue {
    /// Creates a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "function queue capacity must be at least 1");
        Self {
            inner: Arc::new(FunctionQueueInner {
                queue: ArrayQueue::new(capacity),
                lock: Mutex::new(()),
                available: Condvar::new(),
                hook: Mutex::new(None),
            }),
        }
    }

    /// Enqueues a function.
    ///
    /// Returns `QueueFull` when at capacity; the function is dropped in
    /// that case.
    pub fn enqueue<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static,
    {
        let thunk: Thunk = Box::new(f);
        if self.inner.queue.push(thunk).is_err() {
            return Err(Error::new(ErrorKind::QueueFull)
                .with_context(format!("capacity {}", self.inner.queue.capacity())));
        }
        {
            let _guard = self.inner.lock.lock().expect("function queue poisoned");
            self.inner.available.notify_one();
        }
        let hook = self.inner.hook.lock().expect("function queue hook poisoned");
        if let Some(hook) = hook.as_ref() {
            hook();
        }
        Ok(())
    }

    /// Dequeues the oldest function, or `QueueEmpty`.
    pub fn dequeue(&self) -> Result<Thunk> {
        self.inner
            .queue
            .pop()
            .ok_or_else(|| Error::new(ErrorKind::QueueEmpty))
    }

    /// Dequeues, waiting up to `timeout` for a function to arrive.
    ///
    /// Returns early with `None` when `cancel` reports true after a wakeup.
    pub(crate) fn dequeue_timeout(
        &self,
        timeout: Duration,
        cancel: impl Fn() -> bool,
    ) -> Option<Thunk> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(thunk) = self.inner.queue.pop() {
                return Some(thunk);
            }
            if cancel() {
                return None;
            }
            let guard = self.inner.lock.lock().expect("function queue poisoned");
            // Re-check under the lock: enqueue notifies while holding it,
            // so an element pushed before this point cannot be missed.
            if let Some(thunk) = self.inner.queue.pop() {
                return Some(thunk);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _timeout) = self
                .inner
                .available
                .wait_timeout(guard, remaining)
                .expect("function queue poisoned");
            drop(guard);
        }
    }

    /// Registers the pool scale-up hook fired on every enqueue.
    pub(crate) fn set_hook(&self, hook: EnqueueHook) {
        *self.inner.hook.lock().expect("function queue hook poisoned") = Some(hook);
    }

    /// Removes the scale-up hook.
    pub(crate) fn clear_hook(&self) {
        *self.inner.hook.lock().expect("function queue hook poisoned") = None;
    }

    /// Wakes every parked consumer.
    pub(crate) fn notify_all(&self) {
        let _guard = self.inner.lock.lock().expect("function queue poisoned");
        self.inner.available.notify_all();
    }

    /// Returns the queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.queue.capacity()
    }

    /// Returns the number of queued functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Returns true when no functions are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }
}

impl fmt::Debug for FunctionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

/// An asynchronous failure captured for later draining.
#[derive(Debug)]
pub struct ErrorReport {
    task: Option<TaskId>,
    error: BoxError,
}

impl ErrorReport {
    /// Creates a report attributing `error` to `task`.
    #[must_use]
    pub fn new(task: Option<TaskId>, error: BoxError) -> Self {
        Self { task, error }
    }

    /// Returns the task the failure occurred on, if known.
    #[must_use]
    pub const fn task(&self) -> Option<TaskId> {
        self.task
    }

    /// Returns the captured error.
    #[must_use]
    pub fn error(&self) -> &(dyn std::error::Error + Send + Sync) {
        self.error.as_ref()
    }

    /// Consumes the report, returning the captured error.
    #[must_use]
    pub fn into_error(self) -> BoxError {
        self.error
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.task {
            Some(task) => write!(f, "{task}: {}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

/// A bounded FIFO of [`ErrorReport`]s.
///
/// New reports are **dropped silently** when the queue is full; callers
/// must size generously or drain promptly. Handles are cheap to clone.
#[derive(Clone)]
pub struct ErrorQueue {
    inner: Arc<ArrayQueue<ErrorReport>>,
}

impl ErrorQueue {
    /// Creates a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "error queue capacity must be at least 1");
        Self {
            inner: Arc::new(ArrayQueue::new(capacity)),
        }
    }

    /// Pushes a report, dropping it silently when the queue is full.
    pub fn push(&self, report: ErrorReport) {
        if let Err(dropped) = self.inner.push(report) {
            tracing::trace!(report = %dropped, "error queue full, report dropped");
        }
    }

    /// Pops the oldest report.
    #[must_use]
    pub fn pop(&self) -> Option<ErrorReport> {
        self.inner.pop()
    }

    /// Returns the queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Returns the number of queued reports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true when no reports are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for ErrorQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
