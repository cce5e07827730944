//! The root facade: singletons, constructors, and the spawn entry point.
//!
//! [`Weft`] owns the id counter, the pool registry, the local-slot registry,
//! and the lazily started scheduler. Handles are cheap to clone; all clones
//! share one facade. A process-wide instance is available through
//! [`Weft::global`], while tests construct isolated facades with
//! [`Weft::new`] instead of resetting global state.
//!
//! # Spawn contract
//!
//! [`Weft::spawn`] allocates the next [`TaskId`] and returns it
//! synchronously, before the task may have started. The task runs on a
//! freshly spawned named OS thread with the identity register installed;
//! on every exit path — return or panic unwind — the task's local slots are
//! cleaned up before the identity is released.

use crate::config::Config;
use crate::error::{BoxError, Error, ErrorKind, Result};
use crate::local::{LocalCell, LocalOptions, LocalRegistry};
use crate::pool::{Pool, PoolConfig, PoolError};
use crate::queue::{ErrorQueue, FunctionQueue};
use crate::sync::ReentrantRwLock;
use crate::task::{require_current, IdentityGuard, TaskId};
use crate::timer::{self, TimerCore, TimerHandle};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

static GLOBAL: OnceLock<Weft> = OnceLock::new();

pub(crate) struct WeftInner {
    config: Config,
    last_tid: AtomicU64,
    pools: Mutex<HashMap<String, Pool>>,
    locals: Arc<LocalRegistry>,
    timer: Mutex<Option<Arc<TimerCore>>>,
}

impl Drop for WeftInner {
    fn drop(&mut self) {
        if let Ok(slot) = self.timer.get_mut() {
            if let Some(core) = slot.take() {
                core.request_shutdown();
            }
        }
    }
}

/// The root threading facade.
///
/// See the [module documentation](self) for the spawn contract.
#[derive(Clone)]
pub struct Weft {
    inner: Arc<WeftInner>,
}

impl Default for Weft {
    fn default() -> Self {
        Self::new()
    }
}

impl Weft {
    /// Creates an isolated facade with configuration from the environment.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::from_env())
    }

    /// Creates an isolated facade with the given configuration.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            inner: Arc::new(WeftInner {
                config,
                last_tid: AtomicU64::new(TaskId::TIMER.as_u64()),
                pools: Mutex::new(HashMap::new()),
                locals: Arc::new(LocalRegistry::new()),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Returns the process-wide facade, creating it on first use.
    #[must_use]
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::new)
    }

    pub(crate) fn from_inner(inner: Arc<WeftInner>) -> Self {
        Self { inner }
    }

    /// Spawns a managed task and returns its id synchronously.
    ///
    /// The id is allocated before the task starts; the returned value never
    /// races with the task observing its own identity.
    pub fn spawn<F>(&self, f: F) -> TaskId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = TaskId::from_raw(self.inner.last_tid.fetch_add(1, Ordering::Relaxed) + 1);
        self.spawn_with_id(id, f);
        id
    }

    /// Spawns the wrapped callable on a new thread under a fixed identity.
    pub(crate) fn spawn_with_id<F>(&self, id: TaskId, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let locals = Arc::clone(&self.inner.locals);
        let name = format!("{}-task-{}", self.inner.config.thread_name_prefix, id.as_u64());
        let mut builder = thread::Builder::new().name(name);
        if let Some(bytes) = self.inner.config.thread_stack_size {
            builder = builder.stack_size(bytes);
        }
        tracing::trace!(task = %id, "spawning managed task");
        // Managed tasks are detached; completion is observed through locks,
        // locals, and queues rather than join handles.
        let _detached = builder
            .spawn(move || {
                let _identity = IdentityGuard::install(id);
                // Declared after the identity guard so cleanup runs first,
                // while the identity is still installed.
                let _cleanup = CleanupGuard { locals, id };
                f();
            })
            .expect("failed to spawn managed task thread");
    }

    /// Creates a new identity-keyed re-entrant reader/writer lock.
    #[must_use]
    pub fn new_lock(&self) -> ReentrantRwLock {
        ReentrantRwLock::new()
    }

    /// Creates a bounded function queue with the given capacity.
    #[must_use]
    pub fn new_function_queue(&self, capacity: usize) -> FunctionQueue {
        FunctionQueue::new(capacity)
    }

    /// Creates a bounded error queue with the given capacity.
    #[must_use]
    pub fn new_error_queue(&self, capacity: usize) -> ErrorQueue {
        ErrorQueue::new(capacity)
    }

    /// Registers a named local slot with the given callbacks.
    ///
    /// Fails with `SlotAlreadyExists` when the name is taken.
    pub fn establish_local(&self, name: &str, options: LocalOptions) -> Result<()> {
        self.inner.locals.establish(name, options)
    }

    /// Runs `f` with the calling task's cell in the named slot.
    ///
    /// The slot is created (without callbacks) if it was never established;
    /// the cell is created — and the initializer run — on the task's first
    /// access. Fails with `NotManagedTask` off managed tasks.
    pub fn with_local<R>(&self, name: &str, f: impl FnOnce(&mut LocalCell) -> R) -> Result<R> {
        let task = require_current()?;
        Ok(self.inner.locals.with(name, task, f))
    }

    /// Schedules `f` at a fixed rate.
    ///
    /// The first run fires after `initial_delay`; subsequent runs fire at
    /// multiples of `period` regardless of each run's duration, so runs may
    /// overlap. Fails with `InvalidRate` when `period` is zero. Errors from
    /// `f` go to `error_sink`, or are dropped when it is `None`.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        error_sink: Option<ErrorQueue>,
        f: F,
    ) -> Result<TimerHandle>
    where
        F: Fn() -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        if period.is_zero() {
            return Err(Error::new(ErrorKind::InvalidRate).with_context("period must be non-zero"));
        }
        let core = self.ensure_timer();
        Ok(timer::schedule(
            &core,
            timer::Mode::FixedRate { period },
            initial_delay,
            error_sink,
            Arc::new(f),
        ))
    }

    /// Schedules `f` with a fixed delay between completions.
    ///
    /// The first run fires after `initial_delay`; each subsequent run is
    /// scheduled `delay` after the previous run completes, so runs never
    /// overlap. Errors from `f` go to `error_sink`, or are dropped when it
    /// is `None`.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        initial_delay: Duration,
        delay: Duration,
        error_sink: Option<ErrorQueue>,
        f: F,
    ) -> Result<TimerHandle>
    where
        F: Fn() -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let core = self.ensure_timer();
        Ok(timer::schedule(
            &core,
            timer::Mode::FixedDelay { delay },
            initial_delay,
            error_sink,
            Arc::new(f),
        ))
    }

    /// Schedules `f` to run once after `delay`.
    pub fn schedule_once<F>(
        &self,
        delay: Duration,
        error_sink: Option<ErrorQueue>,
        f: F,
    ) -> Result<TimerHandle>
    where
        F: Fn() -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let core = self.ensure_timer();
        Ok(timer::schedule(
            &core,
            timer::Mode::OneShot,
            delay,
            error_sink,
            Arc::new(f),
        ))
    }

    /// Returns the handle of the timer job the calling task is running, if
    /// the task was dispatched by the scheduler.
    #[must_use]
    pub fn current_timer(&self) -> Option<TimerHandle> {
        self.with_local(timer::TIMER_LOCAL, |cell| cell.get::<TimerHandle>().cloned())
            .ok()
            .flatten()
    }

    /// Atomically creates and registers a named pool.
    ///
    /// A duplicate name returns `PoolError::AlreadyExists` carrying the
    /// registered pool.
    pub fn new_pool(&self, config: PoolConfig) -> std::result::Result<Pool, PoolError> {
        config.validate()?;
        let mut pools = self.inner.pools.lock().expect("pool registry poisoned");
        if let Some(existing) = pools.get(&config.name) {
            return Err(PoolError::AlreadyExists(existing.clone()));
        }
        let pool = Pool::open(config, Arc::downgrade(&self.inner));
        pools.insert(pool.name().to_string(), pool.clone());
        Ok(pool)
    }

    /// Returns the registered pool with the given name, if any.
    #[must_use]
    pub fn get_pool(&self, name: &str) -> Option<Pool> {
        self.inner
            .pools
            .lock()
            .expect("pool registry poisoned")
            .get(name)
            .cloned()
    }

    pub(crate) fn remove_pool(&self, name: &str) {
        self.inner
            .pools
            .lock()
            .expect("pool registry poisoned")
            .remove(name);
    }

    /// Stops the scheduler task.
    ///
    /// Runs already dispatched complete; nothing further is dispatched. A
    /// later schedule call starts a fresh scheduler. Dropping the last
    /// facade handle has the same effect.
    pub fn shutdown(&self) {
        let core = self.inner.timer.lock().expect("timer slot poisoned").take();
        if let Some(core) = core {
            core.request_shutdown();
        }
    }

    /// Starts the scheduler task on first use.
    fn ensure_timer(&self) -> Arc<TimerCore> {
        let mut slot = self.inner.timer.lock().expect("timer slot poisoned");
        if let Some(core) = slot.as_ref() {
            return Arc::clone(core);
        }
        let core = TimerCore::new(Arc::downgrade(&self.inner));
        *slot = Some(Arc::clone(&core));
        drop(slot);

        // Reserved slot through which dispatched jobs expose their handle.
        let _ = self.establish_local(timer::TIMER_LOCAL, LocalOptions::new());
        let loop_core = Arc::clone(&core);
        self.spawn_with_id(TaskId::TIMER, move || timer::timer_loop(&loop_core));
        core
    }
}

impl fmt::Debug for Weft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pools = self
            .inner
            .pools
            .lock()
            .map(|pools| pools.len())
            .unwrap_or(0);
        f.debug_struct("Weft")
            .field("last_tid", &self.inner.last_tid.load(Ordering::Relaxed))
            .field("pools", &pools)
            .finish()
    }
}

/// Runs local-slot cleanup for a task on every exit path.
struct CleanupGuard {
    locals: Arc<LocalRegistry>,
    id: TaskId,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.locals.cleanup(self.id);
    }
}
