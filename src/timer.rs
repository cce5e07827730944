//! The scheduler task and timer handles.
//!
//! One managed task — with the constant identity [`TaskId::TIMER`] — owns a
//! time-ordered job heap. It sleeps until the earliest deadline or a signal
//! (new job, cancellation, fixed-delay completion, shutdown), then drains
//! every due job, dispatching each run onto a freshly spawned managed task
//! so a slow callable never delays the loop.
//!
//! Three schedule shapes exist:
//!
//! - **Fixed rate**: fires at `t0 + initial_delay + k·period` regardless of
//!   how long each run takes; overlapping runs are permitted. When the loop
//!   itself lags, the next fire is advanced so it lands at least one period
//!   in the future.
//! - **Fixed delay**: each run is scheduled `delay` after the previous run
//!   *completes*; the dispatched task re-enqueues the job and wakes the
//!   sleeper.
//! - **One shot**: fires once and is dropped.
//!
//! A permanent sentinel job 24 hours out keeps the heap non-empty; it is
//! re-armed on expiry and never dispatched.
//!
//! Cancellation via [`TimerHandle::cancel`] takes effect no later than the
//! next reschedule point. Callable errors and panics are pushed to the
//! job's error sink, or dropped when none is configured.

use crate::error::BoxError;
use crate::facade::{Weft, WeftInner};
use crate::queue::{ErrorQueue, ErrorReport};
use crate::task::current_task;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

/// Name of the reserved local slot holding the current job's [`TimerHandle`].
pub const TIMER_LOCAL: &str = "weft.timer";

/// Far-future re-arm period for the sentinel job.
const SENTINEL_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

type JobFn = Arc<dyn Fn() -> std::result::Result<(), BoxError> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Mode {
    FixedRate { period: Duration },
    FixedDelay { delay: Duration },
    OneShot,
    Sentinel,
}

pub(crate) struct Job {
    id: u64,
    mode: Mode,
    callable: JobFn,
    sink: Option<ErrorQueue>,
    cancelled: AtomicBool,
    in_flight: AtomicBool,
}

struct JobEntry {
    fire_at: Instant,
    seq: u64,
    job: Arc<Job>,
}

impl PartialEq for JobEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for JobEntry {}

impl Ord for JobEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse ordering for a min-heap (earliest fire time first).
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for JobEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct TimerState {
    heap: BinaryHeap<JobEntry>,
    next_seq: u64,
}

impl TimerState {
    fn push(&mut self, fire_at: Instant, job: Arc<Job>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(JobEntry { fire_at, seq, job });
    }
}

pub(crate) struct TimerCore {
    state: Mutex<TimerState>,
    signal: Condvar,
    shutdown: AtomicBool,
    next_job_id: AtomicU64,
    facade: Weak<WeftInner>,
}

impl TimerCore {
    pub(crate) fn new(facade: Weak<WeftInner>) -> Arc<Self> {
        let core = Arc::new(Self {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            signal: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_job_id: AtomicU64::new(0),
            facade,
        });
        // The sentinel keeps the heap non-empty so the loop always has a
        // deadline to sleep toward.
        let sentinel = Arc::new(Job {
            id: core.next_job_id.fetch_add(1, Ordering::Relaxed),
            mode: Mode::Sentinel,
            callable: Arc::new(|| Ok(())),
            sink: None,
            cancelled: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        });
        core.state
            .lock()
            .expect("timer state poisoned")
            .push(Instant::now() + SENTINEL_PERIOD, sentinel);
        core
    }

    fn notify(&self) {
        let _guard = self.state.lock().expect("timer state poisoned");
        self.signal.notify_all();
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify();
    }
}

/// Registers a job with the scheduler and returns its handle.
pub(crate) fn schedule(
    core: &Arc<TimerCore>,
    mode: Mode,
    initial_delay: Duration,
    sink: Option<ErrorQueue>,
    callable: JobFn,
) -> TimerHandle {
    let job = Arc::new(Job {
        id: core.next_job_id.fetch_add(1, Ordering::Relaxed),
        mode,
        callable,
        sink,
        cancelled: AtomicBool::new(false),
        in_flight: AtomicBool::new(false),
    });
    {
        let mut state = core.state.lock().expect("timer state poisoned");
        state.push(Instant::now() + initial_delay, Arc::clone(&job));
    }
    core.notify();
    TimerHandle {
        job,
        core: Arc::clone(core),
    }
}

/// The scheduler loop. Runs as the managed task with identity
/// [`TaskId::TIMER`](crate::TaskId::TIMER).
pub(crate) fn timer_loop(core: &Arc<TimerCore>) {
    tracing::debug!("scheduler task started");
    loop {
        if core.shutdown.load(Ordering::Acquire) {
            break;
        }
        let mut due = Vec::new();
        let mut state = core.state.lock().expect("timer state poisoned");
        let now = Instant::now();
        while let Some(head) = state.heap.peek() {
            if head.fire_at > now {
                break;
            }
            let Some(entry) = state.heap.pop() else {
                break;
            };
            let job = entry.job;
            if job.cancelled.load(Ordering::Acquire) {
                continue;
            }
            match job.mode {
                Mode::Sentinel => {
                    state.push(now + SENTINEL_PERIOD, job);
                }
                Mode::FixedRate { period } => {
                    let mut next = entry.fire_at + period;
                    if next <= now {
                        // Catching up from loop lag: land at least one
                        // period in the future rather than firing a burst.
                        while next < now + period {
                            next += period;
                        }
                    }
                    state.push(next, Arc::clone(&job));
                    due.push(job);
                }
                Mode::FixedDelay { .. } | Mode::OneShot => due.push(job),
            }
        }
        if !due.is_empty() {
            drop(state);
            for job in due {
                dispatch(core, job);
            }
            continue;
        }
        let target = state.heap.peek().map(|entry| entry.fire_at);
        let wait_for = match target {
            Some(target) => target.saturating_duration_since(Instant::now()),
            None => SENTINEL_PERIOD,
        };
        if !wait_for.is_zero() {
            let (guard, _timeout) = core
                .signal
                .wait_timeout(state, wait_for)
                .expect("timer state poisoned");
            drop(guard);
        }
    }
    tracing::debug!("scheduler task stopped");
}

/// Spawns one run of a due job on a fresh managed task.
fn dispatch(core: &Arc<TimerCore>, job: Arc<Job>) {
    let Some(inner) = core.facade.upgrade() else {
        return;
    };
    let facade = Weft::from_inner(inner);
    let handle = TimerHandle {
        job: Arc::clone(&job),
        core: Arc::clone(core),
    };
    let runner = facade.clone();
    let loop_core = Arc::clone(core);
    let task = facade.spawn(move || {
        job.in_flight.store(true, Ordering::Release);
        let _ = runner.with_local(TIMER_LOCAL, |cell| cell.set(handle));
        let outcome = catch_unwind(AssertUnwindSafe(|| (job.callable)()));
        job.in_flight.store(false, Ordering::Release);
        let result = outcome.unwrap_or_else(|payload| Err(panic_message(payload.as_ref()).into()));
        if let Err(error) = result {
            match &job.sink {
                Some(sink) => sink.push(ErrorReport::new(current_task(), error)),
                None => {
                    tracing::debug!(job = job.id, %error, "timer job error dropped, no sink configured");
                }
            }
        }
        if let Mode::FixedDelay { delay } = job.mode {
            if !job.cancelled.load(Ordering::Acquire) {
                {
                    let mut state = loop_core.state.lock().expect("timer state poisoned");
                    state.push(Instant::now() + delay, Arc::clone(&job));
                }
                loop_core.notify();
            }
        }
    });
    tracing::trace!(task = %task, "dispatched timer job");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("timer job panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("timer job panicked: {message}")
    } else {
        "timer job panicked".to_string()
    }
}

/// Handle to a scheduled job.
///
/// Cloneable; all clones control the same job. Inside a dispatched run the
/// handle is also available through
/// [`Weft::current_timer`](crate::Weft::current_timer).
#[derive(Clone)]
pub struct TimerHandle {
    job: Arc<Job>,
    core: Arc<TimerCore>,
}

impl TimerHandle {
    /// Cancels the job.
    ///
    /// Takes effect no later than the next reschedule point; a run already
    /// in flight completes.
    pub fn cancel(&self) {
        self.job.cancelled.store(true, Ordering::Release);
        self.core.notify();
    }

    /// Returns true once the job has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.job.cancelled.load(Ordering::Acquire)
    }

    /// Returns true while a run of this job is executing.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.job.in_flight.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("job", &self.job.id)
            .field("cancelled", &self.is_cancelled())
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}
