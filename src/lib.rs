//! Weft: a task-identity threading toolkit.
//!
//! # Overview
//!
//! Weft augments plain OS threads with the coordination facilities that
//! long-lived library code needs but the standard library does not provide:
//!
//! - **Stable task identities**: every task spawned through the [`Weft`]
//!   facade carries a monotonically increasing [`TaskId`], discoverable from
//!   any stack depth via [`current_task`] without threading it through
//!   function arguments.
//! - **Re-entrant reader/writer locks**: [`ReentrantRwLock`] keys recursion
//!   by task identity, so a task may re-acquire a lock it already holds,
//!   and a reader may upgrade to a writer.
//! - **Task-local storage**: named slots with optional initializer and
//!   destroyer hooks, cleaned up exactly once when the owning task exits.
//! - **Schedulers**: fixed-rate, fixed-delay, and one-shot timers running on
//!   a single managed scheduler task, plus thread pools that scale between
//!   configured bounds and retire idle workers.
//!
//! # Core Guarantees
//!
//! - Task ids are strictly monotonic and never reused; ids 0–8 are reserved
//!   and [`TaskId::TIMER`] (9) belongs to the scheduler task.
//! - Lock waiters are served FIFO subject to mode compatibility: head reader
//!   batches wake together, a queued writer blocks readers arriving behind
//!   it, and at most one upgrader may be pending at a time.
//! - A task's local destroyers run exactly once, on every exit path
//!   including panic unwind, before the task's identity is released.
//! - The scheduler never blocks on user callables: each run is dispatched
//!   onto a freshly spawned managed task.
//!
//! # Module Structure
//!
//! - [`error`]: the crate-wide error type and kinds
//! - [`config`]: facade configuration with environment overrides
//! - [`task`]: task identities and the current-task register
//! - [`sync`]: the re-entrant reader/writer lock
//! - [`local`]: task-local storage slots
//! - [`queue`]: bounded function and error queues
//! - [`timer`]: the scheduler task and timer handles
//! - [`pool`]: thread pools with idle decay
//! - [`facade`]: the root facade owning the singletons
//!
//! # Example
//!
//! ```
//! use weft::Weft;
//!
//! let weft = Weft::new();
//! let lock = weft.new_lock();
//!
//! let held = lock.clone();
//! weft.spawn(move || {
//!     held.write_lock().expect("managed task");
//!     held.write_lock().expect("re-entrant");
//!     held.write_unlock().expect("paired");
//!     held.write_unlock().expect("paired");
//! });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod facade;
pub mod local;
pub mod pool;
pub mod queue;
pub mod sync;
pub mod task;
pub mod test_utils;
pub mod timer;

pub use config::{Config, ConfigBuilder};
pub use error::{BoxError, Error, ErrorKind, Result};
pub use facade::Weft;
pub use local::{LocalCell, LocalOptions};
pub use pool::{Pool, PoolConfig, PoolError};
pub use queue::{ErrorQueue, ErrorReport, FunctionQueue, Thunk};
pub use sync::ReentrantRwLock;
pub use task::{current_task, TaskId};
pub use timer::TimerHandle;
