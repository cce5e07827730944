//! Re-entrant reader/writer lock keyed by task identity.
//!
//! This lock allows multiple readers or a single writer, with recursion
//! counted per task: a task may acquire either mode any number of times and
//! must pair every acquisition with a release. Because holders are known by
//! [`TaskId`], the lock supports patterns a plain `RwLock` cannot:
//!
//! - A write holder takes further writes *and* reads without blocking
//!   (reads taken under a write are write-covered).
//! - A task holding only reads may request a write: an **upgrade**. The
//!   upgrade waits until every other reader has released, preserving the
//!   task's read recursion across the transition.
//!
//! # Fairness
//!
//! | Scenario                  | Behavior                                     |
//! |---------------------------|----------------------------------------------|
//! | No writer active/waiting  | Readers acquire immediately                  |
//! | Writer waiting            | New readers queue behind it (writer preference) |
//! | Queue head is readers     | The whole head reader batch wakes together   |
//! | Upgrade pending           | All queue grants pause until the upgrade completes |
//! | Second concurrent upgrade | Fails immediately with `UpgradeConflict`     |
//!
//! Waiters are otherwise served strictly FIFO. A pending upgrader is granted
//! ahead of queued writers: it already holds a read, so any other order
//! deadlocks.
//!
//! # Errors
//!
//! All four operations require a managed task (`NotManagedTask` otherwise).
//! Releasing a mode the caller does not hold is `UnlockWithoutLock`.

use crate::error::{Error, ErrorKind, Result};
use crate::task::{require_current, TaskId};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitMode {
    Read,
    Write,
}

struct Waiter {
    task: TaskId,
    mode: WaitMode,
    granted: AtomicBool,
}

#[derive(Debug, Clone, Copy)]
struct WriteHold {
    owner: TaskId,
    count: u32,
}

#[derive(Default)]
struct LockState {
    writer: Option<WriteHold>,
    readers: HashMap<TaskId, u32>,
    upgrader: Option<TaskId>,
    waiters: VecDeque<Arc<Waiter>>,
}

impl LockState {
    /// Grants whatever the waiter queue head is eligible for.
    ///
    /// Called after every release. While an upgrade is pending the queue
    /// stays frozen; the upgrader completes its own transition in its wait
    /// loop once the other readers have drained.
    fn grant_pending(&mut self) {
        if self.writer.is_some() || self.upgrader.is_some() {
            return;
        }
        while let Some(head) = self.waiters.front() {
            match head.mode {
                WaitMode::Read => {
                    let Some(waiter) = self.waiters.pop_front() else {
                        break;
                    };
                    *self.readers.entry(waiter.task).or_insert(0) += 1;
                    waiter.granted.store(true, Ordering::Release);
                }
                WaitMode::Write => {
                    if !self.readers.is_empty() {
                        break;
                    }
                    let Some(waiter) = self.waiters.pop_front() else {
                        break;
                    };
                    self.writer = Some(WriteHold {
                        owner: waiter.task,
                        count: 1,
                    });
                    waiter.granted.store(true, Ordering::Release);
                    break;
                }
            }
        }
    }

    fn holds_write(&self, task: TaskId) -> bool {
        self.writer.is_some_and(|hold| hold.owner == task)
    }
}

struct LockCore {
    state: Mutex<LockState>,
    cond: Condvar,
}

/// A counted re-entrant reader/writer lock keyed by task identity.
///
/// The lock guards no data of its own; it coordinates access to resources
/// the caller manages. Handles are cheap to clone and share one underlying
/// lock.
#[derive(Clone)]
pub struct ReentrantRwLock {
    core: Arc<LockCore>,
}

impl Default for ReentrantRwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReentrantRwLock {
    /// Creates a new unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(LockCore {
                state: Mutex::new(LockState::default()),
                cond: Condvar::new(),
            }),
        }
    }

    /// Acquires a read lock for the calling task, waiting if necessary.
    ///
    /// Re-entrant: a task already reading (or writing) never blocks here.
    pub fn read_lock(&self) -> Result<()> {
        let task = require_current()?;
        let mut state = self.core.state.lock().expect("lock state poisoned");

        if state.holds_write(task) {
            // Write-covered read: exclusivity already held.
            *state.readers.entry(task).or_insert(0) += 1;
            return Ok(());
        }
        if let Some(count) = state.readers.get_mut(&task) {
            *count += 1;
            return Ok(());
        }
        if state.writer.is_none() && state.upgrader.is_none() && state.waiters.is_empty() {
            state.readers.insert(task, 1);
            return Ok(());
        }

        let waiter = Arc::new(Waiter {
            task,
            mode: WaitMode::Read,
            granted: AtomicBool::new(false),
        });
        state.waiters.push_back(Arc::clone(&waiter));
        while !waiter.granted.load(Ordering::Acquire) {
            state = self.core.cond.wait(state).expect("lock state poisoned");
        }
        Ok(())
    }

    /// Releases one read acquisition by the calling task.
    pub fn read_unlock(&self) -> Result<()> {
        let task = require_current()?;
        let mut state = self.core.state.lock().expect("lock state poisoned");

        let Some(count) = state.readers.get_mut(&task) else {
            return Err(Error::new(ErrorKind::UnlockWithoutLock)
                .with_context(format!("{task} released a read it does not hold")));
        };
        *count -= 1;
        if *count == 0 {
            state.readers.remove(&task);
            if !state.holds_write(task) {
                state.grant_pending();
                self.core.cond.notify_all();
            }
        }
        Ok(())
    }

    /// Acquires the write lock for the calling task, waiting if necessary.
    ///
    /// A task already writing re-enters without blocking. A task holding
    /// only reads upgrades: it waits for every other reader to release,
    /// keeping its read recursion. At most one upgrade may be pending;
    /// a concurrent second upgrade fails with `UpgradeConflict`.
    pub fn write_lock(&self) -> Result<()> {
        let task = require_current()?;
        let mut state = self.core.state.lock().expect("lock state poisoned");

        if let Some(hold) = state.writer.as_mut() {
            if hold.owner == task {
                hold.count += 1;
                return Ok(());
            }
        }

        if state.readers.contains_key(&task) {
            if state.upgrader.is_some() {
                tracing::debug!(%task, "upgrade refused, another upgrade pending");
                return Err(Error::new(ErrorKind::UpgradeConflict)
                    .with_context(format!("{task} requested an upgrade")));
            }
            state.upgrader = Some(task);
            loop {
                if state.writer.is_none() && state.readers.len() == 1 {
                    state.writer = Some(WriteHold {
                        owner: task,
                        count: 1,
                    });
                    state.upgrader = None;
                    return Ok(());
                }
                state = self.core.cond.wait(state).expect("lock state poisoned");
            }
        }

        if state.writer.is_none()
            && state.upgrader.is_none()
            && state.readers.is_empty()
            && state.waiters.is_empty()
        {
            state.writer = Some(WriteHold {
                owner: task,
                count: 1,
            });
            return Ok(());
        }

        let waiter = Arc::new(Waiter {
            task,
            mode: WaitMode::Write,
            granted: AtomicBool::new(false),
        });
        state.waiters.push_back(Arc::clone(&waiter));
        while !waiter.granted.load(Ordering::Acquire) {
            state = self.core.cond.wait(state).expect("lock state poisoned");
        }
        Ok(())
    }

    /// Releases one write acquisition by the calling task.
    pub fn write_unlock(&self) -> Result<()> {
        let task = require_current()?;
        let mut state = self.core.state.lock().expect("lock state poisoned");

        match state.writer.as_mut() {
            Some(hold) if hold.owner == task => {
                hold.count -= 1;
                if hold.count == 0 {
                    state.writer = None;
                    state.grant_pending();
                    self.core.cond.notify_all();
                }
                Ok(())
            }
            _ => Err(Error::new(ErrorKind::UnlockWithoutLock)
                .with_context(format!("{task} released a write it does not hold"))),
        }
    }

    #[cfg(test)]
    fn debug_state(&self) -> (Option<TaskId>, usize, Option<TaskId>, usize) {
        let state = self.core.state.lock().expect("lock state poisoned");
        (
            state.writer.map(|hold| hold.owner),
            state.readers.len(),
            state.upgrader,
            state.waiters.len(),
        )
    }
}

impl fmt::Debug for ReentrantRwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock().expect("lock state poisoned");
        f.debug_struct("ReentrantRwLock")
            .field("writer", &state.writer)
            .field("readers", &state.readers.len())
            .field("upgrader", &state.upgrader)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
