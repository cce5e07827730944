//! Task identities and the current-task register.
//!
//! Every task spawned through the facade carries a [`TaskId`]. The id is
//! installed into a native per-task register (thread-local storage) for the
//! task's dynamic extent, so [`current_task`] can recover it from arbitrarily
//! deep call stacks — including library code that knows nothing about the
//! facade — without any explicit argument passing.

use crate::error::{Error, Result};
use core::fmt;
use std::cell::Cell;

/// A unique identifier for a managed task.
///
/// Ids are unsigned 64-bit values, strictly monotonic for the lifetime of
/// the issuing facade, and never reused. Ids 0–8 are reserved;
/// [`TaskId::TIMER`] (9) belongs to the scheduler task; user-visible ids
/// start at [`TaskId::FIRST_USER`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// The constant identity of the scheduler task.
    pub const TIMER: Self = Self(9);

    /// The first id handed out to user tasks.
    pub const FIRST_USER: u64 = 10;

    /// Creates a task id from a raw value (internal use).
    #[must_use]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for ids in the reserved range (0–9).
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::FIRST_USER
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

thread_local! {
    static CURRENT_TASK: Cell<Option<TaskId>> = const { Cell::new(None) };
}

/// Returns the identity of the calling managed task.
///
/// Returns `None` when invoked from any thread that was not spawned through
/// a [`Weft`](crate::Weft) facade. Never fails and never blocks.
#[must_use]
pub fn current_task() -> Option<TaskId> {
    CURRENT_TASK.with(Cell::get)
}

/// Returns the current task id or a `NotManagedTask` error.
pub(crate) fn require_current() -> Result<TaskId> {
    current_task().ok_or_else(Error::not_managed_task)
}

/// RAII installation of a task identity into the per-task register.
///
/// The previous register value is restored on drop, on every exit path
/// including panic unwind.
pub(crate) struct IdentityGuard {
    previous: Option<TaskId>,
}

impl IdentityGuard {
    /// Installs `id` as the calling thread's identity.
    pub(crate) fn install(id: TaskId) -> Self {
        let previous = CURRENT_TASK.with(|register| register.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        CURRENT_TASK.with(|register| register.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmanaged_thread_has_no_identity() {
        assert_eq!(current_task(), None);
        assert!(require_current().is_err());
    }

    #[test]
    fn guard_installs_and_restores() {
        let id = TaskId::from_raw(42);
        {
            let _guard = IdentityGuard::install(id);
            assert_eq!(current_task(), Some(id));
        }
        assert_eq!(current_task(), None);
    }

    #[test]
    fn nested_guards_restore_outer_identity() {
        let outer = TaskId::from_raw(10);
        let inner = TaskId::from_raw(11);
        let _outer_guard = IdentityGuard::install(outer);
        {
            let _inner_guard = IdentityGuard::install(inner);
            assert_eq!(current_task(), Some(inner));
        }
        assert_eq!(current_task(), Some(outer));
    }

    #[test]
    fn identity_survives_panic_unwind() {
        let result = std::panic::catch_unwind(|| {
            let _guard = IdentityGuard::install(TaskId::from_raw(77));
            panic!("unwind through the guard");
        });
        assert!(result.is_err());
        assert_eq!(current_task(), None);
    }

    #[test]
    fn reserved_range() {
        assert!(TaskId::TIMER.is_reserved());
        assert_eq!(TaskId::TIMER.as_u64(), 9);
        assert!(!TaskId::from_raw(TaskId::FIRST_USER).is_reserved());
    }

    #[test]
    fn display_forms() {
        let id = TaskId::from_raw(15);
        assert_eq!(format!("{id}"), "T15");
        assert_eq!(format!("{id:?}"), "TaskId(15)");
    }
}
