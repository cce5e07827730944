//! Error types and error handling strategy for Weft.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Callback and user-callable failures are routed to error sinks and
//!   never abort the scheduler or the spawner
//! - Internal invariant violations panic

use core::fmt;
use std::sync::Arc;

/// A type-erased error produced by user callables and slot callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Identity ===
    /// The calling thread is not a managed task.
    NotManagedTask,

    // === Locks ===
    /// A lock release had no matching acquisition by the caller.
    UnlockWithoutLock,
    /// A second task requested an upgrade while one was already pending.
    UpgradeConflict,

    // === Locals ===
    /// A local slot with this name is already established.
    SlotAlreadyExists,

    // === Pools ===
    /// A pool with this name is already registered.
    PoolAlreadyExists,
    /// Pool creation parameters are invalid.
    InvalidPoolConfig,

    // === Scheduling ===
    /// A fixed-rate schedule was requested with a zero period.
    InvalidRate,

    // === Bounded queues ===
    /// The queue is at capacity.
    QueueFull,
    /// The queue has no elements.
    QueueEmpty,
}

impl ErrorKind {
    /// Returns a short human-readable description of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotManagedTask => "not a managed task",
            Self::UnlockWithoutLock => "unlock without matching lock",
            Self::UpgradeConflict => "another upgrade is already pending",
            Self::SlotAlreadyExists => "local slot already established",
            Self::PoolAlreadyExists => "pool already exists",
            Self::InvalidPoolConfig => "invalid pool configuration",
            Self::InvalidRate => "invalid fixed-rate period",
            Self::QueueFull => "queue is full",
            Self::QueueEmpty => "queue is empty",
        }
    }
}

/// The main error type for Weft operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates a `NotManagedTask` error.
    #[must_use]
    pub const fn not_managed_task() -> Self {
        Self::new(ErrorKind::NotManagedTask)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// A specialized `Result` type for Weft operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::SlotAlreadyExists).with_context("slot \"db\"");
        assert_eq!(err.to_string(), "local slot already established: slot \"db\"");
    }

    #[test]
    fn kind_is_preserved() {
        let err = Error::new(ErrorKind::QueueFull);
        assert_eq!(err.kind(), ErrorKind::QueueFull);
    }

    #[test]
    fn source_is_chained() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "inner");
        let err = Error::new(ErrorKind::InvalidPoolConfig).with_source(io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
