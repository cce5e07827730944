//! Synchronization primitives keyed by task identity.
//!
//! Unlike the standard library's locks, the primitive here recognizes the
//! *task* that acquired it, which makes re-entrant acquisition and
//! reader-to-writer upgrades expressible.
//!
//! # Primitives
//!
//! - [`ReentrantRwLock`]: counted re-entrant reader/writer lock with FIFO
//!   waiters, writer preference, and single-upgrader upgrades

mod rwlock;

pub use rwlock::ReentrantRwLock;
