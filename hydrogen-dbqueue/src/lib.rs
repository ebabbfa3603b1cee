//! # hydrogen-dbqueue
//!
//! Multi-queue, multi-engine query dispatch for Hydrogen.
//! Each database gets a family of named queues (Lead plus slow/medium/fast/
//! cache workers); each queue is one thread owning one connection. Identical
//! concurrent submissions deduplicate by query signature, typed parameters
//! convert from named to positional placeholders per engine dialect, and
//! each connection carries a bounded LRU cache of prepared statements.

pub mod connstring;
pub mod engines;
pub mod manager;
pub mod pending;
pub mod prepared;
pub mod stats;
pub mod templates;

mod family;
mod lead;
mod queue;

pub use manager::QueueManager;
pub use pending::{PendingTicket, Registration};

/// Lock a mutex, recovering the guard if a worker panicked while holding it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
