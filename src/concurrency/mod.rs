//! Concurrency control.
//!
//! - [`LockManager`] - Per-page read/write locks with upgrade rules
//! - [`Transaction`] - RAII handle that commits or aborts through the pool

mod lock_manager;
mod transaction;

pub use lock_manager::{Acquire, LockManager, LockMode, Permissions};
pub use transaction::Transaction;
