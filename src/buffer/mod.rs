//! Buffer pool management.
//!
//! The buffer pool is the transactional page cache between access methods
//! and disk. Every page access goes through it and is covered by a page lock.
//!
//! # Components
//! - [`BufferPoolManager`] - The page cache, lock owner, and commit/abort driver
//! - [`Frame`], [`FrameId`] - A slot in the buffer pool and its index
//! - [`BufferPoolStats`] - Performance statistics
//! - [`replacer`] - Eviction policy implementations

mod buffer_pool_manager;
mod frame;
pub mod replacer;
mod stats;

pub use buffer_pool_manager::BufferPoolManager;
pub use frame::{Frame, FrameId};
pub use stats::{BufferPoolStats, StatsSnapshot};
