//! Eviction policy implementations (replacers).
//!
//! Currently implements:
//! - [`LruReplacer`] - Least Recently Used, with the pool choosing among
//!   candidates in recency order so dirty frames can be skipped

mod lru;

pub use lru::LruReplacer;
