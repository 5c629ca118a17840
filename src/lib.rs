//! pagedb - a transactional page manager with a B+-tree access method.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            pagedb                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Transaction Layer (concurrency/)              │   │
//! │  │       Transaction handle + page-level LockManager       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Access Method (index/btree/)               │   │
//! │  │   BTreeFile: find leaf, split, steal/merge, free list   │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                 Buffer Pool (buffer/)                   │   │
//! │  │   BufferPoolManager: lock, cache, LRU NO-STEAL evict,   │   │
//! │  │   commit (log + flush) / abort (reread from disk)       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │       Storage Layer (storage/) + Log Hook (recovery/)   │   │
//! │  │   DiskManager + page formats + tuples | LogSink, WAL    │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, TransactionId, Error, config)
//! - [`concurrency`] - Page locks and the transaction handle
//! - [`buffer`] - The buffer pool and its LRU replacer
//! - [`index`] - The B+-tree access method
//! - [`storage`] - Disk I/O, page formats, and tuples
//! - [`recovery`] - The write-ahead log hook
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use pagedb::{BTreeFile, BufferPoolManager, Transaction};
//! use pagedb::common::config::BufferPoolConfig;
//! use pagedb::storage::{Field, FieldType, Tuple, TupleDesc};
//!
//! let desc = TupleDesc::new(vec![FieldType::Int, FieldType::Str]);
//! let table = Arc::new(BTreeFile::open("people.db", 0, desc).unwrap());
//! let pool = BufferPoolManager::new(BufferPoolConfig::default()).unwrap();
//! pool.register(table.clone());
//!
//! Transaction::run(&pool, |txn| {
//!     let row = Tuple::new(vec![Field::Int(1), Field::Str("ada".into())]);
//!     pool.insert_tuple(txn.id(), table.id(), row)
//! })
//! .unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod index;
pub mod recovery;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::DEFAULT_PAGE_SIZE;
pub use common::{Error, PageCategory, PageId, Result, TransactionId};

pub use buffer::{BufferPoolManager, BufferPoolStats, StatsSnapshot};
pub use concurrency::{LockManager, LockMode, Permissions, Transaction};
pub use index::{BTreeFile, IndexPredicate};
pub use recovery::{FileLog, LogSink, NoopLog};
pub use storage::{DbFile, Field, FieldType, Op, Tuple, TupleDesc};
