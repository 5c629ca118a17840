//! Storage layer - tuples, disk I/O, and page formats.
//!
//! This module handles persistent storage:
//! - [`Tuple`], [`TupleDesc`], [`Field`] - The row model
//! - [`DbFile`] - The access-method interface used by the buffer pool
//! - [`DiskManager`] - Low-level file I/O
//! - [`page`] - Page types and layouts

mod db_file;
mod disk_manager;
pub mod page;
mod tuple;

pub use db_file::DbFile;
pub use disk_manager::DiskManager;
pub use tuple::{Field, FieldType, Op, RecordId, Tuple, TupleDesc};
