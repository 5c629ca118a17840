//! Common types and utilities shared across pagedb.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and pool settings
//! - Error types
//! - Identifiers (PageId, TransactionId)

pub mod config;
pub mod error;
mod page_id;
mod transaction_id;

pub use error::{Error, Result};
pub use page_id::{PageCategory, PageId};
pub use transaction_id::TransactionId;
