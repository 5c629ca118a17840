//! Access methods.
//!
//! - [`btree`] - The B+-tree file every table is stored in

pub mod btree;

pub use btree::{BTreeFile, BTreeScan, IndexPredicate};
