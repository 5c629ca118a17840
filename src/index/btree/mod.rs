//! B+-tree access method.
//!
//! A table is one file laid out as a root-pointer page followed by leaf,
//! internal, and header pages. Tuples live in the leaves, sorted by the key
//! field; leaves form a doubly linked list for scans.
//!
//! # Structure
//! ```text
//!                  ┌──────────┐
//!                  │ root ptr │──── header chain (free-page bitmaps)
//!                  └────┬─────┘
//!                       ▼
//!                 ┌───────────┐
//!                 │ internal  │  k1 | k2
//!                 └─┬───┬───┬─┘
//!          ┌────────┘   │   └────────┐
//!          ▼            ▼            ▼
//!      ┌──────┐ ◀──▶ ┌──────┐ ◀──▶ ┌──────┐
//!      │ leaf │      │ leaf │      │ leaf │
//!      └──────┘      └──────┘      └──────┘
//! ```
//!
//! # Modules
//! - `file` - [`BTreeFile`]: opening, disk I/O, the [`DbFile`](crate::storage::DbFile) impl
//! - `op` - Per-operation context and root-to-leaf descent
//! - `split` - Leaf and internal splits on insert
//! - `rebalance` - Steal and merge on delete
//! - `free_list` - Page allocation through the header-page chain
//! - `iterator` - Full and predicate scans
//! - `integrity` - Structural self-check

mod file;
mod free_list;
mod integrity;
mod iterator;
mod op;
mod rebalance;
mod split;

pub use file::BTreeFile;
pub use iterator::{BTreeScan, IndexPredicate};
