//! Write-ahead log hook.
//!
//! The buffer pool reports transaction boundaries and page before/after
//! images to a [`LogSink`] and forces it before writing pages at commit.
//! What the sink does with them (replay, undo) is outside the pool.

mod log;

pub use log::{FileLog, LogRecord, LogSink, NoopLog};
