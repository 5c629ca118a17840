//! Buffer pool counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the buffer pool as it serves transactions.
///
/// Every counter is a relaxed atomic: readers want totals, not an ordering
/// between counters, so a [`snapshot`](Self::snapshot) taken while other
/// threads run may mix values from slightly different moments.
///
/// # Example
/// ```
/// use pagedb::buffer::BufferPoolStats;
///
/// let stats = BufferPoolStats::new();
/// stats.bump(&stats.commits);
/// assert_eq!(stats.snapshot().commits, 1);
/// ```
#[derive(Debug, Default)]
pub struct BufferPoolStats {
    /// Fetches served from the cache.
    pub cache_hits: AtomicU64,
    /// Fetches that had to read the page from its file.
    pub cache_misses: AtomicU64,
    /// Clean pages dropped to make room.
    pub evictions: AtomicU64,
    /// Dirty pages passed over while looking for a victim.
    pub dirty_skips: AtomicU64,
    /// Page reads, including rereads on abort.
    pub pages_read: AtomicU64,
    /// Page writes, at commit or explicit flush.
    pub pages_written: AtomicU64,
    /// Fetches that gave up waiting for a page lock.
    pub lock_timeouts: AtomicU64,
    /// Transactions completed with commit.
    pub commits: AtomicU64,
    /// Transactions completed with abort.
    pub aborts: AtomicU64,
}

impl BufferPoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one to `counter`, which must be a field of `self`.
    #[inline]
    pub fn bump(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            evictions: load(&self.evictions),
            dirty_skips: load(&self.dirty_skips),
            pages_read: load(&self.pages_read),
            pages_written: load(&self.pages_written),
            lock_timeouts: load(&self.lock_timeouts),
            commits: load(&self.commits),
            aborts: load(&self.aborts),
        }
    }
}

/// Plain copy of [`BufferPoolStats`] at one moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub dirty_skips: u64,
    pub pages_read: u64,
    pub pages_written: u64,
    pub lock_timeouts: u64,
    pub commits: u64,
    pub aborts: u64,
}

impl StatsSnapshot {
    /// Fraction of fetches served from the cache, 0.0 before any fetch.
    pub fn hit_ratio(&self) -> f64 {
        match self.cache_hits + self.cache_misses {
            0 => 0.0,
            fetches => self.cache_hits as f64 / fetches as f64,
        }
    }

    /// Counter deltas since `earlier`.
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.saturating_sub(earlier.cache_hits),
            cache_misses: self.cache_misses.saturating_sub(earlier.cache_misses),
            evictions: self.evictions.saturating_sub(earlier.evictions),
            dirty_skips: self.dirty_skips.saturating_sub(earlier.dirty_skips),
            pages_read: self.pages_read.saturating_sub(earlier.pages_read),
            pages_written: self.pages_written.saturating_sub(earlier.pages_written),
            lock_timeouts: self.lock_timeouts.saturating_sub(earlier.lock_timeouts),
            commits: self.commits.saturating_sub(earlier.commits),
            aborts: self.aborts.saturating_sub(earlier.aborts),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetches {}/{} hit ({:.1}%), evicted {}, dirty skipped {}, \
             io r{}/w{}, lock timeouts {}, txns +{}/-{}",
            self.cache_hits,
            self.cache_hits + self.cache_misses,
            self.hit_ratio() * 100.0,
            self.evictions,
            self.dirty_skips,
            self.pages_read,
            self.pages_written,
            self.lock_timeouts,
            self.commits,
            self.aborts,
        )
    }
}
