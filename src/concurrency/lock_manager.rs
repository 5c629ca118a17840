//! Page-level read/write locks for strict two-phase locking.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::common::{Error, PageId, Result, TransactionId};

/// Lock strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared; any number of transactions may read a page together.
    Read,
    /// Exclusive; excludes every other transaction.
    Write,
}

/// What a caller intends to do with a fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

impl Permissions {
    /// The lock a fetch with these permissions needs.
    pub fn lock_mode(&self) -> LockMode {
        match self {
            Permissions::ReadOnly => LockMode::Read,
            Permissions::ReadWrite => LockMode::Write,
        }
    }
}

/// Outcome of a single acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    MustWait,
}

type LockTable = HashMap<PageId, HashMap<TransactionId, LockMode>>;

/// Grants and releases per-page locks.
///
/// Every page with at least one holder has an entry mapping each holding
/// transaction to its mode. An entry holds either one or more `Read`
/// locks or exactly one `Write` lock, never both.
///
/// Waiters block on a condition variable that every release signals, so a
/// blocked [`lock`](Self::lock) call re-evaluates as soon as anything is
/// freed and gives up at its deadline. There is no deadlock detection: the
/// transaction whose deadline passes first is the victim.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use pagedb::common::{PageCategory, PageId, TransactionId};
/// use pagedb::concurrency::{LockManager, LockMode};
///
/// let locks = LockManager::new();
/// let page = PageId::new(1, 1, PageCategory::Leaf);
/// let t1 = TransactionId::new();
///
/// locks.lock(page, t1, LockMode::Read, Duration::from_millis(10)).unwrap();
/// assert!(locks.holds(page, t1));
/// locks.release_all(t1);
/// assert!(!locks.holds(page, t1));
/// ```
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try once to take `mode` on `page` for `tid`.
    ///
    /// # Errors
    /// `LockUpgradeConflict` when `tid` holds `Read`, asks for `Write`, and
    /// other transactions also hold `Read`. This never waits.
    pub fn acquire(&self, page: PageId, tid: TransactionId, mode: LockMode) -> Result<Acquire> {
        let mut table = self.table.lock();
        Self::try_acquire(&mut table, page, tid, mode)
    }

    /// Take `mode` on `page` for `tid`, waiting up to `timeout`.
    ///
    /// # Errors
    /// - `LockUpgradeConflict`, immediately, as for [`acquire`](Self::acquire)
    /// - `LockTimeout` if the lock is still unavailable at the deadline
    pub fn lock(
        &self,
        page: PageId,
        tid: TransactionId,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut table = self.table.lock();
        loop {
            if Self::try_acquire(&mut table, page, tid, mode)? == Acquire::Granted {
                return Ok(());
            }
            trace!(%tid, %page, ?mode, "waiting for lock");
            if self.released.wait_until(&mut table, deadline).timed_out() {
                // one last look after the deadline
                if Self::try_acquire(&mut table, page, tid, mode)? == Acquire::Granted {
                    return Ok(());
                }
                debug!(%tid, %page, ?mode, "lock wait timed out");
                return Err(Error::LockTimeout { tid, page });
            }
        }
    }

    /// Drop `tid`'s lock on `page`, if any, and wake waiters.
    pub fn release(&self, page: PageId, tid: TransactionId) {
        let mut table = self.table.lock();
        if let Some(holders) = table.get_mut(&page) {
            if holders.remove(&tid).is_some() {
                trace!(%tid, %page, "lock released");
            }
            if holders.is_empty() {
                table.remove(&page);
            }
        }
        drop(table);
        self.released.notify_all();
    }

    /// Drop every lock `tid` holds and wake waiters.
    pub fn release_all(&self, tid: TransactionId) {
        let mut table = self.table.lock();
        let mut count = 0usize;
        table.retain(|_, holders| {
            if holders.remove(&tid).is_some() {
                count += 1;
            }
            !holders.is_empty()
        });
        drop(table);
        debug!(%tid, count, "released all locks");
        self.released.notify_all();
    }

    /// Whether `tid` holds any lock on `page`.
    pub fn holds(&self, page: PageId, tid: TransactionId) -> bool {
        self.lock_mode(page, tid).is_some()
    }

    /// The mode `tid` holds on `page`.
    pub fn lock_mode(&self, page: PageId, tid: TransactionId) -> Option<LockMode> {
        self.table
            .lock()
            .get(&page)
            .and_then(|holders| holders.get(&tid))
            .copied()
    }

    /// Pages on which `tid` holds a lock.
    pub fn pages_locked_by(&self, tid: TransactionId) -> Vec<PageId> {
        self.table
            .lock()
            .iter()
            .filter(|(_, holders)| holders.contains_key(&tid))
            .map(|(page, _)| *page)
            .collect()
    }

    fn try_acquire(
        table: &mut LockTable,
        page: PageId,
        tid: TransactionId,
        mode: LockMode,
    ) -> Result<Acquire> {
        let holders = table.entry(page).or_default();

        match (holders.get(&tid).copied(), mode) {
            (Some(_), LockMode::Read) | (Some(LockMode::Write), LockMode::Write) => {
                return Ok(Acquire::Granted);
            }
            (Some(LockMode::Read), LockMode::Write) => {
                if holders.len() == 1 {
                    holders.insert(tid, LockMode::Write);
                    debug!(%tid, %page, "lock upgraded");
                    return Ok(Acquire::Granted);
                }
                debug!(%tid, %page, readers = holders.len(), "lock upgrade conflict");
                return Err(Error::LockUpgradeConflict { tid, page });
            }
            (None, _) => {}
        }

        let writer_present = holders.values().any(|m| *m == LockMode::Write);
        let grant = match mode {
            LockMode::Read => !writer_present,
            LockMode::Write => holders.is_empty(),
        };
        if grant {
            holders.insert(tid, mode);
            trace!(%tid, %page, ?mode, "lock granted");
            Ok(Acquire::Granted)
        } else {
            Ok(Acquire::MustWait)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageCategory;

    fn page(no: u32) -> PageId {
        PageId::new(1, no, PageCategory::Leaf)
    }

    #[test]
    fn test_shared_reads() {
        let locks = LockManager::new();
        let (t1, t2) = (TransactionId::new(), TransactionId::new());

        assert_eq!(locks.acquire(page(1), t1, LockMode::Read).unwrap(), Acquire::Granted);
        assert_eq!(locks.acquire(page(1), t2, LockMode::Read).unwrap(), Acquire::Granted);
        assert_eq!(locks.lock_mode(page(1), t1), Some(LockMode::Read));
        assert_eq!(locks.lock_mode(page(1), t2), Some(LockMode::Read));
    }

    #[test]
    fn test_writer_excludes_everyone_else() {
        let locks = LockManager::new();
        let (t1, t2) = (TransactionId::new(), TransactionId::new());

        locks.acquire(page(1), t1, LockMode::Write).unwrap();
        assert_eq!(locks.acquire(page(1), t2, LockMode::Read).unwrap(), Acquire::MustWait);
        assert_eq!(locks.acquire(page(1), t2, LockMode::Write).unwrap(), Acquire::MustWait);
        assert!(!locks.holds(page(1), t2));
    }

    #[test]
    fn test_write_waits_for_other_readers() {
        let locks = LockManager::new();
        let (t1, t2) = (TransactionId::new(), TransactionId::new());

        locks.acquire(page(1), t1, LockMode::Read).unwrap();
        assert_eq!(locks.acquire(page(1), t2, LockMode::Write).unwrap(), Acquire::MustWait);
    }

    #[test]
    fn test_reacquire_is_noop() {
        let locks = LockManager::new();
        let t1 = TransactionId::new();

        locks.acquire(page(1), t1, LockMode::Write).unwrap();
        assert_eq!(locks.acquire(page(1), t1, LockMode::Read).unwrap(), Acquire::Granted);
        assert_eq!(locks.acquire(page(1), t1, LockMode::Write).unwrap(), Acquire::Granted);
        assert_eq!(locks.lock_mode(page(1), t1), Some(LockMode::Write));
    }

    #[test]
    fn test_sole_reader_upgrades() {
        let locks = LockManager::new();
        let t1 = TransactionId::new();

        locks.acquire(page(1), t1, LockMode::Read).unwrap();
        assert_eq!(locks.acquire(page(1), t1, LockMode::Write).unwrap(), Acquire::Granted);
        assert_eq!(locks.lock_mode(page(1), t1), Some(LockMode::Write));
    }

    #[test]
    fn test_shared_upgrade_conflicts() {
        let locks = LockManager::new();
        let (t1, t2) = (TransactionId::new(), TransactionId::new());

        locks.acquire(page(1), t1, LockMode::Read).unwrap();
        locks.acquire(page(1), t2, LockMode::Read).unwrap();
        let err = locks.acquire(page(1), t1, LockMode::Write).unwrap_err();
        assert!(matches!(err, Error::LockUpgradeConflict { .. }));
        assert_eq!(locks.lock_mode(page(1), t1), Some(LockMode::Read));
    }

    #[test]
    fn test_release_is_idempotent() {
        let locks = LockManager::new();
        let t1 = TransactionId::new();

        locks.release(page(1), t1);
        locks.acquire(page(1), t1, LockMode::Write).unwrap();
        locks.release(page(1), t1);
        locks.release(page(1), t1);
        assert!(!locks.holds(page(1), t1));
        assert!(locks.table.lock().is_empty());
    }

    #[test]
    fn test_release_all() {
        let locks = LockManager::new();
        let (t1, t2) = (TransactionId::new(), TransactionId::new());

        for no in 1..=3 {
            locks.acquire(page(no), t1, LockMode::Read).unwrap();
        }
        locks.acquire(page(2), t2, LockMode::Read).unwrap();
        assert_eq!(locks.pages_locked_by(t1).len(), 3);

        locks.release_all(t1);
        assert!(locks.pages_locked_by(t1).is_empty());
        assert!(locks.holds(page(2), t2));
        assert_eq!(locks.table.lock().len(), 1);
    }

    #[test]
    fn test_lock_times_out() {
        let locks = LockManager::new();
        let (t1, t2) = (TransactionId::new(), TransactionId::new());

        locks.acquire(page(1), t1, LockMode::Write).unwrap();
        let start = Instant::now();
        let err = locks
            .lock(page(1), t2, LockMode::Read, Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
