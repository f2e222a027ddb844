use ahash::{AHashMap, AHashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::LockMode;
use super::cancel::CancelToken;
use super::error::{AbortReason, LockError, LockResult};
use super::gate::Gate;
use crate::file::PageId;
use crate::transaction::TransactionId;

/// Transactions currently holding a page
#[derive(Default)]
struct Holders {
    readers: AHashSet<TransactionId>,
    writer: Option<TransactionId>,
}

impl Holders {
    fn mode_of(&self, tid: TransactionId) -> Option<LockMode> {
        if self.writer == Some(tid) {
            Some(LockMode::Exclusive)
        } else if self.readers.contains(&tid) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    fn is_empty(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none()
    }
}

/// Lock state of one page: the holder sets under their own short-lived mutex,
/// and the gate that does the actual blocking. The holder mutex is never held
/// while waiting on the gate.
struct PageLock {
    holders: Mutex<Holders>,
    gate: Arc<Gate>,
}

impl PageLock {
    fn new() -> Self {
        Self {
            holders: Mutex::new(Holders::default()),
            gate: Arc::new(Gate::new()),
        }
    }

    fn holders(&self) -> MutexGuard<'_, Holders> {
        self.holders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_idle(&self) -> bool {
        self.holders().is_empty() && self.gate.is_idle()
    }
}

/// Strict two-phase page lock manager.
///
/// Deadlocks are broken by a wait timeout: a request that cannot be granted
/// before the deadline fails with [`LockError::Aborted`], as does a request
/// whose [`CancelToken`] is signalled while it waits. Neither leaves the
/// transaction holding anything new on that page.
pub struct LockManager {
    table: Mutex<AHashMap<PageId, Arc<PageLock>>>,
    held: Mutex<AHashMap<TransactionId, AHashSet<PageId>>>,
    timeout: Option<Duration>,
}

impl LockManager {
    /// `timeout` bounds every individual wait; `None` waits until granted or cancelled
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            table: Mutex::new(AHashMap::new()),
            held: Mutex::new(AHashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn table(&self) -> MutexGuard<'_, AHashMap<PageId, Arc<PageLock>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn held(&self) -> MutexGuard<'_, AHashMap<TransactionId, AHashSet<PageId>>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, pid: PageId) -> Arc<PageLock> {
        Arc::clone(
            self.table()
                .entry(pid)
                .or_insert_with(|| Arc::new(PageLock::new())),
        )
    }

    fn existing(&self, pid: PageId) -> Option<Arc<PageLock>> {
        self.table().get(&pid).cloned()
    }

    /// Block until `tid` holds `mode` on `pid`.
    ///
    /// Re-requesting a mode already held, or shared while holding exclusive, is a
    /// no-op. Requesting exclusive while holding shared upgrades: the shared hold
    /// is given up and the transaction queues for exclusive behind earlier requests.
    pub fn acquire(
        &self,
        tid: TransactionId,
        pid: PageId,
        mode: LockMode,
        token: &CancelToken,
    ) -> LockResult<()> {
        let lock = self.entry(pid);
        let result = self.acquire_on(&lock, tid, pid, mode, token);
        drop(lock);
        if result.is_err() {
            self.reclaim(pid);
        }
        result
    }

    fn acquire_on(
        &self,
        lock: &PageLock,
        tid: TransactionId,
        pid: PageId,
        mode: LockMode,
        token: &CancelToken,
    ) -> LockResult<()> {
        let current = lock.holders().mode_of(tid);
        let upgrading = match (current, mode) {
            (Some(LockMode::Exclusive), _) | (Some(LockMode::Shared), LockMode::Shared) => {
                return Ok(());
            }
            (Some(LockMode::Shared), LockMode::Exclusive) => true,
            (None, _) => false,
        };

        // A cancelled transaction gets nothing new, even when it would not wait
        if token.is_cancelled() {
            warn!(%tid, page = %pid, ?mode, "lock request from cancelled transaction");
            return Err(LockError::Aborted {
                tid,
                page: pid,
                reason: AbortReason::Cancelled,
            });
        }

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let waited = if upgrading {
            debug!(%tid, page = %pid, "upgrading shared lock");
            lock.holders().readers.remove(&tid);
            lock.gate.upgrade(token, deadline)
        } else {
            lock.gate.acquire(mode, token, deadline)
        };

        match waited {
            Ok(()) => {
                {
                    let mut holders = lock.holders();
                    match mode {
                        LockMode::Shared => {
                            holders.readers.insert(tid);
                        }
                        LockMode::Exclusive => holders.writer = Some(tid),
                    }
                }
                self.held().entry(tid).or_default().insert(pid);
                debug!(%tid, page = %pid, ?mode, "lock granted");
                Ok(())
            }
            Err(reason) => {
                if upgrading {
                    self.forget(tid, pid);
                }
                warn!(%tid, page = %pid, ?mode, %reason, "lock wait aborted");
                Err(LockError::Aborted {
                    tid,
                    page: pid,
                    reason,
                })
            }
        }
    }

    /// Drop whatever `tid` holds on `pid`
    pub fn release(&self, tid: TransactionId, pid: PageId) -> LockResult<()> {
        let lock = self
            .existing(pid)
            .ok_or(LockError::NotHeld { tid, page: pid })?;

        let mode = {
            let mut holders = lock.holders();
            match holders.mode_of(tid) {
                Some(LockMode::Shared) => {
                    holders.readers.remove(&tid);
                    LockMode::Shared
                }
                Some(LockMode::Exclusive) => {
                    holders.writer = None;
                    LockMode::Exclusive
                }
                None => return Err(LockError::NotHeld { tid, page: pid }),
            }
        };
        lock.gate.release(mode);
        drop(lock);

        self.forget(tid, pid);
        self.reclaim(pid);
        debug!(%tid, page = %pid, ?mode, "lock released");
        Ok(())
    }

    /// Release every lock `tid` holds; returns the pages released
    pub fn release_all(&self, tid: TransactionId) -> Vec<PageId> {
        let pages: Vec<PageId> = self
            .held()
            .remove(&tid)
            .map(|pages| pages.into_iter().collect())
            .unwrap_or_default();

        pages
            .into_iter()
            .filter(|&pid| self.release(tid, pid).is_ok())
            .collect()
    }

    pub fn holds(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_mode(tid, pid).is_some()
    }

    pub fn lock_mode(&self, tid: TransactionId, pid: PageId) -> Option<LockMode> {
        self.table()
            .get(&pid)
            .and_then(|lock| lock.holders().mode_of(tid))
    }

    /// Whether any transaction holds or is waiting for `pid`
    pub fn is_locked(&self, pid: PageId) -> bool {
        self.table().get(&pid).is_some_and(|lock| !lock.is_idle())
    }

    pub fn pages_locked_by(&self, tid: TransactionId) -> Vec<PageId> {
        self.held()
            .get(&tid)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of pages with a live lock-table entry
    pub fn tracked_pages(&self) -> usize {
        self.table().len()
    }

    fn forget(&self, tid: TransactionId, pid: PageId) {
        let mut held = self.held();
        if let Some(pages) = held.get_mut(&tid) {
            pages.remove(&pid);
            if pages.is_empty() {
                held.remove(&tid);
            }
        }
    }

    /// Drop the table entry for `pid` once nobody holds, waits on, or
    /// references it. Every reference is cloned under the table mutex, so a
    /// count of one here means no other thread can be using the entry.
    fn reclaim(&self, pid: PageId) {
        let mut table = self.table();
        if let Some(lock) = table.get(&pid)
            && Arc::strong_count(lock) == 1
            && lock.is_idle()
        {
            table.remove(&pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::TableId;
    use std::sync::mpsc;
    use std::thread;

    fn page(no: usize) -> PageId {
        PageId::new(TableId::new(1), no)
    }

    fn tid(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    #[test]
    fn test_shared_locks_coexist() {
        let lm = LockManager::new(Some(Duration::from_millis(50)));
        let token = CancelToken::new();

        lm.acquire(tid(1), page(0), LockMode::Shared, &token).unwrap();
        lm.acquire(tid(2), page(0), LockMode::Shared, &token).unwrap();
        assert_eq!(lm.lock_mode(tid(1), page(0)), Some(LockMode::Shared));
        assert_eq!(lm.lock_mode(tid(2), page(0)), Some(LockMode::Shared));
    }

    #[test]
    fn test_reacquire_is_noop() {
        let lm = LockManager::new(Some(Duration::from_millis(50)));
        let token = CancelToken::new();

        lm.acquire(tid(1), page(0), LockMode::Exclusive, &token).unwrap();
        lm.acquire(tid(1), page(0), LockMode::Exclusive, &token).unwrap();
        lm.acquire(tid(1), page(0), LockMode::Shared, &token).unwrap();
        assert_eq!(lm.lock_mode(tid(1), page(0)), Some(LockMode::Exclusive));

        // A single release frees it completely
        lm.release(tid(1), page(0)).unwrap();
        assert!(!lm.holds(tid(1), page(0)));
        assert!(!lm.is_locked(page(0)));
    }

    #[test]
    fn test_exclusive_conflict_times_out() {
        let lm = LockManager::new(Some(Duration::from_millis(30)));
        let token = CancelToken::new();

        lm.acquire(tid(1), page(0), LockMode::Shared, &token).unwrap();
        let err = lm
            .acquire(tid(2), page(0), LockMode::Exclusive, &token)
            .unwrap_err();
        assert!(matches!(
            err,
            LockError::Aborted {
                reason: AbortReason::TimedOut,
                ..
            }
        ));
        assert!(!lm.holds(tid(2), page(0)));
        assert!(lm.pages_locked_by(tid(2)).is_empty());
    }

    #[test]
    fn test_upgrade_without_contention() {
        let lm = LockManager::new(Some(Duration::from_millis(30)));
        let token = CancelToken::new();

        lm.acquire(tid(1), page(0), LockMode::Shared, &token).unwrap();
        lm.acquire(tid(1), page(0), LockMode::Exclusive, &token).unwrap();
        assert_eq!(lm.lock_mode(tid(1), page(0)), Some(LockMode::Exclusive));
        assert_eq!(lm.pages_locked_by(tid(1)), vec![page(0)]);
    }

    #[test]
    fn test_upgrade_waits_for_other_reader() {
        let lm = Arc::new(LockManager::new(Some(Duration::from_secs(5))));
        let token = CancelToken::new();
        lm.acquire(tid(1), page(0), LockMode::Shared, &token).unwrap();
        lm.acquire(tid(2), page(0), LockMode::Shared, &token).unwrap();

        let (tx, rx) = mpsc::channel();
        let upgrader = {
            let lm = Arc::clone(&lm);
            thread::spawn(move || {
                let result = lm.acquire(tid(1), page(0), LockMode::Exclusive, &CancelToken::new());
                tx.send(result.is_ok()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        lm.release(tid(2), page(0)).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        upgrader.join().unwrap();
        assert_eq!(lm.lock_mode(tid(1), page(0)), Some(LockMode::Exclusive));
    }

    #[test]
    fn test_cancel_aborts_waiter_without_residue() {
        let lm = Arc::new(LockManager::new(None));
        lm.acquire(tid(1), page(3), LockMode::Exclusive, &CancelToken::new())
            .unwrap();

        let token = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let lm = Arc::clone(&lm);
            let token = token.clone();
            thread::spawn(move || {
                tx.send(lm.acquire(tid(2), page(3), LockMode::Shared, &token))
                    .unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        token.cancel();
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            result,
            Err(LockError::Aborted {
                reason: AbortReason::Cancelled,
                ..
            })
        ));
        waiter.join().unwrap();

        assert!(!lm.holds(tid(2), page(3)));
        lm.release(tid(1), page(3)).unwrap();
        assert_eq!(lm.tracked_pages(), 0);
    }

    #[test]
    fn test_release_not_held_is_reported() {
        let lm = LockManager::new(None);
        let token = CancelToken::new();
        assert!(matches!(
            lm.release(tid(1), page(0)),
            Err(LockError::NotHeld { .. })
        ));

        lm.acquire(tid(1), page(0), LockMode::Shared, &token).unwrap();
        assert!(matches!(
            lm.release(tid(2), page(0)),
            Err(LockError::NotHeld { .. })
        ));
        assert!(lm.holds(tid(1), page(0)));
    }

    #[test]
    fn test_release_all_reclaims_entries() {
        let lm = LockManager::new(None);
        let token = CancelToken::new();
        for no in 0..4 {
            lm.acquire(tid(9), page(no), LockMode::Exclusive, &token)
                .unwrap();
        }
        assert_eq!(lm.tracked_pages(), 4);

        let mut released = lm.release_all(tid(9));
        released.sort();
        assert_eq!(released, (0..4).map(page).collect::<Vec<_>>());
        assert_eq!(lm.tracked_pages(), 0);
        assert!(lm.pages_locked_by(tid(9)).is_empty());
    }

    #[test]
    fn test_writer_blocks_reader_until_release() {
        let lm = Arc::new(LockManager::new(Some(Duration::from_secs(5))));
        lm.acquire(tid(1), page(0), LockMode::Exclusive, &CancelToken::new())
            .unwrap();

        let (tx, rx) = mpsc::channel();
        let reader = {
            let lm = Arc::clone(&lm);
            thread::spawn(move || {
                lm.acquire(tid(2), page(0), LockMode::Shared, &CancelToken::new())
                    .unwrap();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        lm.release(tid(1), page(0)).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        reader.join().unwrap();
        assert!(lm.holds(tid(2), page(0)));
    }
}
