use ahash::{AHashMap, AHashSet};
use lru::LruCache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::{PageRef, Permissions};
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::{DbError, DbResult};
use crate::file::{PageId, TableId};
use crate::lock::{CancelToken, LockManager};
use crate::record::{HeapPage, Record, RecordError, RecordId};
use crate::transaction::{TransactionId, TransactionState};

/// Bookkeeping for one live transaction
struct TxnEntry {
    state: TransactionState,
    token: CancelToken,
    /// Every page requested through the pool, hit or miss
    touched: AHashSet<PageId>,
}

/// Bounded cache of heap pages shared by all transactions.
///
/// Pages are handed out only after the requesting transaction holds the
/// matching lock. Dirty pages stay in the cache until their transaction
/// commits (flushed) or aborts (reverted), so eviction only ever picks a clean,
/// unlocked page, least recently used first.
///
/// The pool mutex is never held across a lock wait or a disk read.
pub struct BufferPool {
    catalog: Arc<Catalog>,
    lock_manager: LockManager,
    /// Recency order is tracked by the cache itself; capacity is enforced by
    /// hand since the victim is not always the least recent page
    cache: Mutex<LruCache<PageId, PageRef>>,
    capacity: usize,
    page_size: usize,
    transactions: Mutex<AHashMap<TransactionId, TxnEntry>>,
    next_tid: AtomicU64,
}

impl BufferPool {
    pub fn new(catalog: Arc<Catalog>, config: &EngineConfig) -> Self {
        Self {
            lock_manager: LockManager::new(config.lock_timeout()),
            cache: Mutex::new(LruCache::unbounded()),
            capacity: config.pool_pages,
            page_size: catalog.page_size(),
            catalog,
            transactions: Mutex::new(AHashMap::new()),
            next_tid: AtomicU64::new(1),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<PageId, PageRef>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transactions(&self) -> MutexGuard<'_, AHashMap<TransactionId, TxnEntry>> {
        self.transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // --- Transactions ---

    pub fn begin_transaction(&self) -> TransactionId {
        let tid = TransactionId::new(self.next_tid.fetch_add(1, Ordering::Relaxed));
        self.transactions().insert(
            tid,
            TxnEntry {
                state: TransactionState::Active,
                token: CancelToken::new(),
                touched: AHashSet::new(),
            },
        );
        debug!(%tid, "transaction started");
        tid
    }

    /// Ask a transaction to abort. A lock wait in progress fails promptly and
    /// every later page request fails; the owner must still call
    /// [`transaction_complete`](Self::transaction_complete).
    pub fn cancel(&self, tid: TransactionId) -> DbResult<()> {
        let token = {
            let mut txns = self.transactions();
            let entry = txns.get_mut(&tid).ok_or_else(|| self.missing(tid))?;
            if entry.state == TransactionState::Active {
                entry.state = TransactionState::Doomed;
            }
            entry.token.clone()
        };
        info!(%tid, "transaction cancelled");
        token.cancel();
        Ok(())
    }

    /// `None` only for ids this pool never issued
    pub fn transaction_state(&self, tid: TransactionId) -> Option<TransactionState> {
        match self.transactions().get(&tid) {
            Some(entry) => Some(entry.state),
            None if self.issued(tid) => Some(TransactionState::Ended),
            None => None,
        }
    }

    fn issued(&self, tid: TransactionId) -> bool {
        tid.as_u64() > 0 && tid.as_u64() < self.next_tid.load(Ordering::Relaxed)
    }

    /// Error for an id with no registry entry; must not take the registry lock
    fn missing(&self, tid: TransactionId) -> DbError {
        if self.issued(tid) {
            DbError::TransactionEnded(tid)
        } else {
            DbError::UnknownTransaction(tid)
        }
    }

    /// Token of an active transaction, or the error to report for any other state
    fn active_token(&self, tid: TransactionId) -> DbResult<CancelToken> {
        match self.transactions().get(&tid) {
            Some(entry) => match entry.state {
                TransactionState::Active => Ok(entry.token.clone()),
                TransactionState::Doomed => Err(DbError::TransactionAborted(tid)),
                _ => Err(DbError::TransactionEnded(tid)),
            },
            None => Err(self.missing(tid)),
        }
    }

    fn doom(&self, tid: TransactionId) {
        if let Some(entry) = self.transactions().get_mut(&tid)
            && entry.state == TransactionState::Active
        {
            entry.state = TransactionState::Doomed;
        }
    }

    fn touch(&self, tid: TransactionId, pid: PageId) {
        if let Some(entry) = self.transactions().get_mut(&tid) {
            entry.touched.insert(pid);
        }
    }

    fn touched_pages(&self, tid: TransactionId) -> DbResult<Vec<PageId>> {
        self.transactions()
            .get(&tid)
            .map(|entry| entry.touched.iter().copied().collect())
            .ok_or_else(|| self.missing(tid))
    }

    fn set_state(&self, tid: TransactionId, state: TransactionState) {
        if let Some(entry) = self.transactions().get_mut(&tid) {
            entry.state = state;
        }
    }

    /// Block until `tid` holds the lock `perm` needs; an abandoned wait dooms the transaction
    fn lock_page(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> DbResult<()> {
        let token = self.active_token(tid)?;
        if let Err(e) = self
            .lock_manager
            .acquire(tid, pid, perm.lock_mode(), &token)
        {
            self.doom(tid);
            return Err(e.into());
        }
        self.touch(tid, pid);
        Ok(())
    }

    // --- Pages ---

    /// Fetch a page with the requested permission, waiting for the lock and
    /// reading it from disk if it is not cached.
    pub fn get_page(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> DbResult<PageRef> {
        self.lock_page(tid, pid, perm)?;

        if let Some(page) = self.cache().get(&pid) {
            return Ok(page.clone());
        }

        let file = self.catalog.heap_file(pid.table_id)?;
        let page = file.read_page(pid)?;
        self.install(page)
    }

    /// Insert a page read outside the pool mutex. If another thread cached the
    /// same page meanwhile, its copy wins.
    fn install(&self, page: HeapPage) -> DbResult<PageRef> {
        let pid = page.id();
        let mut cache = self.cache();
        if let Some(existing) = cache.get(&pid) {
            return Ok(existing.clone());
        }
        if cache.len() >= self.capacity {
            self.evict_page(&mut cache)?;
        }

        let page = PageRef::new(page);
        cache.put(pid, page.clone());
        Ok(page)
    }

    /// Put a page the caller dirtied back under its id
    fn recache(&self, page: &PageRef) -> DbResult<()> {
        let pid = page.read().id();
        let mut cache = self.cache();
        if !cache.contains(&pid) && cache.len() >= self.capacity {
            self.evict_page(&mut cache)?;
        }
        cache.put(pid, page.clone());
        Ok(())
    }

    /// Drop the least recently used page that is clean and unlocked
    fn evict_page(&self, cache: &mut LruCache<PageId, PageRef>) -> DbResult<()> {
        let victim = cache
            .iter()
            .rev()
            .find(|(pid, page)| {
                !self.lock_manager.is_locked(**pid)
                    && page.try_read().is_some_and(|p| !p.is_dirty())
            })
            .map(|(pid, _)| *pid);

        match victim {
            Some(pid) => {
                // Unlocked and clean, so there is nothing to write back
                cache.pop(&pid);
                debug!(page = %pid, "page evicted");
                Ok(())
            }
            None => {
                warn!(capacity = self.capacity, "no evictable page in buffer pool");
                Err(DbError::StorageExhausted {
                    capacity: self.capacity,
                })
            }
        }
    }

    /// Write a dirty page to its file and mark it clean
    fn flush_page(&self, page: &PageRef) -> DbResult<Option<TableId>> {
        let mut page = page.write();
        if !page.is_dirty() {
            return Ok(None);
        }
        let pid = page.id();
        let file = self.catalog.heap_file(pid.table_id)?;
        file.write_page(&page)?;
        page.mark_dirty(None);
        debug!(page = %pid, "page flushed");
        Ok(Some(pid.table_id))
    }

    fn sync_tables(&self, tables: AHashSet<TableId>) -> DbResult<()> {
        for table in tables {
            self.catalog.heap_file(table)?.sync()?;
        }
        Ok(())
    }

    /// Add `record` to table `table_id` on behalf of `tid`.
    ///
    /// Sets and returns the record's id; the page it landed on stays dirty in
    /// the cache until `tid` completes.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: TableId,
        record: &mut Record,
    ) -> DbResult<RecordId> {
        self.active_token(tid)?;
        let file = self.catalog.heap_file(table_id)?;
        let pages = file.insert_tuple(self, tid, record)?;
        self.keep_dirty(tid, &pages)?;
        record
            .record_id()
            .ok_or_else(|| RecordError::MissingRecordId.into())
    }

    /// Remove `record` from its table on behalf of `tid`
    pub fn delete_tuple(&self, tid: TransactionId, record: &Record) -> DbResult<()> {
        self.active_token(tid)?;
        let rid = record.record_id().ok_or(RecordError::MissingRecordId)?;
        let file = self.catalog.heap_file(rid.page_id.table_id)?;
        let pages = file.delete_tuple(self, tid, record)?;
        self.keep_dirty(tid, &pages)
    }

    fn keep_dirty(&self, tid: TransactionId, pages: &[PageRef]) -> DbResult<()> {
        for page in pages {
            page.write().mark_dirty(Some(tid));
            self.recache(page)?;
        }
        Ok(())
    }

    /// Drop the lock `tid` holds on `pid` before the transaction ends.
    ///
    /// Only safe for pages the transaction has not modified.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) -> DbResult<()> {
        self.lock_manager.release(tid, pid)?;
        Ok(())
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds(tid, pid)
    }

    /// Transaction that last dirtied a cached page
    pub fn page_dirtier(&self, pid: PageId) -> Option<TransactionId> {
        let page = self.cache().peek(&pid).cloned()?;
        page.read().dirtier()
    }

    /// Write every page dirtied by `tid` to disk
    pub fn flush_pages(&self, tid: TransactionId) -> DbResult<()> {
        let mut written = AHashSet::new();
        for pid in self.touched_pages(tid)? {
            let Some(page) = self.cache().peek(&pid).cloned() else {
                continue;
            };
            if page.read().dirtier() != Some(tid) {
                continue;
            }
            if let Some(table) = self.flush_page(&page)? {
                written.insert(table);
            }
        }
        self.sync_tables(written)
    }

    /// Write every dirty cached page to disk, whoever dirtied it.
    ///
    /// Breaks isolation for running transactions; meant for shutdown and tests.
    pub fn flush_all_pages(&self) -> DbResult<()> {
        let pages: Vec<PageRef> = self.cache().iter().map(|(_, page)| page.clone()).collect();
        let mut written = AHashSet::new();
        for page in &pages {
            if let Some(table) = self.flush_page(page)? {
                written.insert(table);
            }
        }
        self.sync_tables(written)
    }

    /// Forget a cached page without writing it back
    pub fn discard_page(&self, pid: PageId) {
        if self.cache().pop(&pid).is_some() {
            debug!(page = %pid, "page discarded");
        }
    }

    /// Put back the before-image of every page `tid` dirtied
    fn revert_pages(&self, tid: TransactionId, touched: &[PageId]) {
        for pid in touched {
            let Some(page) = self.cache().peek(pid).cloned() else {
                continue;
            };
            let mut page = page.write();
            if page.dirtier() == Some(tid) {
                page.revert();
                debug!(%tid, page = %pid, "page reverted");
            }
        }
    }

    /// Commit or abort `tid`, then release all of its locks.
    ///
    /// Commit writes the pages it dirtied; abort restores their before-images.
    /// A doomed transaction is always rolled back, and asking to commit it
    /// returns [`DbError::TransactionAborted`]. If writing fails the
    /// transaction stays active with its locks, so the caller can retry or abort.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> DbResult<()> {
        let (touched, doomed) = {
            let mut txns = self.transactions();
            let entry = txns.get_mut(&tid).ok_or_else(|| self.missing(tid))?;
            if entry.state.is_finishing() {
                return Err(DbError::TransactionEnded(tid));
            }
            let doomed = entry.state == TransactionState::Doomed;
            entry.state = if commit && !doomed {
                TransactionState::Committing
            } else {
                TransactionState::Aborting
            };
            (entry.touched.iter().copied().collect::<Vec<_>>(), doomed)
        };

        if commit && !doomed {
            if let Err(e) = self.flush_pages(tid) {
                warn!(%tid, error = %e, "commit flush failed");
                self.set_state(tid, TransactionState::Active);
                return Err(e);
            }
        } else {
            self.revert_pages(tid, &touched);
        }

        let released = self.lock_manager.release_all(tid);
        self.transactions().remove(&tid);
        info!(%tid, committed = commit && !doomed, locks = released.len(), "transaction complete");

        if commit && doomed {
            return Err(DbError::TransactionAborted(tid));
        }
        Ok(())
    }

    // --- Introspection ---

    pub fn cached_page_count(&self) -> usize {
        self.cache().len()
    }

    pub fn is_cached(&self, pid: PageId) -> bool {
        self.cache().contains(&pid)
    }

    pub fn dirty_page_count(&self) -> usize {
        let pages: Vec<PageRef> = self.cache().iter().map(|(_, page)| page.clone()).collect();
        pages.iter().filter(|page| page.read().is_dirty()).count()
    }
}
