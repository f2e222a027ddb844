mod buffer_pool;


pub use buffer_pool::BufferPool;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::lock::LockMode;
use crate::record::HeapPage;

/// Access a caller asks for when fetching a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

impl Permissions {
    pub fn lock_mode(self) -> LockMode {
        match self {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// Shared handle to a page cached in the buffer pool.
///
/// Every holder of a handle for the same page sees the same in-memory image.
/// The `RwLock` only guards the bytes for the duration of one call; page
/// locks held by transactions are the lock manager's business.
#[derive(Debug, Clone)]
pub struct PageRef(Arc<RwLock<HeapPage>>);

impl PageRef {
    pub(crate) fn new(page: HeapPage) -> Self {
        Self(Arc::new(RwLock::new(page)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HeapPage> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HeapPage> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking read; `None` while a writer is inside the page
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, HeapPage>> {
        self.0.try_read().ok()
    }

    pub fn ptr_eq(&self, other: &PageRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
