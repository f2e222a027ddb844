mod error;
mod heap_file;

use std::fmt;

pub use error::{FileError, FileResult};
pub use heap_file::{HeapFile, HeapFileIterator};

/// Default page size in bytes (4KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of pages in the buffer pool
pub const DEFAULT_POOL_PAGES: usize = 50;

/// Identifier of a table, assigned by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(u32);

impl TableId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a page: owning table plus zero-based page number in its file.
/// Used as both the cache key and the lock-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId {
    pub table_id: TableId,
    pub page_no: usize,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: usize) -> Self {
        Self { table_id, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table_id, self.page_no)
    }
}
