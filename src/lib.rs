pub mod buffer;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod file;
pub mod iterator;
pub mod lock;
pub mod record;
pub mod transaction;

pub use buffer::{BufferPool, PageRef, Permissions};
pub use catalog::{Catalog, CatalogError, CatalogResult, ColumnMetadata, TableMetadata};
pub use config::EngineConfig;
pub use database::Database;
pub use error::{DbError, DbResult};
pub use file::{
    DEFAULT_PAGE_SIZE, DEFAULT_POOL_PAGES, FileError, FileResult, HeapFile, HeapFileIterator,
    PageId, TableId,
};
pub use iterator::{DbIterator, SeqScan, collect_records};
pub use lock::{AbortReason, CancelToken, LockError, LockManager, LockMode, LockResult};
pub use record::{
    ColumnDef, DataType, HeapPage, Record, RecordError, RecordId, RecordResult, SlotId,
    TableSchema, Value,
};
pub use transaction::{TransactionId, TransactionState};
