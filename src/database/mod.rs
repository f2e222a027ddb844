use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::buffer::BufferPool;
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::DbResult;
use crate::file::TableId;
use crate::iterator::SeqScan;
use crate::record::{Record, RecordId};
use crate::transaction::TransactionId;


/// One engine instance: a catalog and the buffer pool over its tables.
///
/// Holds no global state; two `Database` values are fully independent.
pub struct Database {
    config: EngineConfig,
    catalog: Arc<Catalog>,
    pool: Arc<BufferPool>,
}

impl Database {
    pub fn new(config: EngineConfig) -> DbResult<Self> {
        config.validate()?;
        let catalog = Arc::new(Catalog::new(config.page_size));
        let pool = Arc::new(BufferPool::new(Arc::clone(&catalog), &config));
        info!(
            page_size = config.page_size,
            pool_pages = config.pool_pages,
            lock_timeout_ms = ?config.lock_timeout_ms,
            "database opened"
        );
        Ok(Self {
            config,
            catalog,
            pool,
        })
    }

    /// Open with every table listed in a JSON catalog file
    pub fn open_catalog<P: AsRef<Path>>(config: EngineConfig, catalog_path: P) -> DbResult<Self> {
        let db = Self::new(config)?;
        db.catalog.load_schema(catalog_path)?;
        Ok(db)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn begin(&self) -> TransactionId {
        self.pool.begin_transaction()
    }

    pub fn commit(&self, tid: TransactionId) -> DbResult<()> {
        self.pool.transaction_complete(tid, true)
    }

    pub fn abort(&self, tid: TransactionId) -> DbResult<()> {
        self.pool.transaction_complete(tid, false)
    }

    pub fn insert(&self, tid: TransactionId, table: &str, record: &mut Record) -> DbResult<RecordId> {
        let table_id = self.catalog.table_id(table)?;
        self.pool.insert_tuple(tid, table_id, record)
    }

    pub fn delete(&self, tid: TransactionId, record: &Record) -> DbResult<()> {
        self.pool.delete_tuple(tid, record)
    }

    /// Unopened scan of `table`, aliased by its own name
    pub fn scan(&self, tid: TransactionId, table: &str) -> DbResult<SeqScan> {
        let table_id: TableId = self.catalog.table_id(table)?;
        SeqScan::new(&self.pool, tid, table_id, None)
    }

    /// Write every dirty page back; for shutdown
    pub fn flush(&self) -> DbResult<()> {
        self.pool.flush_all_pages()
    }
}
