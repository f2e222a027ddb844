use std::sync::Arc;

use crate::buffer::BufferPool;
use crate::error::DbResult;
use crate::file::{HeapFileIterator, TableId};
use crate::record::{Record, TableSchema};
use crate::transaction::TransactionId;

/// Pull-based tuple stream shared by scans and the operators built on them.
///
/// `next` on an iterator that is not open fails with
/// [`DbError::IteratorNotOpen`](crate::error::DbError::IteratorNotOpen); past
/// the end it fails with [`DbError::NoMoreTuples`](crate::error::DbError::NoMoreTuples).
/// `has_next` on a closed iterator is `false`.
pub trait DbIterator {
    fn open(&mut self) -> DbResult<()>;

    fn has_next(&mut self) -> DbResult<bool>;

    fn next(&mut self) -> DbResult<Record>;

    fn close(&mut self) -> DbResult<()>;

    /// Start again from the first tuple
    fn rewind(&mut self) -> DbResult<()> {
        self.close()?;
        self.open()
    }
}

/// Drain an open iterator
pub fn collect_records<I: DbIterator + ?Sized>(iter: &mut I) -> DbResult<Vec<Record>> {
    let mut records = Vec::new();
    while iter.has_next()? {
        records.push(iter.next()?);
    }
    Ok(records)
}

/// Sequential scan of one table under a transaction.
///
/// Column names are reported as `alias.column`, with the alias defaulting to
/// the table name.
pub struct SeqScan {
    table_id: TableId,
    table_name: String,
    alias: String,
    schema: TableSchema,
    inner: HeapFileIterator,
}

impl SeqScan {
    pub fn new(
        pool: &Arc<BufferPool>,
        tid: TransactionId,
        table_id: TableId,
        alias: Option<&str>,
    ) -> DbResult<Self> {
        let catalog = pool.catalog();
        let file = catalog.heap_file(table_id)?;
        let table_name = catalog.table_name(table_id)?;
        let alias = alias.unwrap_or(&table_name).to_string();

        Ok(Self {
            table_id,
            schema: file.schema().clone(),
            inner: file.iterator(pool, tid),
            table_name,
            alias,
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// `alias.column` for every column, in schema order
    pub fn field_names(&self) -> Vec<String> {
        self.schema.qualified_names(&self.alias)
    }

    /// Switch to a different table and alias; the scan must be reopened
    pub fn reset(&mut self, pool: &Arc<BufferPool>, table_id: TableId, alias: Option<&str>) -> DbResult<()> {
        let tid = self.inner.transaction();
        self.inner.close()?;
        *self = Self::new(pool, tid, table_id, alias)?;
        Ok(())
    }
}

impl DbIterator for SeqScan {
    fn open(&mut self) -> DbResult<()> {
        self.inner.open()
    }

    fn has_next(&mut self) -> DbResult<bool> {
        self.inner.has_next()
    }

    fn next(&mut self) -> DbResult<Record> {
        self.inner.next()
    }

    fn close(&mut self) -> DbResult<()> {
        self.inner.close()
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.inner.rewind()
    }
}
