use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::error::{FileError, FileResult};
use super::{PageId, TableId};
use crate::buffer::{BufferPool, PageRef, Permissions};
use crate::error::{DbError, DbResult};
use crate::iterator::DbIterator;
use crate::record::{HeapPage, Record, RecordError, RecordId, TableSchema};
use crate::transaction::TransactionId;

/// A table stored as an unordered sequence of fixed-size pages.
///
/// Page *n* occupies bytes `[n * page_size, (n + 1) * page_size)`; the file
/// only ever grows by whole pages.
pub struct HeapFile {
    table_id: TableId,
    path: PathBuf,
    schema: TableSchema,
    page_size: usize,
    slots_per_page: usize,
    file: Mutex<File>,
}

impl HeapFile {
    /// Open the backing file of a table, creating it empty if it does not exist
    pub fn open<P: AsRef<Path>>(
        table_id: TableId,
        path: P,
        schema: TableSchema,
        page_size: usize,
    ) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let slots_per_page = HeapPage::slot_capacity(page_size, schema.record_size());
        if slots_per_page == 0 {
            return Err(RecordError::InvalidRecord(format!(
                "Record size {} does not fit a {} byte page",
                schema.record_size(),
                page_size
            ))
            .into());
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(FileError::from)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(FileError::from)?;

        let heap_file = Self {
            table_id,
            path,
            schema,
            page_size,
            slots_per_page,
            file: Mutex::new(file),
        };
        // Refuse to work on a file that is not a whole number of pages
        heap_file.num_pages()?;
        Ok(heap_file)
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn slots_per_page(&self) -> usize {
        self.slots_per_page
    }

    fn file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn page_count_of(&self, file: &File) -> FileResult<usize> {
        let len = file.metadata()?.len();
        if len % self.page_size as u64 != 0 {
            return Err(FileError::MisalignedFile {
                len,
                page_size: self.page_size,
            });
        }
        Ok((len / self.page_size as u64) as usize)
    }

    fn check_owner(&self, pid: PageId) -> FileResult<()> {
        if pid.table_id != self.table_id {
            return Err(FileError::WrongTable {
                page: pid,
                table: self.table_id.as_u32(),
            });
        }
        Ok(())
    }

    /// Number of pages in the file
    pub fn num_pages(&self) -> FileResult<usize> {
        let file = self.file();
        self.page_count_of(&file)
    }

    /// Read one page from disk as a clean page
    pub fn read_page(&self, pid: PageId) -> DbResult<HeapPage> {
        self.check_owner(pid)?;
        let mut buffer = vec![0u8; self.page_size];
        {
            let mut file = self.file();
            let num_pages = self.page_count_of(&file)?;
            if pid.page_no >= num_pages {
                return Err(FileError::PageOutOfBounds {
                    page: pid,
                    num_pages,
                }
                .into());
            }

            file.seek(SeekFrom::Start((pid.page_no * self.page_size) as u64))
                .map_err(FileError::from)?;
            let mut filled = 0;
            while filled < buffer.len() {
                match file.read(&mut buffer[filled..]).map_err(FileError::from)? {
                    0 => break,
                    n => filled += n,
                }
            }
            if filled < self.page_size {
                return Err(FileError::ShortRead {
                    page: pid,
                    expected: self.page_size,
                    actual: filled,
                }
                .into());
            }
        }

        Ok(HeapPage::new(pid, buffer, self.schema.record_size())?)
    }

    /// Overwrite an existing page in place; never changes the file length
    pub fn write_page(&self, page: &HeapPage) -> FileResult<()> {
        let pid = page.id();
        self.check_owner(pid)?;
        if page.data().len() != self.page_size {
            return Err(FileError::InvalidPageSize {
                expected: self.page_size,
                actual: page.data().len(),
            });
        }

        let mut file = self.file();
        let num_pages = self.page_count_of(&file)?;
        if pid.page_no >= num_pages {
            return Err(FileError::PageOutOfBounds {
                page: pid,
                num_pages,
            });
        }
        file.seek(SeekFrom::Start((pid.page_no * self.page_size) as u64))?;
        file.write_all(page.data())?;
        // No fsync here; sync() is called once per commit or flush-all
        Ok(())
    }

    /// Grow the file by one zero-filled page and return its id
    pub fn append_empty_page(&self) -> FileResult<PageId> {
        let mut file = self.file();
        let page_no = self.page_count_of(&file)?;
        file.seek(SeekFrom::Start((page_no * self.page_size) as u64))?;
        file.write_all(&HeapPage::empty_data(self.page_size))?;

        let pid = PageId::new(self.table_id, page_no);
        debug!(page = %pid, "heap file grew");
        Ok(pid)
    }

    /// Sync file contents to disk
    pub fn sync(&self) -> FileResult<()> {
        self.file().sync_data()?;
        Ok(())
    }

    /// Decode every occupied slot of `page`, tagging each record with its id
    pub fn decode_page(&self, page: &HeapPage) -> DbResult<Vec<Record>> {
        page.used_slots()
            .map(|slot| -> DbResult<Record> {
                let mut record = Record::decode(page.record_bytes(slot)?, &self.schema)?;
                record.set_record_id(Some(RecordId::new(page.id(), slot)));
                Ok(record)
            })
            .collect()
    }

    /// Place `record` in the first free slot of the table, appending a page if
    /// every existing page is full. Sets the record id and returns the page
    /// that was modified.
    ///
    /// Each page is taken with write permission through the pool. Full pages
    /// this transaction had not locked before the scan are released again.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        record: &mut Record,
    ) -> DbResult<Vec<PageRef>> {
        let bytes = record.encode(&self.schema)?;

        for page_no in 0..self.num_pages()? {
            let pid = PageId::new(self.table_id, page_no);
            if let Some((page, slot)) = self.insert_into(pool, tid, pid, &bytes)? {
                record.set_record_id(Some(RecordId::new(pid, slot)));
                return Ok(vec![page]);
            }
        }

        // A page becomes visible to other transactions as soon as the file
        // grows, so it may already be filled by the time we lock it
        loop {
            let pid = self.append_empty_page()?;
            if let Some((page, slot)) = self.insert_into(pool, tid, pid, &bytes)? {
                record.set_record_id(Some(RecordId::new(pid, slot)));
                return Ok(vec![page]);
            }
        }
    }

    /// Write-lock `pid` through the pool and place `bytes` in its first free
    /// slot. A full page is released again unless `tid` held it beforehand.
    pub(crate) fn insert_into(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        pid: PageId,
        bytes: &[u8],
    ) -> DbResult<Option<(PageRef, usize)>> {
        let held_before = pool.holds_lock(tid, pid);
        let page = pool.get_page(tid, pid, Permissions::ReadWrite)?;

        let slot = {
            let mut guard = page.write();
            match guard.find_free_slot() {
                Some(_) => Some(guard.insert_record(tid, bytes)?),
                None => None,
            }
        };
        match slot {
            Some(slot) => Ok(Some((page, slot))),
            None => {
                if !held_before {
                    pool.release_page(tid, pid)?;
                }
                Ok(None)
            }
        }
    }

    /// Free the slot `record` occupies; returns the page that was modified
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        record: &Record,
    ) -> DbResult<Vec<PageRef>> {
        let rid = record.record_id().ok_or(RecordError::MissingRecordId)?;
        self.check_owner(rid.page_id)?;

        let page = pool.get_page(tid, rid.page_id, Permissions::ReadWrite)?;
        page.write().delete_record(tid, rid.slot)?;
        Ok(vec![page])
    }

    /// Lazy scan over every tuple, in page then slot order
    pub fn iterator(self: &Arc<Self>, pool: &Arc<BufferPool>, tid: TransactionId) -> HeapFileIterator {
        HeapFileIterator::new(Arc::clone(self), Arc::clone(pool), tid)
    }
}

/// Forward-only scan of a heap file on behalf of one transaction.
///
/// A page is read-locked when the scan reaches it and, unless the transaction
/// held it before or has dirtied it, released when the scan moves past it.
pub struct HeapFileIterator {
    file: Arc<HeapFile>,
    pool: Arc<BufferPool>,
    tid: TransactionId,
    open: bool,
    next_page: usize,
    current: Option<(PageId, bool)>,
    buffered: VecDeque<Record>,
}

impl HeapFileIterator {
    fn new(file: Arc<HeapFile>, pool: Arc<BufferPool>, tid: TransactionId) -> Self {
        Self {
            file,
            pool,
            tid,
            open: false,
            next_page: 0,
            current: None,
            buffered: VecDeque::new(),
        }
    }

    pub fn transaction(&self) -> TransactionId {
        self.tid
    }

    fn load(&mut self, page_no: usize) -> DbResult<()> {
        let pid = PageId::new(self.file.table_id(), page_no);
        let held_before = self.pool.holds_lock(self.tid, pid);
        let page = self.pool.get_page(self.tid, pid, Permissions::ReadOnly)?;
        self.current = Some((pid, !held_before));

        let records = self.file.decode_page(&page.read())?;
        self.buffered.extend(records);
        Ok(())
    }

    fn leave_current(&mut self) -> DbResult<()> {
        if let Some((pid, release)) = self.current.take()
            && release
            && self.pool.page_dirtier(pid) != Some(self.tid)
        {
            self.pool.release_page(self.tid, pid)?;
        }
        Ok(())
    }
}

impl DbIterator for HeapFileIterator {
    fn open(&mut self) -> DbResult<()> {
        self.open = true;
        self.next_page = 0;
        self.current = None;
        self.buffered.clear();
        Ok(())
    }

    fn has_next(&mut self) -> DbResult<bool> {
        if !self.open {
            return Ok(false);
        }
        loop {
            if !self.buffered.is_empty() {
                return Ok(true);
            }
            self.leave_current()?;
            if self.next_page >= self.file.num_pages()? {
                return Ok(false);
            }
            let page_no = self.next_page;
            self.next_page += 1;
            self.load(page_no)?;
        }
    }

    fn next(&mut self) -> DbResult<Record> {
        if !self.open {
            return Err(DbError::IteratorNotOpen);
        }
        if !self.has_next()? {
            return Err(DbError::NoMoreTuples);
        }
        self.buffered.pop_front().ok_or(DbError::NoMoreTuples)
    }

    fn close(&mut self) -> DbResult<()> {
        self.buffered.clear();
        self.open = false;
        self.leave_current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ColumnDef, DataType};

    fn int_schema() -> TableSchema {
        TableSchema::new(vec![ColumnDef::new("id", DataType::Int, true)])
    }

    fn page_with(file: &HeapFile, pid: PageId, values: &[i32]) -> HeapPage {
        let mut page = HeapPage::new(
            pid,
            HeapPage::empty_data(file.page_size()),
            file.schema().record_size(),
        )
        .unwrap();
        let tid = TransactionId::new(1);
        for v in values {
            let bytes = Record::new(vec![crate::record::Value::Int(*v)])
                .encode(file.schema())
                .unwrap();
            page.insert_record(tid, &bytes).unwrap();
        }
        page
    }

    #[test]
    fn test_open_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("t.dat");
        let file = HeapFile::open(TableId::new(1), &path, int_schema(), 64).unwrap();

        assert!(path.exists());
        assert_eq!(file.num_pages().unwrap(), 0);
        assert_eq!(file.slots_per_page(), HeapPage::slot_capacity(64, 5));
    }

    #[test]
    fn test_open_rejects_oversized_record() {
        let dir = tempfile::tempdir().unwrap();
        let schema = TableSchema::new(vec![ColumnDef::new("s", DataType::Char(100), false)]);
        let result = HeapFile::open(TableId::new(1), dir.path().join("t.dat"), schema, 64);
        assert!(matches!(result, Err(DbError::Record(RecordError::InvalidRecord(_)))));
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = HeapFile::open(TableId::new(4), dir.path().join("t.dat"), int_schema(), 64).unwrap();

        let p0 = file.append_empty_page().unwrap();
        let p1 = file.append_empty_page().unwrap();
        assert_eq!(p1, PageId::new(TableId::new(4), 1));
        assert_eq!(file.num_pages().unwrap(), 2);

        let page = page_with(&file, p0, &[7, 8, 9]);
        file.write_page(&page).unwrap();
        let read_back = file.read_page(p0).unwrap();
        assert_eq!(read_back.data(), page.data());
        assert!(!read_back.is_dirty());

        let values: Vec<_> = file
            .decode_page(&read_back)
            .unwrap()
            .into_iter()
            .map(|r| (r.record_id().unwrap().slot, r.values()[0].clone()))
            .collect();
        assert_eq!(
            values,
            vec![
                (0, crate::record::Value::Int(7)),
                (1, crate::record::Value::Int(8)),
                (2, crate::record::Value::Int(9)),
            ]
        );
        // Writing never changes the length
        assert_eq!(file.num_pages().unwrap(), 2);
    }

    #[test]
    fn test_read_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let file = HeapFile::open(TableId::new(1), dir.path().join("t.dat"), int_schema(), 64).unwrap();
        file.append_empty_page().unwrap();

        let result = file.read_page(PageId::new(TableId::new(1), 1));
        assert!(matches!(
            result,
            Err(DbError::File(FileError::PageOutOfBounds { num_pages: 1, .. }))
        ));
    }

    #[test]
    fn test_write_beyond_end_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = HeapFile::open(TableId::new(1), dir.path().join("t.dat"), int_schema(), 64).unwrap();
        let page = page_with(&file, PageId::new(TableId::new(1), 0), &[1]);

        assert!(matches!(
            file.write_page(&page),
            Err(FileError::PageOutOfBounds { .. })
        ));
        assert_eq!(file.num_pages().unwrap(), 0);
    }

    #[test]
    fn test_foreign_page_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = HeapFile::open(TableId::new(1), dir.path().join("t.dat"), int_schema(), 64).unwrap();
        file.append_empty_page().unwrap();

        let result = file.read_page(PageId::new(TableId::new(2), 0));
        assert!(matches!(result, Err(DbError::File(FileError::WrongTable { .. }))));
    }

    #[test]
    fn test_misaligned_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.dat");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        let result = HeapFile::open(TableId::new(1), &path, int_schema(), 64);
        assert!(matches!(
            result,
            Err(DbError::File(FileError::MisalignedFile { len: 100, page_size: 64 }))
        ));
    }
}
