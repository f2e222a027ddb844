use std::io;
use thiserror::Error;

use super::PageId;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Page {page} is out of bounds: file has {num_pages} pages")]
    PageOutOfBounds { page: PageId, num_pages: usize },

    #[error("Short read on page {page}: expected {expected} bytes, got {actual}")]
    ShortRead {
        page: PageId,
        expected: usize,
        actual: usize,
    },

    #[error("File length {len} is not a multiple of page size {page_size}")]
    MisalignedFile { len: u64, page_size: usize },

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Page {page} does not belong to table {table}")]
    WrongTable { page: PageId, table: u32 },
}

pub type FileResult<T> = Result<T, FileError>;
