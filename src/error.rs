use thiserror::Error;

use crate::catalog::CatalogError;
use crate::file::FileError;
use crate::lock::LockError;
use crate::record::RecordError;
use crate::transaction::TransactionId;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Buffer pool exhausted: all {capacity} cached pages are dirty or locked")]
    StorageExhausted { capacity: usize },

    #[error("Transaction {0} must abort: an earlier lock wait was abandoned")]
    TransactionAborted(TransactionId),

    #[error("Transaction {0} has already ended")]
    TransactionEnded(TransactionId),

    #[error("Transaction {0} was never started")]
    UnknownTransaction(TransactionId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Iterator is not open")]
    IteratorNotOpen,

    #[error("Iterator is exhausted")]
    NoMoreTuples,
}

impl DbError {
    /// The transaction must run its abort path
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            DbError::Lock(LockError::Aborted { .. }) | DbError::TransactionAborted(_)
        )
    }
}

pub type DbResult<T> = Result<T, DbError>;
