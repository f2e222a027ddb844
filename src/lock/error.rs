use std::fmt;
use thiserror::Error;

use crate::file::PageId;
use crate::transaction::TransactionId;

/// Why a blocked lock wait was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The transaction's cancel token was signalled
    Cancelled,
    /// The wait outlived the configured lock timeout
    TimedOut,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => write!(f, "cancelled"),
            AbortReason::TimedOut => write!(f, "lock wait timed out"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Transaction {tid} must abort: {reason} on page {page}")]
    Aborted {
        tid: TransactionId,
        page: PageId,
        reason: AbortReason,
    },

    #[error("Transaction {tid} holds no lock on page {page}")]
    NotHeld { tid: TransactionId, page: PageId },
}

pub type LockResult<T> = Result<T, LockError>;
