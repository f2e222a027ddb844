use std::fmt;

/// Identifier of a transaction, allocated monotonically by the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

/// Lifecycle of a transaction as seen by the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Acquiring locks, reading and writing pages
    Active,
    /// A lock wait was cancelled; the only legal next step is abort
    Doomed,
    /// Flushing its dirty pages
    Committing,
    /// Reverting its dirty pages to their before-images
    Aborting,
    /// Finished; no further operation is permitted
    Ended,
}

impl TransactionState {
    pub fn is_finishing(&self) -> bool {
        matches!(self, TransactionState::Committing | TransactionState::Aborting)
    }
}
