mod cancel;
mod error;
mod gate;
mod lock_manager;

pub use cancel::CancelToken;
pub use error::{AbortReason, LockError, LockResult};
pub use lock_manager::LockManager;

/// Kind of page lock a transaction holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Read lock; any number of transactions at once
    Shared,
    /// Write lock; excludes every other transaction
    Exclusive,
}
