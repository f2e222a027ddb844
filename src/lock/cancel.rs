use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::gate::Gate;

/// Cancellation handle shared between a transaction and whoever may need to
/// abort it (a timeout watchdog, a deadlock resolver).
///
/// Cancelling wakes the gate the transaction is currently blocked on, if any;
/// the blocked `acquire` then returns an abort error without granting the lock.
/// Once cancelled a token stays cancelled.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    waiting_on: Mutex<Option<Arc<Gate>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        // Clone out so the gate is woken without holding our own mutex
        let gate = self
            .inner
            .waiting_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            gate.wake_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Record the gate we are about to block on. Must be called before the
    /// gate's own mutex is taken.
    pub(super) fn register(&self, gate: Arc<Gate>) -> Registration<'_> {
        *self
            .inner
            .waiting_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(gate);
        Registration { token: self }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Clears the registered gate when the wait ends
pub(super) struct Registration<'a> {
    token: &'a CancelToken,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        *self
            .token
            .inner
            .waiting_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}
