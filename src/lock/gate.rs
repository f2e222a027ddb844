use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::LockMode;
use super::cancel::CancelToken;
use super::error::AbortReason;

/// Fair shared/exclusive wait primitive for a single page.
///
/// Requests queue in arrival order and are granted only from the head of the
/// queue, so a waiting writer is never overtaken by later readers. Consecutive
/// shared requests at the head are granted together. The gate counts grants,
/// it does not know which transaction holds them; that is the holder set's job.
pub(crate) struct Gate {
    state: Mutex<GateState>,
    ready: Condvar,
}

#[derive(Default)]
struct GateState {
    shared: usize,
    exclusive: bool,
    queue: VecDeque<(u64, LockMode)>,
    next_ticket: u64,
}

impl GateState {
    fn grantable(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.exclusive,
            LockMode::Exclusive => !self.exclusive && self.shared == 0,
        }
    }

    fn at_head(&self, ticket: u64) -> bool {
        self.queue.front().is_some_and(|(t, _)| *t == ticket)
    }

    fn dequeue(&mut self, ticket: u64) {
        self.queue.retain(|(t, _)| *t != ticket);
    }
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            ready: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `mode` is granted, the token is cancelled, or `deadline` passes
    pub(crate) fn acquire(
        self: &Arc<Self>,
        mode: LockMode,
        token: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<(), AbortReason> {
        self.wait(mode, false, token, deadline)
    }

    /// Give back one shared grant and queue for exclusive in the same critical
    /// section. On failure the shared grant is not restored.
    pub(crate) fn upgrade(
        self: &Arc<Self>,
        token: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<(), AbortReason> {
        self.wait(LockMode::Exclusive, true, token, deadline)
    }

    fn wait(
        self: &Arc<Self>,
        mode: LockMode,
        release_shared: bool,
        token: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<(), AbortReason> {
        let _registration = token.register(Arc::clone(self));
        let mut state = self.state();

        if release_shared {
            state.shared = state.shared.saturating_sub(1);
        }
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back((ticket, mode));

        loop {
            if state.at_head(ticket) && state.grantable(mode) {
                state.queue.pop_front();
                match mode {
                    LockMode::Shared => state.shared += 1,
                    LockMode::Exclusive => state.exclusive = true,
                }
                // The next head may be a compatible shared request
                self.ready.notify_all();
                return Ok(());
            }

            if token.is_cancelled() {
                state.dequeue(ticket);
                self.ready.notify_all();
                return Err(AbortReason::Cancelled);
            }

            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.dequeue(ticket);
                        self.ready.notify_all();
                        return Err(AbortReason::TimedOut);
                    }
                    self.ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    pub(crate) fn release(&self, mode: LockMode) {
        let mut state = self.state();
        match mode {
            LockMode::Shared => state.shared = state.shared.saturating_sub(1),
            LockMode::Exclusive => state.exclusive = false,
        }
        self.ready.notify_all();
    }

    /// Wake every waiter so it re-checks its cancel token
    pub(crate) fn wake_all(&self) {
        let _state = self.state();
        self.ready.notify_all();
    }

    /// No grants outstanding and nobody queued
    pub(crate) fn is_idle(&self) -> bool {
        let state = self.state();
        state.shared == 0 && !state.exclusive && state.queue.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.state().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_shared_grants_coexist() {
        let gate = Arc::new(Gate::new());
        let token = CancelToken::new();
        gate.acquire(LockMode::Shared, &token, None).unwrap();
        gate.acquire(LockMode::Shared, &token, None).unwrap();
        assert!(!gate.is_idle());

        gate.release(LockMode::Shared);
        gate.release(LockMode::Shared);
        assert!(gate.is_idle());
    }

    #[test]
    fn test_exclusive_times_out_behind_shared() {
        let gate = Arc::new(Gate::new());
        let token = CancelToken::new();
        gate.acquire(LockMode::Shared, &token, None).unwrap();

        let deadline = Some(Instant::now() + Duration::from_millis(30));
        let result = gate.acquire(LockMode::Exclusive, &token, deadline);
        assert_eq!(result, Err(AbortReason::TimedOut));

        // The abandoned request left no trace in the queue
        gate.release(LockMode::Shared);
        assert!(gate.is_idle());
    }

    #[test]
    fn test_upgrade_sole_reader_does_not_block() {
        let gate = Arc::new(Gate::new());
        let token = CancelToken::new();
        gate.acquire(LockMode::Shared, &token, None).unwrap();
        gate.upgrade(&token, Some(Instant::now())).unwrap();

        gate.release(LockMode::Exclusive);
        assert!(gate.is_idle());
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let gate = Arc::new(Gate::new());
        let holder = CancelToken::new();
        gate.acquire(LockMode::Exclusive, &holder, None).unwrap();

        let waiter = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        let handle = {
            let gate = Arc::clone(&gate);
            let waiter = waiter.clone();
            thread::spawn(move || {
                tx.send(gate.acquire(LockMode::Shared, &waiter, None)).unwrap();
            })
        };

        while gate.queued() == 0 {
            thread::yield_now();
        }
        assert!(rx.try_recv().is_err());
        waiter.cancel();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(AbortReason::Cancelled)
        );
        handle.join().unwrap();

        gate.release(LockMode::Exclusive);
        assert!(gate.is_idle());
    }

    #[test]
    fn test_waiting_writer_blocks_later_reader() {
        let gate = Arc::new(Gate::new());
        let token = CancelToken::new();
        gate.acquire(LockMode::Shared, &token, None).unwrap();

        let writer = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.acquire(LockMode::Exclusive, &CancelToken::new(), None)
                    .unwrap();
                gate.release(LockMode::Exclusive);
            })
        };
        while gate.queued() == 0 {
            thread::yield_now();
        }

        // A reader arriving after the queued writer must wait behind it
        let deadline = Some(Instant::now() + Duration::from_millis(30));
        assert_eq!(
            gate.acquire(LockMode::Shared, &token, deadline),
            Err(AbortReason::TimedOut)
        );

        gate.release(LockMode::Shared);
        writer.join().unwrap();
        gate.acquire(LockMode::Shared, &token, None).unwrap();
    }
}
