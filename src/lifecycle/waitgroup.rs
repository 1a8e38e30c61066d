//! Wait-group for in-flight requests that refuses new work once draining.
//!
//! # Responsibilities
//! - Count requests currently inside the handler chain
//! - Reject `add` after `wait` has been called
//! - Wake the drainer when the count reaches zero
//!
//! # Design Decisions
//! - RAII guard: dropping it (including during unwind) releases the slot
//! - Mutex-protected state plus `Notify`, so `add` and `wait` never race

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum WaitGroupError {
    #[error("wait group is draining, no new requests are accepted")]
    ShuttingDown,
}

#[derive(Debug, Default)]
struct State {
    count: usize,
    waiting: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    drained: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared counter of in-flight requests.
#[derive(Debug, Clone, Default)]
pub struct SafeWaitGroup {
    inner: Arc<Inner>,
}

impl SafeWaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one in-flight request.
    pub fn add(&self) -> Result<InFlightGuard, WaitGroupError> {
        let mut state = self.inner.lock();
        if state.waiting {
            return Err(WaitGroupError::ShuttingDown);
        }
        state.count += 1;
        Ok(InFlightGuard {
            inner: self.inner.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_draining(&self) -> bool {
        self.inner.lock().waiting
    }

    /// Stop accepting new requests and wait for the count to reach zero.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.inner.lock();
                state.waiting = true;
                if state.count == 0 {
                    return;
                }
            }
            notified.await;
        }
    }
}

/// Releases its wait-group slot on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    inner: Arc<Inner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.count = state.count.saturating_sub(1);
        if state.count == 0 {
            self.inner.drained.notify_waiters();
        }
    }
}
