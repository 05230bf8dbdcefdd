//! Cooperative cancellation shared by a session and everything it spawns.
//!
//! The flag lives behind a mutex so that a side effect (emitting a token,
//! appending to history) can be performed atomically with the check: once
//! [`CancelFlag::cancel`] returns, no guarded side effect will run again.
//! A [`CancellationToken`] mirrors the flag so async waits can be woken.

use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    token: CancellationToken,
}

/// A cloneable handle to one session's cancellation state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<Inner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let mut cancelled = self.lock();
        *cancelled = true;
        self.inner.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.lock()
    }

    /// Run `effect` only if cancellation has not been observed, holding the
    /// lock for its duration. Returns `None` when cancelled.
    pub fn guard<T>(&self, effect: impl FnOnce() -> T) -> Option<T> {
        let cancelled = self.lock();
        if *cancelled {
            return None;
        }
        let out = effect();
        drop(cancelled);
        Some(out)
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        // A poisoned flag still holds a meaningful bool.
        self.inner
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
