//! Single-resolution future with multi-waiter support, per-wait timeouts,
//! cooperative cancellation, and an explicit reset-to-unresolved lifecycle.
//!
//! A plain oneshot future is not enough here: several independent callers
//! need to wait on the same milestone concurrently, each wait needs its own
//! timeout window, and a connection's lifecycle repeats, so the primitive
//! must be able to return to the unresolved state without being recreated -
//! long-lived holders keep references to the same instance across cycles.
//!
//! # Resolution semantics
//!
//! The first `resolve`/`fail` after creation or a `reset` wins; later calls
//! are treated as redundant signals from racing code paths, not as errors.
//! Every waiter registered before resolution receives a clone of the same
//! terminal result. `reset` fails all still-pending waiters with
//! [`EngineError::Cancelled`] and clears the stored result so the next
//! `wait` suspends again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{EngineError, Result};

struct CompleterState<T> {
    result: Option<Result<T>>,
    next_waiter_id: u64,
    waiters: HashMap<u64, oneshot::Sender<Result<T>>>,
}

/// A single-resolution result holder that many tasks can wait on.
///
/// Cloning is cheap and shares the underlying state.
pub struct Completer<T> {
    label: String,
    default_timeout: Duration,
    inner: Arc<Mutex<CompleterState<T>>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            default_timeout: self.default_timeout,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer").field("label", &self.label).finish()
    }
}

/// Removes the wait entry when the owning future is dropped, so an aborted
/// caller task never leaks a suspended sender.
struct WaiterGuard<T> {
    inner: Arc<Mutex<CompleterState<T>>>,
    id: u64,
}

impl<T> Drop for WaiterGuard<T> {
    fn drop(&mut self) {
        self.inner.lock().waiters.remove(&self.id);
    }
}

impl<T: Clone + Send + 'static> Completer<T> {
    pub fn new(label: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            label: label.into(),
            default_timeout,
            inner: Arc::new(Mutex::new(CompleterState {
                result: None,
                next_waiter_id: 0,
                waiters: HashMap::new(),
            })),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.lock().result.is_some()
    }

    /// Waits for resolution with the default timeout.
    pub async fn wait(&self) -> Result<T> {
        self.wait_inner(None, None).await
    }

    /// Waits for resolution with an explicit timeout.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        self.wait_inner(Some(timeout), None).await
    }

    /// Waits for resolution, bounded by `timeout` (default when `None`) and
    /// aborted with [`EngineError::Cancelled`] when `cancel` fires.
    pub async fn wait_with(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.wait_inner(timeout, Some(cancel)).await
    }

    async fn wait_inner(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<T> {
        let (id, rx) = {
            let mut state = self.inner.lock();
            // Already resolved: return immediately, registering no waiter
            // and starting no timer.
            if let Some(result) = &state.result {
                return result.clone();
            }
            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.insert(id, tx);
            (id, rx)
        };

        let _guard = WaiterGuard { inner: Arc::clone(&self.inner), id };
        let timeout = timeout.unwrap_or(self.default_timeout);
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        // Exactly one of these fires per call; the guard cleans up the
        // entry on the losing paths, and dropping the select arms cancels
        // the timer and the cancellation listener.
        tokio::select! {
            result = rx => match result {
                Ok(result) => result,
                // Sender dropped without a send: the completer itself was
                // dropped while we were pending.
                Err(_) => Err(EngineError::Cancelled),
            },
            _ = tokio::time::sleep(timeout) => {
                debug!(target: "roomlink.sync", label = %self.label, ?timeout, "wait timed out");
                Err(EngineError::timed_out(format!("{} after {:?}", self.label, timeout)))
            }
            _ = cancelled => Err(EngineError::Cancelled),
        }
    }

    /// Resolves with `value` unless a terminal result is already in effect.
    pub fn resolve(&self, value: T) {
        self.complete(Ok(value));
    }

    /// Fails with `error` unless a terminal result is already in effect.
    pub fn fail(&self, error: EngineError) {
        self.complete(Err(error));
    }

    fn complete(&self, result: Result<T>) {
        let waiters = {
            let mut state = self.inner.lock();
            if state.result.is_some() {
                debug!(target: "roomlink.sync", label = %self.label, "redundant completion ignored");
                return;
            }
            state.result = Some(result.clone());
            std::mem::take(&mut state.waiters)
        };
        for (_, tx) in waiters {
            let _ = tx.send(result.clone());
        }
    }

    /// Returns to the unresolved state, failing every still-pending waiter
    /// with [`EngineError::Cancelled`]. Completed waits are unaffected.
    pub fn reset(&self) {
        let waiters = {
            let mut state = self.inner.lock();
            state.result = None;
            std::mem::take(&mut state.waiters)
        };
        if !waiters.is_empty() {
            debug!(
                target: "roomlink.sync",
                label = %self.label,
                pending = waiters.len(),
                "reset cancelled pending waiters"
            );
        }
        for (_, tx) in waiters {
            let _ = tx.send(Err(EngineError::Cancelled));
        }
    }
}
