//! Deferred one-shot tasks used to purge anonymous sessions.
//!
//! Timers run on the ambient tokio runtime and sleep on the tokio clock, so
//! tests can pause time and advance it instead of waiting on the wall clock.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Owner of all outstanding expiry timers for one session store.
///
/// Timers are fire-and-forget: scheduling a second timer for the same key
/// does not cancel the first. Only [`ExpiryTimers::shutdown`] cancels them.
#[derive(Debug, Default)]
pub struct ExpiryTimers {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl ExpiryTimers {
    /// Create an empty timer set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once after `delay`.
    ///
    /// Returns `false` (and logs) when no tokio runtime is available or the
    /// timer set has already been shut down.
    pub fn schedule<F, Fut>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            tracing::debug!(name: "session.expiry.skipped", "Timer set is shut down");
            return false;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    name: "session.expiry.no_runtime",
                    error = %e,
                    "Cannot schedule session expiry outside a tokio runtime"
                );
                return false;
            }
        };

        let cancel = self.cancel.clone();
        self.tracker.spawn_on(
            async move {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(delay) => task().await,
                }
            },
            &handle,
        );
        true
    }

    /// Number of timers that have not fired yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel every outstanding timer and wait for them to wind down.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
