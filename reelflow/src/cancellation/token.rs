//! Cancellation token for cooperative cancellation.

use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    notify: Notify,
}

/// A token for cooperative cancellation.
///
/// Clones share state, so the caller keeps one handle and the orchestrator
/// hands others to stages. Cancellation is idempotent - only the first
/// cancellation reason is kept.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason and wakes every waiter of
    /// [`cancelled`](Self::cancelled).
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            debug!(reason = %reason, "Cancellation requested");
            // Reason is stored before waiters wake so they never read `None`.
            *self.inner.reason.write() = Some(reason);
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.read().clone()
    }

    /// Returns the reason or a generic placeholder.
    #[must_use]
    pub fn reason_or_default(&self) -> String {
        self.reason().unwrap_or_else(|| "cancellation requested".to_string())
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Drives `fut` to completion unless `token` is cancelled first.
///
/// Returns `Err(reason)` on cancellation; the future is dropped at that
/// point. A future that is already complete wins over a simultaneous
/// cancellation.
pub async fn run_cancellable<F>(token: &CancellationToken, fut: F) -> Result<F::Output, String>
where
    F: Future,
{
    if token.is_cancelled() {
        return Err(token.reason_or_default());
    }
    tokio::select! {
        biased;
        out = fut => Ok(out),
        () = token.cancelled() => Err(token.reason_or_default()),
    }
}

/// Sleeps for `delay` unless `token` is cancelled first.
pub async fn sleep_cancellable(token: &CancellationToken, delay: Duration) -> Result<(), String> {
    run_cancellable(token, tokio::time::sleep(delay)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel("First reason");
        token.cancel("Second reason");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let handle = token.clone();
        handle.cancel("from clone");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_returns_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel("done");
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
        assert_eq!(token.reason_or_default(), "done");
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::task::yield_now().await;
        token.cancel("stop");
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_cancellable_completes() {
        let token = CancellationToken::new();
        let out = run_cancellable(&token, async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_cancellable_interrupted() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel("shutdown");
        });

        let result = sleep_cancellable(&token, Duration::from_secs(3600)).await;
        assert_eq!(result, Err("shutdown".to_string()));
    }

    #[tokio::test]
    async fn test_run_cancellable_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel("early");
        let out = run_cancellable(&token, async { 1 }).await;
        assert_eq!(out, Err("early".to_string()));
    }
}
