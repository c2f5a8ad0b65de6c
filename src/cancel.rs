//! Cooperative cancellation shared between timing gates and request execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Cloneable cancellation flag.
///
/// All clones observe the same flag. Cancelling is idempotent and wakes
/// every task waiting in [`CancellationToken::cancelled`].
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

impl TokenInner {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();

        // Flag is set before the drain so a concurrent child_token() either
        // lands in this list or sees the flag.
        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        if !self.is_cancelled() {
            tracing::debug!("Cancellation requested");
        }
        self.inner.cancel();
    }

    /// Check whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Create a token that is cancelled together with this one.
    ///
    /// Cancelling the child does not affect the parent.
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        let mut children = self.inner.children.lock();
        if self.is_cancelled() {
            child.inner.cancelled.store(true, Ordering::SeqCst);
        } else {
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        // Enabled before the flag check so a concurrent cancel() is not missed.
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        // Second cancel is a no-op
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_child_follows_parent_only() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        child.cancel();
        assert!(!parent.is_cancelled());

        let other = parent.child_token();
        parent.cancel();
        assert!(other.is_cancelled());

        let late = parent.child_token();
        assert!(late.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("should not wait");
    }

    #[tokio::test]
    async fn test_cancelled_wakes_child_waiter() {
        let parent = CancellationToken::new();
        let token = parent.child_token();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::task::yield_now().await;
        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
