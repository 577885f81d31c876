//! Cooperative cancellation for receive loops.
//!
//! A [`CancelToken`] carries a single monotonic flag. Receive loops poll it
//! between frames only, so a cancellation never truncates a frame that is
//! already being decoded. Forced interruption of a blocked read is a separate
//! mechanism (see [`ConnectionHandler::dispose`](crate::ConnectionHandler::dispose)).
//!
//! # Example
//!
//! ```
//! use framewire::CancelToken;
//!
//! let root = CancelToken::new();
//! let per_loop = root.child();
//!
//! assert!(!per_loop.is_cancelled());
//! root.cancel();
//! assert!(per_loop.is_cancelled());
//! ```

use tokio_util::sync::CancellationToken;

/// Cooperative, monotonic cancellation signal.
///
/// Cheap to clone; all clones observe the same flag. Once cancelled a token
/// never reverts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    /// Create a new, not-yet-cancelled token.
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
        }
    }

    /// Create a child token.
    ///
    /// The child is cancelled when this token is cancelled. Cancelling the
    /// child does not affect the parent.
    pub fn child(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }

    /// Request cancellation. Calling this more than once has no further effect.
    #[inline]
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check whether cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_monotonic() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();

        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_child_follows_parent_only() {
        let parent = CancelToken::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();

        let task = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[test]
    fn test_cancel_from_other_thread() {
        let token = CancelToken::new();
        let remote = token.clone();

        std::thread::spawn(move || remote.cancel()).join().unwrap();

        assert!(token.is_cancelled());
    }
}
