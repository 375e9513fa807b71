//! Cancellation contexts.
//!
//! A [`Context`] is shared by every operation of a generation. It ends either when it is
//! canceled (explicitly or through one of its parents) or when its deadline expires.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`Context`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Done {
    /// The context, or one of its parents, has been canceled.
    Canceled,
    /// The deadline of the context has expired.
    DeadlineExceeded,
}

/// A cancellation token with an optional deadline.
///
/// Cloning a `Context` gives another handle to the same context.
/// Use [`child`](Self::child) to derive a context that can be canceled independently.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Creates a new context, without deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context that ends when `token` is canceled.
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token, deadline: None }
    }

    /// Derives a child context.
    ///
    /// Canceling the child does not cancel `self`, but canceling `self` cancels the child.
    /// The child has the same deadline as its parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derives a child context that expires after `timeout`.
    ///
    /// If the parent expires first, the child keeps the deadline of the parent.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancels this context and all its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the deadline of this context, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns `None` while the context is live, or the reason why it ended.
    ///
    /// If the context has been canceled after its deadline, `Canceled` is reported.
    pub fn err(&self) -> Option<Done> {
        if self.token.is_cancelled() {
            Some(Done::Canceled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Done::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Returns `true` if the context has ended.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Waits until the context ends, and returns the reason.
    pub async fn done(&self) -> Done {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => Done::Canceled,
                    _ = tokio::time::sleep_until(deadline) => {
                        // the token may have been canceled at the same time
                        self.err().unwrap_or(Done::DeadlineExceeded)
                    }
                }
            }
            None => {
                self.token.cancelled().await;
                Done::Canceled
            }
        }
    }
}

impl std::fmt::Display for Done {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Done::Canceled => f.write_str("context canceled"),
            Done::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

impl std::error::Error for Done {}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Context, Done};

    #[tokio::test]
    async fn cancel_propagates_to_children_only() {
        let parent = Context::new();
        let child = parent.child();
        let grandchild = child.child();

        child.cancel();
        assert_eq!(parent.err(), None);
        assert_eq!(child.err(), Some(Done::Canceled));
        assert_eq!(grandchild.done().await, Done::Canceled);

        let other = parent.child();
        parent.cancel();
        assert_eq!(other.done().await, Done::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline() {
        let ctx = Context::new().with_timeout(Duration::from_secs(5));
        assert!(!ctx.is_done());
        assert_eq!(ctx.done().await, Done::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(Done::DeadlineExceeded));

        // the child inherits the deadline
        let child = ctx.child();
        assert_eq!(child.err(), Some(Done::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_deadline_wins() {
        let parent = Context::new().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn canceled_is_reported_first() {
        let ctx = Context::new().with_timeout(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel();
        assert_eq!(ctx.err(), Some(Done::Canceled));
    }
}
