//! Hierarchical cancellation tokens.
//!
//! Every blocking operation in this crate takes a [`CancellationToken`];
//! every long-running subsystem owns a token it derives from its parent so
//! that pool-level cancellation fans out to in-flight per-task tokens.
//!
//! # Example
//! ```
//! use regsync_core::cancellation::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let parent = CancellationToken::new();
//! let child = parent.child_token();
//!
//! parent.cancel("shutdown");
//! assert!(child.is_cancelled());
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::RwLock;
use tokio::sync::Notify;

/// A cooperative cancellation signal shareable across tasks.
///
/// Cloning shares the same underlying signal; [`child_token`] derives a
/// new token that is cancelled whenever its parent (or any ancestor) is
/// cancelled, but cancelling a child never cancels its parent.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: RwLock<Option<String>>,
    notify: Notify,
    parent: Option<CancellationToken>,
    children: RwLock<Vec<CancellationToken>>,
}

impl CancellationToken {
    /// Create a new, uncancelled, root token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: RwLock::new(None),
                notify: Notify::new(),
                parent: None,
                children: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Derive a child token. Cancelling `self` (or any of its ancestors)
    /// cancels the child; cancelling the child does not affect `self`.
    pub fn child_token(&self) -> Self {
        let child = Self {
            inner: Arc::new(Inner {
                cancelled: RwLock::new(None),
                notify: Notify::new(),
                parent: Some(self.clone()),
                children: RwLock::new(Vec::new()),
            }),
        };
        self.inner.children.write().push(child.clone());
        child
    }

    /// Cancel this token, recording `reason`, and cancel all children.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut cancelled = self.inner.cancelled.write();
            if cancelled.is_some() {
                return;
            }
            *cancelled = Some(reason.clone());
        }
        self.inner.notify.notify_waiters();
        for child in self.inner.children.read().iter() {
            child.cancel(reason.clone());
        }
    }

    /// True if this token or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.read().is_some() {
            return true;
        }
        match &self.inner.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }

    /// The recorded cancellation reason, if cancelled.
    pub fn reason(&self) -> Option<String> {
        if let Some(reason) = self.inner.cancelled.read().clone() {
            return Some(reason);
        }
        self.inner.parent.as_ref().and_then(|p| p.reason())
    }

    /// Resolve once this token (or an ancestor) is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// A future equivalent to [`cancelled`] that owns its token, for use
    /// in `tokio::select!` arms that need a `'static` future.
    pub fn cancelled_owned(self) -> Cancelled {
        Cancelled { token: self }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`CancellationToken::cancelled_owned`].
pub struct Cancelled {
    token: CancellationToken,
}

impl Future for Cancelled {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.token.is_cancelled() {
            return Poll::Ready(());
        }
        let notified = self.token.inner.notify.notified();
        tokio::pin!(notified);
        notified.poll(cx)
    }
}
