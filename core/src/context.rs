//! Cancellable execution contexts.
//!
//! A [`Context`] is a cheap, cloneable view of a chain of cancellation flags.
//! Deriving a child with [`Context::child`] appends a new flag to the chain, so
//! the child observes its own cancellation and every ancestor's, while
//! cancelling the child leaves the parent untouched.
//!
//! ```text
//! root ──► child ──► grandchild
//!  │         │           │
//!  └─ cancel propagates ─┘   (never upwards)
//! ```
//!
//! # Example
//!
//! ```
//! use event_consumer_core::context::Context;
//!
//! let (root, root_cancel) = Context::with_cancel();
//! let (subscription, _subscription_cancel) = root.child();
//!
//! root_cancel.cancel();
//! assert!(subscription.is_cancelled());
//! ```

use futures::future;
use std::sync::Arc;
use tokio::sync::watch;

/// The cancelling side of a [`Context`].
///
/// Cancellation is idempotent: calling [`cancel`](Self::cancel) more than once
/// has no additional effect. Clones share the same flag.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Cancel the associated context and every context derived from it.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A cancellable execution context.
///
/// Contexts carry no values, only cancellation. Correlation ids travel as
/// explicit parameters alongside the telemetry calls that need them.
#[derive(Clone, Debug, Default)]
pub struct Context {
    /// Cancellation flags, root first.
    chain: Vec<watch::Receiver<bool>>,
}

impl Context {
    /// A root context that is never cancelled.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A root context together with the handle that cancels it.
    #[must_use]
    pub fn with_cancel() -> (Self, CancelHandle) {
        Self::background().child()
    }

    /// Derive a child context.
    ///
    /// The child is cancelled when the returned handle or any ancestor's
    /// handle is cancelled.
    #[must_use]
    pub fn child(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut chain = self.chain.clone();
        chain.push(rx);

        (Self { chain }, CancelHandle { tx: Arc::new(tx) })
    }

    /// Whether this context or any ancestor has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.chain.iter().any(|rx| *rx.borrow())
    }

    /// Completes once this context is cancelled.
    ///
    /// If every handle in the chain is dropped without cancelling, the context
    /// can no longer be cancelled and this future never completes.
    pub async fn cancelled(&self) {
        if self.chain.is_empty() {
            return future::pending().await;
        }

        let waits = self.chain.iter().cloned().map(|mut rx| {
            Box::pin(async move {
                let abandoned = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if abandoned {
                    future::pending::<()>().await;
                }
            })
        });

        future::select_all(waits).await;
    }
}
