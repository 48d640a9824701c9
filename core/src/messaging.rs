//! Messaging adapter abstraction.
//!
//! This module provides the [`MessagingAdapter`] trait the consumer subscribes
//! through. An adapter owns the broker connection, consumer-group and
//! checkpoint mechanics; the consumer only sees a stream of [`Envelope`]s and a
//! handle to cancel it.
//!
//! # Lifecycle
//!
//! ```text
//!   subscribe(ctx) ──► Subscription { stream, cancel }
//!                              │
//!        envelopes ◄───────────┘
//!                              │
//!   cancel.cancel() ───────────┤  stream ends
//!   close(ctx) ────────────────┘  adapter released (idempotent)
//! ```
//!
//! # Implementations
//!
//! - `RedpandaAdapter` (crate `event-consumer-redpanda`) - Kafka-compatible brokers
//! - `InMemoryAdapter` (crate `event-consumer-testing`) - For testing
//!
//! # Example
//!
//! ```rust,ignore
//! use event_consumer_core::{Context, Envelope, MessagingAdapter};
//! use futures::StreamExt;
//!
//! async fn drain(adapter: &dyn MessagingAdapter) -> Result<(), MessagingError> {
//!     let (ctx, _cancel) = Context::with_cancel();
//!     let mut subscription = adapter.subscribe(&ctx).await?;
//!
//!     while let Some(envelope) = subscription.stream.next().await {
//!         match envelope {
//!             Envelope::Message(message) => println!("{}: {}", message.status, message.command),
//!             Envelope::DeliveryError(failure) => eprintln!("{}", failure.error),
//!         }
//!     }
//!
//!     subscription.cancel.cancel();
//!     adapter.close(&ctx).await;
//!     Ok(())
//! }
//! ```

use crate::context::{CancelHandle, Context};
use crate::envelope::Envelope;
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during messaging operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to decode a message
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The adapter was closed
    #[error("Messaging adapter closed")]
    Closed,

    /// Generic error for other failures
    #[error("Messaging error: {0}")]
    Other(String),
}

/// Stream of envelopes from a subscription.
///
/// The stream ends when the subscription is cancelled or the adapter is closed.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Envelope> + Send>>;

/// An open subscription.
///
/// The owner drains `stream` and calls `cancel.cancel()` to tear it down.
pub struct Subscription {
    /// Envelopes in delivery order
    pub stream: EnvelopeStream,
    /// Cancels the subscription's context
    pub cancel: CancelHandle,
}

impl Subscription {
    /// Bundle a stream with the handle that cancels it.
    #[must_use]
    pub fn new(stream: EnvelopeStream, cancel: CancelHandle) -> Self {
        Self { stream, cancel }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Trait for messaging adapter implementations.
///
/// # Contract
///
/// - `subscribe` derives a child of `ctx` for the subscription. The returned
///   stream ends once that child, or `ctx` itself, is cancelled.
/// - `close` releases the adapter. It should tolerate being called more than
///   once, although the consumer guards its own close path and never relies
///   on that.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
/// adapter can be held as `Arc<dyn MessagingAdapter>`.
pub trait MessagingAdapter: Send + Sync {
    /// Open a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError`] if the subscription cannot be established
    /// (broker unreachable, unknown topic, rejected credentials, ...).
    fn subscribe<'a>(
        &'a self,
        ctx: &'a Context,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, MessagingError>> + Send + 'a>>;

    /// Release the adapter and every subscription it created.
    fn close<'a>(&'a self, ctx: &'a Context) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}
