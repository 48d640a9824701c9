//! Redpanda messaging adapter for the event consumer.
//!
//! This crate implements the [`MessagingAdapter`] trait from
//! `event-consumer-core` on top of rdkafka, so it works against Redpanda or
//! any other Kafka-compatible broker.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   records    ┌─────────────────┐   envelopes   ┌─────────────────┐
//! │   Redpanda   │─────────────►│ forwarding task │──────────────►│ ConsumerService │
//! └──────────────┘              │  decode + commit│  bounded mpsc └─────────────────┘
//!        ▲                      └─────────────────┘
//!        └──── commit after hand-off ────┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Offsets are committed AFTER the envelope is handed to the subscriber
//! - If the process stops before commit, the record is redelivered
//! - Redelivery reuses the record's operation id
//! - Ordering is preserved within a partition
//!
//! Undecodable records are committed too: they become delivery-error
//! envelopes, which the service reports and discards.
//!
//! # Example
//!
//! ```no_run
//! use event_consumer_core::{Context, MessagingAdapter};
//! use event_consumer_redpanda::RedpandaAdapter;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = RedpandaAdapter::builder()
//!     .brokers("localhost:9092")
//!     .topics(["operations"])
//!     .consumer_group("operations-consumer")
//!     .build()?;
//!
//! let ctx = Context::background();
//! let mut subscription = adapter.subscribe(&ctx).await?;
//! while let Some(envelope) = subscription.stream.next().await {
//!     println!("{:?}", envelope.operation_id());
//! }
//!
//! subscription.cancel.cancel();
//! adapter.close(&ctx).await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod codec;

pub use codec::decode;

use event_consumer_core::{
    CancelHandle, Context, DeliveryFailure, Envelope, MessagingAdapter, MessagingError,
    Subscription,
};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as _;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_AUTO_OFFSET_RESET: &str = "latest";
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_millis(6000);

/// Redpanda messaging adapter.
///
/// Every [`subscribe`](MessagingAdapter::subscribe) creates its own
/// `StreamConsumer` owned by a forwarding task. [`close`](MessagingAdapter::close)
/// stops every forwarding task and waits for them to release their consumers.
///
/// # Example
///
/// ```no_run
/// use event_consumer_redpanda::RedpandaAdapter;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let adapter = RedpandaAdapter::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .topics(["operations", "operations-retry"])
///     .consumer_group("operations-consumer")
///     .auto_offset_reset("earliest")
///     .session_timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaAdapter {
    brokers: String,
    topics: Vec<String>,
    consumer_group: String,
    buffer_size: usize,
    auto_offset_reset: String,
    session_timeout: Duration,
    /// Cancelled on the first `close`
    shutdown: (Context, CancelHandle),
    /// Forwarding tasks not yet awaited by `close`
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RedpandaAdapter {
    /// Create a new builder for configuring the adapter.
    #[must_use]
    pub fn builder() -> RedpandaAdapterBuilder {
        RedpandaAdapterBuilder::default()
    }

    /// Broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Subscribed topics.
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Consumer group id.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.1.is_cancelled()
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false") // Manual commit for at-least-once
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set(
                "session.timeout.ms",
                self.session_timeout.as_millis().to_string(),
            )
            .set("enable.partition.eof", "false");
        config
    }

    fn subscription_failed(&self, reason: String) -> MessagingError {
        MessagingError::SubscriptionFailed {
            topics: self.topics.clone(),
            reason,
        }
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a forwarding task so `close` awaits it.
    ///
    /// `close` cancels before draining the task list, so the flag is checked
    /// again under the lock. A task registered after the drain is aborted.
    fn track(&self, task: JoinHandle<()>) -> Result<(), MessagingError> {
        let mut tasks = self.tasks();
        if self.is_closed() {
            task.abort();
            return Err(MessagingError::Closed);
        }
        tasks.push(task);
        Ok(())
    }
}

impl std::fmt::Debug for RedpandaAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaAdapter")
            .field("brokers", &self.brokers)
            .field("topics", &self.topics)
            .field("consumer_group", &self.consumer_group)
            .field("buffer_size", &self.buffer_size)
            .field("auto_offset_reset", &self.auto_offset_reset)
            .field("session_timeout", &self.session_timeout)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a [`RedpandaAdapter`].
#[derive(Debug, Default)]
pub struct RedpandaAdapterBuilder {
    brokers: Option<String>,
    topics: Vec<String>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
}

impl RedpandaAdapterBuilder {
    /// Set the broker addresses.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Add topics to subscribe to.
    #[must_use]
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    /// Set the consumer group ID.
    ///
    /// If not set, the group is derived from the sorted topic names. Instances
    /// sharing a group share the partitions.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set how many decoded envelopes may wait between the Kafka consumer and
    /// the subscriber (default: 1000).
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set where a new consumer group starts reading when it has no
    /// committed offset:
    /// - `"earliest"`: Start from the beginning of the topic
    /// - `"latest"`: Start from the end (only new records)
    /// - `"error"`: Fail if no offset exists
    ///
    /// Default: `"latest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the consumer group session timeout (default: 6 seconds).
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaAdapter`].
    ///
    /// No connection is made here; the broker is first contacted by
    /// `subscribe`.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::ConnectionFailed`] if brokers are not set,
    /// and [`MessagingError::SubscriptionFailed`] if no topic is set or the
    /// buffer size is zero.
    pub fn build(self) -> Result<RedpandaAdapter, MessagingError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| MessagingError::ConnectionFailed("Brokers not configured".to_string()))?;

        let topics: Vec<String> = self
            .topics
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if topics.is_empty() {
            return Err(MessagingError::SubscriptionFailed {
                topics,
                reason: "No topics configured".to_string(),
            });
        }

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        if buffer_size == 0 {
            return Err(MessagingError::SubscriptionFailed {
                topics,
                reason: "buffer_size must be greater than 0".to_string(),
            });
        }

        let consumer_group = self.consumer_group.unwrap_or_else(|| {
            let mut sorted = topics.clone();
            sorted.sort();
            format!("event-consumer-{}", sorted.join("-"))
        });
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| DEFAULT_AUTO_OFFSET_RESET.to_string());
        let session_timeout = self.session_timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT);

        tracing::info!(
            brokers = %brokers,
            topics = ?topics,
            consumer_group = %consumer_group,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaAdapter created"
        );

        Ok(RedpandaAdapter {
            brokers,
            topics,
            consumer_group,
            buffer_size,
            auto_offset_reset,
            session_timeout,
            shutdown: Context::with_cancel(),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

impl MessagingAdapter for RedpandaAdapter {
    fn subscribe<'a>(
        &'a self,
        ctx: &'a Context,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, MessagingError>> + Send + 'a>> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(MessagingError::Closed);
            }

            let consumer: StreamConsumer = self
                .client_config()
                .create()
                .map_err(|e| self.subscription_failed(format!("Failed to create consumer: {e}")))?;

            let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| self.subscription_failed(format!("Failed to subscribe to topics: {e}")))?;

            tracing::info!(
                topics = ?self.topics,
                consumer_group = %self.consumer_group,
                buffer_size = self.buffer_size,
                manual_commit = true,
                "Subscribed to topics"
            );

            let (subscription_ctx, cancel) = ctx.child();
            let (tx, mut rx) = mpsc::channel(self.buffer_size);

            let task = tokio::spawn(forward(
                consumer,
                tx,
                subscription_ctx,
                self.shutdown.0.clone(),
            ));
            self.track(task)?;

            let stream = async_stream::stream! {
                while let Some(envelope) = rx.recv().await {
                    yield envelope;
                }
            };

            Ok(Subscription::new(Box::pin(stream), cancel))
        })
    }

    fn close<'a>(&'a self, _ctx: &'a Context) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if self.shutdown.1.is_cancelled() {
                tracing::debug!("RedpandaAdapter already closed");
                return;
            }
            self.shutdown.1.cancel();

            let tasks = std::mem::take(&mut *self.tasks());
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "Forwarding task ended abnormally");
                }
            }

            tracing::info!("RedpandaAdapter closed");
        })
    }
}

/// Owns one consumer: decodes each record, hands it off, then commits.
///
/// Ends when the subscription is cancelled, the adapter is closed or the
/// subscriber drops its stream.
async fn forward(
    consumer: StreamConsumer,
    tx: mpsc::Sender<Envelope>,
    ctx: Context,
    shutdown: Context,
) {
    let mut records = consumer.stream();

    loop {
        let received = tokio::select! {
            () = ctx.cancelled() => break,
            () = shutdown.cancelled() => break,
            received = records.next() => received,
        };
        let Some(received) = received else {
            break;
        };

        match received {
            Ok(record) => {
                let envelope = codec::decode(&record);
                tracing::trace!(
                    topic = record.topic(),
                    partition = record.partition(),
                    offset = record.offset(),
                    is_error = envelope.is_error(),
                    "Received record"
                );

                // Only commit AFTER the subscriber has the envelope
                let delivered = tokio::select! {
                    () = ctx.cancelled() => false,
                    () = shutdown.cancelled() => false,
                    sent = tx.send(envelope) => sent.is_ok(),
                };
                if !delivered {
                    tracing::debug!("Subscription ended before hand-off, exiting without commit");
                    break;
                }

                if let Err(e) = consumer.commit_message(&record, CommitMode::Async) {
                    tracing::warn!(
                        topic = record.topic(),
                        partition = record.partition(),
                        offset = record.offset(),
                        error = %e,
                        "Failed to commit offset (record may be redelivered)"
                    );
                }
            }
            Err(e) => {
                let failure = DeliveryFailure::new(MessagingError::TransportError(format!(
                    "Failed to receive message: {e}"
                )));
                if tx.send(failure.into()).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(records);
    consumer.unsubscribe();
    tracing::debug!("Forwarding task exiting");
}
