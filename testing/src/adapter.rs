//! In-memory messaging adapter.

use crate::lock;
use event_consumer_core::{
    CancelHandle, Context, Envelope, MessagingAdapter, MessagingError, Subscription,
};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// In-memory messaging adapter for fast, deterministic tests.
///
/// Envelopes published before anyone subscribes are kept in a backlog and
/// handed to the first subscriber, the way a broker retains messages for a
/// consumer group that has not connected yet.
///
/// Every interaction is counted so tests can assert on the consumer's
/// resource handling:
///
/// - [`subscribe_count`](Self::subscribe_count)
/// - [`close_count`](Self::close_count)
/// - [`subscription_cancelled`](Self::subscription_cancelled)
///
/// # Example
///
/// ```
/// use event_consumer_testing::InMemoryAdapter;
/// use event_consumer_core::{Context, Message, MessagingAdapter};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let adapter = InMemoryAdapter::new();
/// adapter.publish(Message::new("op-1", "ok", "process"));
///
/// let ctx = Context::background();
/// let subscription = adapter.subscribe(&ctx).await?;
/// subscription.cancel.cancel();
/// adapter.close(&ctx).await;
///
/// assert!(adapter.subscription_cancelled());
/// assert_eq!(adapter.close_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct InMemoryAdapter {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Envelope>>>,
    backlog: Mutex<VecDeque<Envelope>>,
    subscribe_failure: Mutex<Option<MessagingError>>,
    cancels: Mutex<Vec<CancelHandle>>,
    subscribed: watch::Sender<usize>,
    subscribe_calls: AtomicUsize,
    close_calls: AtomicUsize,
    closes_finished: AtomicUsize,
    close_delay: Mutex<Duration>,
    /// Cancelled on the first `close`
    closed: (Context, CancelHandle),
}

impl InMemoryAdapter {
    /// Create a new adapter with an empty backlog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            backlog: Mutex::new(VecDeque::new()),
            subscribe_failure: Mutex::new(None),
            cancels: Mutex::new(Vec::new()),
            subscribed: watch::Sender::new(0),
            subscribe_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            closes_finished: AtomicUsize::new(0),
            close_delay: Mutex::new(Duration::ZERO),
            closed: Context::with_cancel(),
        }
    }

    /// Create an adapter whose next `subscribe` fails with `error`.
    #[must_use]
    pub fn failing(error: MessagingError) -> Self {
        let adapter = Self::new();
        adapter.fail_next_subscribe(error);
        adapter
    }

    /// Make every `close` take `delay` to finish after it has ended the open
    /// streams, like a broker client flushing commits on shutdown.
    pub fn delay_close(&self, delay: Duration) {
        *lock(&self.close_delay) = delay;
    }

    /// Make the next `subscribe` call fail with `error`.
    pub fn fail_next_subscribe(&self, error: MessagingError) {
        *lock(&self.subscribe_failure) = Some(error);
    }

    /// Deliver an envelope to every live subscriber, or queue it in the
    /// backlog when there is none.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, envelope: impl Into<Envelope>) -> usize {
        let envelope = envelope.into();
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| !tx.is_closed());

        if subscribers.is_empty() {
            lock(&self.backlog).push_back(envelope);
            return 0;
        }

        subscribers
            .iter()
            .filter(|tx| tx.send(envelope.clone()).is_ok())
            .count()
    }

    /// Wait until at least `count` subscriptions have been opened.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> bool {
        let mut rx = self.subscribed.subscribe();
        tokio::time::timeout(timeout, async move {
            let _ = rx.wait_for(|opened| *opened >= count).await;
        })
        .await
        .is_ok()
    }

    /// Number of `subscribe` calls, successful or not.
    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of `close` calls.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Number of `close` calls that have run to completion.
    #[must_use]
    pub fn closes_finished(&self) -> usize {
        self.closes_finished.load(Ordering::SeqCst)
    }

    /// Whether at least one subscription was opened and every opened
    /// subscription has been cancelled through its handle.
    #[must_use]
    pub fn subscription_cancelled(&self) -> bool {
        let cancels = lock(&self.cancels);
        !cancels.is_empty() && cancels.iter().all(CancelHandle::is_cancelled)
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.1.is_cancelled()
    }

    /// End every open stream once its pending envelopes are drained, as a
    /// broker would after a rebalance revokes the consumer.
    pub fn end_streams(&self) {
        lock(&self.subscribers).clear();
    }
}

impl Default for InMemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagingAdapter for InMemoryAdapter {
    fn subscribe<'a>(
        &'a self,
        ctx: &'a Context,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, MessagingError>> + Send + 'a>> {
        Box::pin(async move {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

            if let Some(error) = lock(&self.subscribe_failure).take() {
                return Err(error);
            }
            if self.is_closed() {
                return Err(MessagingError::Closed);
            }

            let (subscription_ctx, cancel) = ctx.child();
            let closed = self.closed.0.clone();
            let (tx, mut rx) = mpsc::unbounded_channel();

            {
                let mut subscribers = lock(&self.subscribers);
                for envelope in lock(&self.backlog).drain(..) {
                    let _ = tx.send(envelope);
                }
                subscribers.push(tx);
            }
            lock(&self.cancels).push(cancel.clone());
            self.subscribed.send_modify(|opened| *opened += 1);

            let stream = async_stream::stream! {
                loop {
                    let next = tokio::select! {
                        biased;
                        () = subscription_ctx.cancelled() => None,
                        () = closed.cancelled() => None,
                        next = rx.recv() => next,
                    };
                    match next {
                        Some(envelope) => yield envelope,
                        None => break,
                    }
                }
            };

            Ok(Subscription::new(Box::pin(stream), cancel))
        })
    }

    fn close<'a>(&'a self, _ctx: &'a Context) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.1.cancel();
            lock(&self.subscribers).clear();

            let delay = *lock(&self.close_delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.closes_finished.fetch_add(1, Ordering::SeqCst);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_consumer_core::{DeliveryFailure, Message};
    use futures::StreamExt;

    #[tokio::test]
    async fn backlog_is_delivered_in_order_to_first_subscriber() {
        let adapter = InMemoryAdapter::new();
        adapter.publish(Message::new("op-1", "ok", "first"));
        adapter.publish(Message::new("op-2", "ok", "second"));

        let ctx = Context::background();
        let mut subscription = adapter.subscribe(&ctx).await.unwrap();

        let first = subscription.stream.next().await.unwrap();
        let second = subscription.stream.next().await.unwrap();
        assert_eq!(first.operation_id().unwrap().as_str(), "op-1");
        assert_eq!(second.operation_id().unwrap().as_str(), "op-2");
    }

    #[tokio::test]
    async fn publish_reaches_live_subscriber() {
        let adapter = InMemoryAdapter::new();
        let ctx = Context::background();
        let mut subscription = adapter.subscribe(&ctx).await.unwrap();

        let delivered = adapter.publish(DeliveryFailure::new(MessagingError::DeserializationFailed(
            "decode failed".to_string(),
        )));
        assert_eq!(delivered, 1);

        let envelope = subscription.stream.next().await.unwrap();
        assert!(envelope.is_error());
    }

    #[tokio::test]
    async fn failing_subscribe_is_one_shot() {
        let adapter = InMemoryAdapter::failing(MessagingError::ConnectionFailed(
            "broker unreachable".to_string(),
        ));
        let ctx = Context::background();

        let first = adapter.subscribe(&ctx).await;
        assert!(matches!(first, Err(MessagingError::ConnectionFailed(_))));

        let second = adapter.subscribe(&ctx).await;
        assert!(second.is_ok());
        assert_eq!(adapter.subscribe_count(), 2);
    }

    #[tokio::test]
    async fn cancel_ends_stream() {
        let adapter = InMemoryAdapter::new();
        let ctx = Context::background();
        let mut subscription = adapter.subscribe(&ctx).await.unwrap();

        subscription.cancel.cancel();

        assert!(subscription.stream.next().await.is_none());
        assert!(adapter.subscription_cancelled());
    }

    #[tokio::test]
    async fn parent_cancel_ends_stream_without_cancelling_handle() {
        let adapter = InMemoryAdapter::new();
        let (ctx, cancel) = Context::with_cancel();
        let mut subscription = adapter.subscribe(&ctx).await.unwrap();

        cancel.cancel();

        assert!(subscription.stream.next().await.is_none());
        assert!(!adapter.subscription_cancelled());
    }

    #[tokio::test]
    async fn close_ends_stream_and_counts_every_call() {
        let adapter = InMemoryAdapter::new();
        let ctx = Context::background();
        let mut subscription = adapter.subscribe(&ctx).await.unwrap();

        adapter.close(&ctx).await;
        adapter.close(&ctx).await;

        assert!(subscription.stream.next().await.is_none());
        assert_eq!(adapter.close_count(), 2);
        assert!(matches!(adapter.subscribe(&ctx).await, Err(MessagingError::Closed)));
    }

    #[tokio::test]
    async fn delayed_close_ends_streams_before_finishing() {
        let adapter = InMemoryAdapter::new();
        adapter.delay_close(Duration::from_millis(100));
        let ctx = Context::background();
        let mut subscription = adapter.subscribe(&ctx).await.unwrap();

        let mut close = adapter.close(&ctx);
        assert!(futures::poll!(close.as_mut()).is_pending());
        assert!(subscription.stream.next().await.is_none());
        assert_eq!(adapter.closes_finished(), 0);

        close.await;
        assert_eq!(adapter.closes_finished(), 1);
    }

    #[tokio::test]
    async fn end_streams_drains_then_ends() {
        let adapter = InMemoryAdapter::new();
        let ctx = Context::background();
        let mut subscription = adapter.subscribe(&ctx).await.unwrap();

        adapter.publish(Message::new("op-1", "ok", "last"));
        adapter.end_streams();

        assert!(subscription.stream.next().await.is_some());
        assert!(subscription.stream.next().await.is_none());
        assert!(!adapter.is_closed());
    }

    #[tokio::test]
    async fn wait_for_subscribers_times_out_without_subscription() {
        let adapter = InMemoryAdapter::new();
        assert!(!adapter.wait_for_subscribers(1, Duration::from_millis(20)).await);

        let _subscription = adapter.subscribe(&Context::background()).await.unwrap();
        assert!(adapter.wait_for_subscribers(1, Duration::from_millis(20)).await);
    }
}
