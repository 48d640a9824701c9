//! The event consumption service.
//!
//! # Overview
//!
//! [`ConsumerService`] owns one subscription and runs a single cooperative
//! loop over three event sources:
//!
//! ```text
//!                 ┌──────────────────────────┐
//!   envelopes ───►│                          │──► classify ──► Telemetry
//!   ctx done  ───►│   ConsumerService::start │
//!   signals   ───►│                          │──► cancel subscription
//!                 └──────────────────────────┘    close adapter (once)
//! ```
//!
//! Exactly one event is handled per iteration. Per-message failures are
//! reported and skipped; only a subscribe failure is returned to the caller.
//!
//! # Lifecycle
//!
//! `Created` → `Subscribed` → `Terminating` → `Stopped`. A failed subscribe
//! goes straight from `Created` to `Stopped`.
//!
//! # Shutdown
//!
//! Context cancellation, a termination signal, [`stop`](ConsumerService::stop)
//! and the end of the envelope stream all run the same teardown. The adapter
//! is closed through a close-once cell owned by the service: racing shutdown
//! paths release it exactly once, and the path that loses waits for the
//! close in flight to finish.
//!
//! Adapters end the envelope stream when the context they subscribed with is
//! cancelled, so the end of the stream is attributed to the context or to
//! `stop` whenever either has already fired.

use crate::classify::classify;
use crate::error::ServiceError;
use crate::metrics::{LIFECYCLE_STATE, MESSAGES_FAILED, MESSAGES_PROCESSED, SHUTDOWNS, SUBSCRIBE_FAILURES};
use crate::signal::TerminationSignal;
use event_consumer_core::{
    CancelHandle, Context, Envelope, EnvelopeStream, MessagingAdapter, Severity, Subscription,
    Telemetry, TelemetryEvent,
};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{OnceCell, broadcast, watch};

/// Trace emitted by [`ConsumerService::initialize`].
pub const INITIALIZING: &str = "Initializing service logic";
/// Trace emitted once the subscription is open.
pub const SUBSCRIBED: &str = "Subscribed to events";
/// Critical exception emitted when the subscription cannot be opened.
pub const SUBSCRIBE_FAILED: &str = "Failed to subscribe to events";
/// Trace emitted by [`ConsumerService::stop`].
pub const STOPPING: &str = "Stopping service";

const UNCLAIMED: u8 = 0;
const CLAIMED_BY_START: u8 = 1;
const CLAIMED_BY_STOP: u8 = 2;

/// Service lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Constructed, not yet subscribed
    Created,
    /// Subscription open, loop running
    Subscribed,
    /// A termination trigger fired, teardown in progress
    Terminating,
    /// Teardown complete or subscribe failed
    Stopped,
}

impl Lifecycle {
    const fn gauge_value(self) -> f64 {
        match self {
            Self::Created => 0.0,
            Self::Subscribed => 1.0,
            Self::Terminating => 2.0,
            Self::Stopped => 3.0,
        }
    }
}

/// What ended the event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The caller's context was cancelled
    ContextCancelled,
    /// A termination signal arrived
    Signal(TerminationSignal),
    /// [`ConsumerService::stop`] was called
    StopRequested,
    /// The adapter ended the envelope stream
    StreamEnded,
}

impl ShutdownCause {
    /// The shutdown trace text.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ContextCancelled => "Context canceled. Stopping event listener.",
            Self::Signal(_) => "Received termination signal",
            Self::StopRequested => "Stop requested. Stopping event listener.",
            Self::StreamEnded => "Message stream ended. Stopping event listener.",
        }
    }

    /// Metric and property label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ContextCancelled => "context_cancelled",
            Self::Signal(_) => "signal",
            Self::StopRequested => "stop_requested",
            Self::StreamEnded => "stream_ended",
        }
    }
}

/// Consumes one subscription and reports every envelope as telemetry.
///
/// Share it behind an `Arc`: [`start`](Self::start) runs as a background task
/// while the entrypoint keeps a handle for [`stop`](Self::stop).
///
/// # Example
///
/// ```ignore
/// let service = Arc::new(ConsumerService::initialize(adapter, telemetry));
///
/// let task = tokio::spawn({
///     let service = Arc::clone(&service);
///     let signals = signals.subscribe();
///     async move { service.start(&ctx, signals).await }
/// });
///
/// // later, from the entrypoint
/// service.stop(&Context::background()).await;
/// task.await??;
/// ```
pub struct ConsumerService {
    adapter: Arc<dyn MessagingAdapter>,
    telemetry: Arc<dyn Telemetry>,
    lifecycle: watch::Sender<Lifecycle>,
    /// Which of `start`/`stop` ran first
    claim: AtomicU8,
    /// Set once the subscription is open
    opened: AtomicBool,
    /// Initialized once the adapter has been closed
    closed: OnceCell<()>,
    /// Cancelled by `stop`
    stop: (Context, CancelHandle),
}

impl ConsumerService {
    /// Bind a service to its adapter and telemetry sink.
    ///
    /// Emits a startup trace and performs no other I/O.
    #[must_use]
    pub fn initialize(adapter: Arc<dyn MessagingAdapter>, telemetry: Arc<dyn Telemetry>) -> Self {
        telemetry.emit(TelemetryEvent::trace(INITIALIZING, Severity::Information));
        metrics::gauge!(LIFECYCLE_STATE).set(Lifecycle::Created.gauge_value());

        Self {
            adapter,
            telemetry,
            lifecycle: watch::Sender::new(Lifecycle::Created),
            claim: AtomicU8::new(UNCLAIMED),
            opened: AtomicBool::new(false),
            closed: OnceCell::new(),
            stop: Context::with_cancel(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Observe lifecycle transitions.
    #[must_use]
    pub fn watch_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Subscribe and consume until a termination trigger fires.
    ///
    /// Returns `Ok(())` after teardown: the subscription is cancelled and the
    /// adapter closed.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Subscribe`] if the adapter refuses the subscription.
    ///   Nothing was acquired, so nothing is closed.
    /// - [`ServiceError::AlreadyStarted`] on a second call.
    /// - [`ServiceError::Stopped`] if [`stop`](Self::stop) ran first.
    pub async fn start(
        &self,
        ctx: &Context,
        mut signals: broadcast::Receiver<TerminationSignal>,
    ) -> Result<(), ServiceError> {
        match self
            .claim
            .compare_exchange(UNCLAIMED, CLAIMED_BY_START, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {}
            Err(CLAIMED_BY_STOP) => return Err(ServiceError::Stopped),
            Err(_) => return Err(ServiceError::AlreadyStarted),
        }

        let Subscription { stream, cancel } = match self.adapter.subscribe(ctx).await {
            Ok(subscription) => subscription,
            Err(error) => {
                metrics::counter!(SUBSCRIBE_FAILURES).increment(1);
                self.telemetry.emit(
                    TelemetryEvent::exception(SUBSCRIBE_FAILED, Severity::Critical)
                        .with_error(&error),
                );
                self.set_lifecycle(Lifecycle::Stopped);
                return Err(ServiceError::Subscribe(error));
            }
        };

        self.opened.store(true, Ordering::SeqCst);
        self.set_lifecycle(Lifecycle::Subscribed);
        self.telemetry
            .emit(TelemetryEvent::trace(SUBSCRIBED, Severity::Information));

        let cause = self.run(ctx, stream, &mut signals).await;
        self.teardown(ctx, &cancel, cause).await;

        Ok(())
    }

    /// Stop the service.
    ///
    /// Emits a trace, ends the event loop and closes the adapter. Safe to call
    /// at any point and any number of times: the adapter is closed at most
    /// once across `stop` and the loop's own teardown, and never if the
    /// subscription was not opened.
    pub async fn stop(&self, ctx: &Context) {
        self.telemetry
            .emit(TelemetryEvent::trace(STOPPING, Severity::Information));
        self.stop.1.cancel();

        if self
            .claim
            .compare_exchange(UNCLAIMED, CLAIMED_BY_STOP, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.set_lifecycle(Lifecycle::Stopped);
            return;
        }

        if self.opened.load(Ordering::SeqCst) {
            self.close_adapter(ctx).await;
        }
    }

    /// The event loop. Returns the first termination trigger.
    async fn run(
        &self,
        ctx: &Context,
        mut stream: EnvelopeStream,
        signals: &mut broadcast::Receiver<TerminationSignal>,
    ) -> ShutdownCause {
        let mut signals_open = true;

        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(envelope) => self.process(&envelope),
                    None => return self.stream_end_cause(ctx),
                },
                cause = self.done(ctx) => return cause,
                received = signals.recv(), if signals_open => match received {
                    Ok(signal) => return ShutdownCause::Signal(signal),
                    // The next recv yields the oldest retained signal
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => {
                        tracing::debug!("Termination signal source closed");
                        signals_open = false;
                    }
                },
            }
        }
    }

    /// Completes when the caller's context is cancelled or `stop` is called.
    async fn done(&self, ctx: &Context) -> ShutdownCause {
        tokio::select! {
            () = ctx.cancelled() => ShutdownCause::ContextCancelled,
            () = self.stop.0.cancelled() => ShutdownCause::StopRequested,
        }
    }

    /// Attribute the end of the stream to a shutdown trigger that already
    /// fired, if any.
    fn stream_end_cause(&self, ctx: &Context) -> ShutdownCause {
        if ctx.is_cancelled() {
            ShutdownCause::ContextCancelled
        } else if self.stop.0.is_cancelled() {
            ShutdownCause::StopRequested
        } else {
            ShutdownCause::StreamEnded
        }
    }

    /// Classify one envelope and report it.
    fn process(&self, envelope: &Envelope) {
        let classification = classify(envelope);

        match classification.failure_reason() {
            Some(reason) => metrics::counter!(MESSAGES_FAILED, "reason" => reason).increment(1),
            None => metrics::counter!(MESSAGES_PROCESSED).increment(1),
        }

        self.telemetry.emit(classification.to_event());
    }

    async fn teardown(&self, ctx: &Context, cancel: &CancelHandle, cause: ShutdownCause) {
        self.set_lifecycle(Lifecycle::Terminating);

        cancel.cancel();
        self.close_adapter(ctx).await;

        metrics::counter!(SHUTDOWNS, "cause" => cause.label()).increment(1);

        let mut event = TelemetryEvent::trace(cause.message(), Severity::Information)
            .with_property("Cause", cause.label());
        if let ShutdownCause::Signal(signal) = cause {
            event = event.with_property("Signal", signal.to_string());
        }
        self.telemetry.emit(event);

        self.set_lifecycle(Lifecycle::Stopped);
    }

    /// Close the adapter once. A caller that loses the race waits for the
    /// close already in flight.
    async fn close_adapter(&self, ctx: &Context) {
        if self.closed.initialized() {
            tracing::debug!("Messaging adapter already closed");
            return;
        }

        self.closed.get_or_init(|| self.adapter.close(ctx)).await;
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        self.lifecycle.send_replace(state);
        metrics::gauge!(LIFECYCLE_STATE).set(state.gauge_value());
    }
}

impl fmt::Debug for ConsumerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerService")
            .field("lifecycle", &self.lifecycle())
            .field("opened", &self.opened.load(Ordering::SeqCst))
            .field("closed", &self.closed.initialized())
            .finish_non_exhaustive()
    }
}
