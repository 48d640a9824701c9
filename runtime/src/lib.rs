//! # Event Consumer Runtime
//!
//! Runtime for the event consumer.
//!
//! This crate runs the consumption loop: it subscribes through a
//! [`MessagingAdapter`](event_consumer_core::MessagingAdapter), classifies
//! every envelope, reports it as telemetry and tears everything down exactly
//! once when a termination trigger fires.
//!
//! ## Core Components
//!
//! - **`ConsumerService`**: lifecycle, event loop and shutdown coordination
//! - **Classification**: maps each envelope to one telemetry event
//! - **Signals**: OS termination signals fanned out over a broadcast channel
//! - **Telemetry**: a `tracing`-backed sink and Prometheus metrics
//!
//! ## Example
//!
//! ```ignore
//! use event_consumer_core::Context;
//! use event_consumer_runtime::{ConsumerService, TracingTelemetry, signal};
//!
//! let (signals, _) = signal::channel();
//! let service = ConsumerService::initialize(
//!     adapter,
//!     Arc::new(TracingTelemetry::new("Consumer")),
//! );
//!
//! service.start(&Context::background(), signals.subscribe()).await?;
//! ```

/// Envelope classification
pub mod classify;

/// Service errors
pub mod error;

/// Prometheus metrics for observability
pub mod metrics;

/// The consumer service
pub mod service;

/// Termination signal forwarding
pub mod signal;

/// Telemetry sink backed by `tracing`
pub mod telemetry;

pub use classify::{Classification, MalformedReason, classify};
pub use error::ServiceError;
pub use metrics::{MetricsError, MetricsExporter};
pub use service::{ConsumerService, Lifecycle, ShutdownCause};
pub use signal::{SignalForwarder, TerminationSignal};
pub use telemetry::TracingTelemetry;
