//! # Event Consumer Core
//!
//! Core traits and types for the event consumer.
//!
//! This crate holds the contracts shared by every other crate in the workspace:
//!
//! - [`context`]: Cancellable execution contexts (`Context` / `CancelHandle`)
//! - [`envelope`]: The typed inbound unit delivered by a messaging adapter
//! - [`messaging`]: The `MessagingAdapter` trait and its `Subscription`
//! - [`telemetry`]: The `Telemetry` sink trait and its event model
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  subscribe / close  ┌───────────────────┐
//! │ MessagingAdapter │◄────────────────────│  ConsumerService  │
//! │   (redpanda,     │────────────────────►│    (runtime)      │
//! │    in-memory)    │   Envelope stream   └─────────┬─────────┘
//! └──────────────────┘                               │ TelemetryEvent
//!                                                    ▼
//!                                           ┌───────────────────┐
//!                                           │     Telemetry     │
//!                                           └───────────────────┘
//! ```
//!
//! Nothing in this crate performs I/O. Adapters and sinks live in their own
//! crates and are injected into the service.

pub mod context;
pub mod envelope;
pub mod messaging;
pub mod telemetry;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use context::{CancelHandle, Context};
pub use envelope::{DeliveryFailure, Envelope, Message, OperationId};
pub use messaging::{EnvelopeStream, MessagingAdapter, MessagingError, Subscription};
pub use telemetry::{Properties, Severity, Telemetry, TelemetryEvent, TelemetryKind};
