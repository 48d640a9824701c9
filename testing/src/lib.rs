//! # Event Consumer Testing
//!
//! Testing utilities for the event consumer.
//!
//! This crate provides:
//! - [`InMemoryAdapter`]: a scriptable `MessagingAdapter` that records every
//!   subscribe, cancel and close it sees
//! - [`RecordingTelemetry`]: a `Telemetry` sink that keeps every event and lets
//!   tests await a given number of them
//!
//! ## Example
//!
//! ```ignore
//! use event_consumer_testing::{InMemoryAdapter, RecordingTelemetry};
//! use event_consumer_core::{Context, Message};
//! use event_consumer_runtime::ConsumerService;
//!
//! #[tokio::test]
//! async fn processes_a_message() {
//!     let adapter = Arc::new(InMemoryAdapter::new());
//!     let telemetry = Arc::new(RecordingTelemetry::new());
//!     adapter.publish(Message::new("op-1", "ok", "process"));
//!
//!     let service = ConsumerService::initialize(adapter.clone(), telemetry.clone());
//!     // ... start, wait for telemetry, cancel
//! }
//! ```

mod adapter;
mod telemetry;

/// Mock implementations of the consumer's collaborators.
pub mod mocks {
    pub use crate::adapter::InMemoryAdapter;
    pub use crate::telemetry::RecordingTelemetry;
}

// Re-export commonly used items
pub use mocks::{InMemoryAdapter, RecordingTelemetry};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking test poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
