//! Service errors.

use event_consumer_core::MessagingError;
use thiserror::Error;

/// Errors returned by [`ConsumerService::start`](crate::ConsumerService::start).
///
/// Per-message failures never surface here; they are reported as telemetry
/// and the message is discarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The adapter refused the subscription
    #[error("Failed to subscribe to events: {0}")]
    Subscribe(#[from] MessagingError),

    /// `start` was already called on this instance
    #[error("Service already started")]
    AlreadyStarted,

    /// `stop` was called before `start`
    #[error("Service stopped before it was started")]
    Stopped,
}
