//! Envelope classification.
//!
//! Every envelope maps to exactly one [`Classification`], and every
//! classification maps to exactly one telemetry event.

use event_consumer_core::{
    Envelope, MessagingError, OperationId, Severity, TelemetryEvent,
};
use thiserror::Error;

/// Trace emitted for a valid message.
pub const PROCESSING_EVENT: &str = "Processing event";
/// Exception emitted for a delivery error.
pub const DELIVERY_FAILED: &str = "Error processing message";
/// Exception emitted for a malformed message.
pub const MALFORMED_MESSAGE: &str = "Malformed message";

/// Why a decoded message cannot be processed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// No correlation id
    #[error("message has no operation id")]
    MissingOperationId,
    /// Empty `status`
    #[error("message has no status")]
    MissingStatus,
    /// Empty `command`
    #[error("message has no command")]
    MissingCommand,
}

/// The outcome of inspecting one envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classification<'a> {
    /// A valid message
    Processed {
        /// Correlation id
        operation_id: &'a OperationId,
        /// Message status
        status: &'a str,
        /// Message command
        command: &'a str,
    },
    /// A decoded message missing a required field
    Malformed {
        /// Correlation id, when present
        operation_id: Option<&'a OperationId>,
        /// The missing field
        reason: MalformedReason,
    },
    /// The adapter failed to decode or deliver the message
    DeliveryFailed {
        /// Correlation id, when the adapter recovered one
        operation_id: Option<&'a OperationId>,
        /// Adapter error
        error: &'a MessagingError,
    },
}

/// Classify an envelope.
#[must_use]
pub fn classify(envelope: &Envelope) -> Classification<'_> {
    match envelope {
        Envelope::DeliveryError(failure) => Classification::DeliveryFailed {
            operation_id: failure.operation_id.as_ref(),
            error: &failure.error,
        },
        Envelope::Message(message) => {
            let reason = if message.operation_id.is_empty() {
                Some(MalformedReason::MissingOperationId)
            } else if message.status.is_empty() {
                Some(MalformedReason::MissingStatus)
            } else if message.command.is_empty() {
                Some(MalformedReason::MissingCommand)
            } else {
                None
            };

            match reason {
                Some(reason) => Classification::Malformed {
                    operation_id: Some(&message.operation_id).filter(|id| !id.is_empty()),
                    reason,
                },
                None => Classification::Processed {
                    operation_id: &message.operation_id,
                    status: &message.status,
                    command: &message.command,
                },
            }
        }
    }
}

impl Classification<'_> {
    /// Whether the envelope is discarded.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::Processed { .. })
    }

    /// Metric label for discarded envelopes.
    #[must_use]
    pub const fn failure_reason(&self) -> Option<&'static str> {
        match self {
            Self::Processed { .. } => None,
            Self::Malformed { .. } => Some("malformed"),
            Self::DeliveryFailed { .. } => Some("delivery"),
        }
    }

    /// The telemetry event reporting this classification.
    #[must_use]
    pub fn to_event(&self) -> TelemetryEvent {
        let (event, operation_id) = match *self {
            Self::Processed {
                operation_id,
                status,
                command,
            } => (
                TelemetryEvent::trace(PROCESSING_EVENT, Severity::Information)
                    .with_property("Status", status)
                    .with_property("Command", command),
                Some(operation_id),
            ),
            Self::Malformed {
                operation_id,
                reason,
            } => (
                TelemetryEvent::exception(MALFORMED_MESSAGE, Severity::Error)
                    .with_error(&reason)
                    .with_property("Error", reason.to_string()),
                operation_id,
            ),
            Self::DeliveryFailed {
                operation_id,
                error,
            } => (
                TelemetryEvent::exception(DELIVERY_FAILED, Severity::Error)
                    .with_error(error)
                    .with_property("Error", error.to_string()),
                operation_id,
            ),
        };

        match operation_id {
            Some(id) => event.with_operation_id(id.as_str()),
            None => event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_consumer_core::{DeliveryFailure, Message, TelemetryKind};

    #[test]
    fn valid_message_is_processed() {
        let envelope = Envelope::from(Message::new("op-1", "ok", "process"));
        let classification = classify(&envelope);

        assert!(!classification.is_failure());
        let event = classification.to_event();
        assert_eq!(event.message, PROCESSING_EVENT);
        assert_eq!(event.severity, Severity::Information);
        assert_eq!(event.kind, TelemetryKind::Trace);
        assert_eq!(event.operation_id.as_deref(), Some("op-1"));
        assert_eq!(event.property("Status"), Some("ok"));
        assert_eq!(event.property("Command"), Some("process"));
    }

    #[test]
    fn delivery_error_carries_error_text() {
        let envelope = Envelope::from(
            DeliveryFailure::new(MessagingError::DeserializationFailed(
                "decode failed".to_string(),
            ))
            .with_operation_id("op-9"),
        );
        let classification = classify(&envelope);

        assert_eq!(classification.failure_reason(), Some("delivery"));
        let event = classification.to_event();
        assert_eq!(event.message, DELIVERY_FAILED);
        assert_eq!(event.severity, Severity::Error);
        assert!(event.error().unwrap().contains("decode failed"));
        assert!(event.property("Error").unwrap().contains("decode failed"));
        assert_eq!(event.operation_id.as_deref(), Some("op-9"));
    }

    #[test]
    fn missing_fields_are_malformed() {
        let cases = [
            (Message::new("", "ok", "process"), MalformedReason::MissingOperationId),
            (Message::new("op-1", "", "process"), MalformedReason::MissingStatus),
            (Message::new("op-1", "ok", ""), MalformedReason::MissingCommand),
        ];

        for (message, expected) in cases {
            let envelope = Envelope::from(message);
            match classify(&envelope) {
                Classification::Malformed { reason, .. } => assert_eq!(reason, expected),
                other => panic!("expected malformed, got {other:?}"),
            }
        }
    }

    #[test]
    fn malformed_without_operation_id_has_no_correlation() {
        let envelope = Envelope::from(Message::new("", "ok", "process"));
        let event = classify(&envelope).to_event();

        assert_eq!(event.message, MALFORMED_MESSAGE);
        assert!(event.operation_id.is_none());
        assert_eq!(event.error(), Some("message has no operation id"));
    }
}
