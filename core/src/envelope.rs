//! Inbound message envelopes.
//!
//! An [`Envelope`] is one unit delivered by a messaging adapter. It is either a
//! decoded [`Message`] or a [`DeliveryFailure`] reported by the adapter, never
//! both. Consumers match on the variant instead of probing an untyped payload.

use crate::messaging::MessagingError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlation identifier for one logical unit of work.
///
/// Redelivery of the same message reuses its operation id, so the id is not
/// unique per delivery.
///
/// # Examples
///
/// ```
/// use event_consumer_core::envelope::OperationId;
///
/// let id = OperationId::new("op-42");
/// assert_eq!(id.as_str(), "op-42");
/// assert!(!id.is_empty());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Create a new `OperationId`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the operation id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id carries no characters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert into the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OperationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A successfully delivered message.
///
/// `status` and `command` are free-form classification fields. `payload` is
/// owned by downstream business logic; the consumer only checks that the
/// classification fields are present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id for telemetry
    pub operation_id: OperationId,
    /// Free-form status of the unit of work
    pub status: String,
    /// Free-form command to perform
    pub command: String,
    /// Message body, uninterpreted by the consumer
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Message {
    /// Create a message with an empty payload.
    #[must_use]
    pub fn new(
        operation_id: impl Into<OperationId>,
        status: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            status: status.into(),
            command: command.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A message the adapter could not decode or deliver.
#[derive(Clone, Debug)]
pub struct DeliveryFailure {
    /// Correlation id, when the adapter could recover one
    pub operation_id: Option<OperationId>,
    /// What went wrong
    pub error: MessagingError,
}

impl DeliveryFailure {
    /// Create a failure without a correlation id.
    #[must_use]
    pub const fn new(error: MessagingError) -> Self {
        Self {
            operation_id: None,
            error,
        }
    }

    /// Attach the correlation id of the failed message.
    #[must_use]
    pub fn with_operation_id(mut self, operation_id: impl Into<OperationId>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }
}

/// One inbound unit from a messaging adapter.
#[derive(Clone, Debug)]
pub enum Envelope {
    /// A decoded message
    Message(Message),
    /// The adapter failed to decode or deliver a message
    DeliveryError(DeliveryFailure),
}

impl Envelope {
    /// The correlation id carried by this envelope, if any.
    #[must_use]
    pub fn operation_id(&self) -> Option<&OperationId> {
        match self {
            Self::Message(message) => Some(&message.operation_id),
            Self::DeliveryError(failure) => failure.operation_id.as_ref(),
        }
    }

    /// Whether this envelope reports a delivery error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::DeliveryError(_))
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<DeliveryFailure> for Envelope {
    fn from(failure: DeliveryFailure) -> Self {
        Self::DeliveryError(failure)
    }
}
