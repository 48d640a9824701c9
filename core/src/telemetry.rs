//! Telemetry sink abstraction.
//!
//! The consumer reports everything it does as a [`TelemetryEvent`]: a trace
//! or an exception, a [`Severity`], a message, the correlation id of the unit
//! of work it belongs to, and optional string properties.
//!
//! Sinks are injected where they are needed. There is no global client and no
//! context lookup.
//!
//! # Example
//!
//! ```
//! use event_consumer_core::telemetry::{Severity, TelemetryEvent};
//!
//! let event = TelemetryEvent::trace("Processing event", Severity::Information)
//!     .with_operation_id("op-7")
//!     .with_property("Status", "ok");
//!
//! assert_eq!(event.operation_id.as_deref(), Some("op-7"));
//! assert_eq!(event.property("Status"), Some("ok"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// String key/value properties attached to an event.
pub type Properties = BTreeMap<String, String>;

/// Severity of a telemetry event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Normal operation
    Information,
    /// A recoverable failure
    Error,
    /// A failure that stops the service
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Information => write!(f, "information"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Whether an event is a plain trace or reports an exception.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryKind {
    /// Informational trace
    Trace,
    /// A failure, with the error text when one is available
    Exception {
        /// Rendered error
        error: Option<String>,
    },
}

/// One structured telemetry event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Trace or exception
    pub kind: TelemetryKind,
    /// Severity
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
    /// Correlation id of the unit of work, if any
    pub operation_id: Option<String>,
    /// Additional properties
    pub properties: Properties,
    /// When the event was created
    pub timestamp: DateTime<Utc>,
}

impl TelemetryEvent {
    /// A trace event.
    #[must_use]
    pub fn trace(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            kind: TelemetryKind::Trace,
            severity,
            message: message.into(),
            operation_id: None,
            properties: Properties::new(),
            timestamp: Utc::now(),
        }
    }

    /// An exception event without error text.
    #[must_use]
    pub fn exception(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            kind: TelemetryKind::Exception { error: None },
            ..Self::trace(message, severity)
        }
    }

    /// Attach the correlation id.
    #[must_use]
    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    /// Attach one property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Attach the error text, turning a trace into an exception.
    #[must_use]
    pub fn with_error(mut self, error: &dyn std::error::Error) -> Self {
        self.kind = TelemetryKind::Exception {
            error: Some(error.to_string()),
        };
        self
    }

    /// Look up a property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The error text of an exception event.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match &self.kind {
            TelemetryKind::Exception { error } => error.as_deref(),
            TelemetryKind::Trace => None,
        }
    }

    /// Whether this is an exception event.
    #[must_use]
    pub const fn is_exception(&self) -> bool {
        matches!(self.kind, TelemetryKind::Exception { .. })
    }
}

/// A telemetry sink.
///
/// `emit` is called from the consumer's event loop and must not block: sinks
/// that ship events over the network should buffer and flush elsewhere.
pub trait Telemetry: Send + Sync {
    /// Record one event.
    fn emit(&self, event: TelemetryEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessagingError;

    #[test]
    fn exception_carries_error_text() {
        let err = MessagingError::TransportError("broker unreachable".to_string());
        let event = TelemetryEvent::exception("Failed to subscribe", Severity::Critical)
            .with_error(&err);

        assert!(event.is_exception());
        assert_eq!(event.error(), Some("Transport error: broker unreachable"));
        assert_eq!(event.severity, Severity::Critical);
    }

    #[test]
    fn trace_has_no_error() {
        let event = TelemetryEvent::trace("Subscribed", Severity::Information);
        assert!(!event.is_exception());
        assert!(event.error().is_none());
        assert!(event.operation_id.is_none());
    }

    #[test]
    fn severities_order_by_gravity() {
        assert!(Severity::Information < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
        assert_eq!(Severity::Critical.to_string(), "critical");
    }
}
