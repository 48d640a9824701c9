//! Telemetry sink backed by `tracing`.

use event_consumer_core::{Severity, Telemetry, TelemetryEvent};

/// Forwards telemetry events to the `tracing` subscriber installed by the
/// process.
///
/// Information maps to `INFO`, Error and Critical map to `ERROR`; critical
/// events carry `critical = true` so they can be filtered and alerted on.
#[derive(Debug, Clone)]
pub struct TracingTelemetry {
    service: String,
}

impl TracingTelemetry {
    /// Create a sink tagging every event with `service`.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// The service name attached to every event.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl Telemetry for TracingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        let operation_id = event.operation_id.as_deref().unwrap_or("-");
        let error = event.error().unwrap_or_default();

        match event.severity {
            Severity::Information => tracing::info!(
                service = %self.service,
                operation_id,
                properties = ?event.properties,
                "{}",
                event.message
            ),
            Severity::Error => tracing::error!(
                service = %self.service,
                operation_id,
                error,
                properties = ?event.properties,
                "{}",
                event.message
            ),
            Severity::Critical => tracing::error!(
                service = %self.service,
                critical = true,
                operation_id,
                error,
                properties = ?event.properties,
                "{}",
                event.message
            ),
        }
    }
}
