//! Prometheus metrics for the consumer.
//!
//! The service records counters through the `metrics` facade. Without an
//! installed recorder they are no-ops, so tests and embedders pay nothing.
//! [`MetricsExporter`] installs a Prometheus recorder with its own HTTP
//! listener.
//!
//! # Example
//!
//! ```rust,no_run
//! use event_consumer_runtime::metrics::MetricsExporter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Metrics available at http://localhost:9090/metrics
//! MetricsExporter::new("0.0.0.0:9090".parse()?).install()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;

/// Valid messages classified and traced.
pub const MESSAGES_PROCESSED: &str = "consumer_messages_processed_total";
/// Messages discarded, labelled by `reason`.
pub const MESSAGES_FAILED: &str = "consumer_messages_failed_total";
/// Completed teardowns, labelled by `cause`.
pub const SHUTDOWNS: &str = "consumer_shutdowns_total";
/// Fatal subscribe failures.
pub const SUBSCRIBE_FAILURES: &str = "consumer_subscribe_failures_total";
/// Current lifecycle state.
pub const LIFECYCLE_STATE: &str = "consumer_lifecycle_state";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build or install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter serving `/metrics` on its own listener.
#[derive(Debug, Clone, Copy)]
pub struct MetricsExporter {
    addr: SocketAddr,
}

impl MetricsExporter {
    /// Create an exporter bound to `addr` once installed.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// The listen address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Register metric descriptions, install the global recorder and start the
    /// HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if the listener cannot be started or
    /// the recorder cannot be installed. A recorder that is already installed
    /// is tolerated with a warning.
    pub fn install(&self) -> Result<(), MetricsError> {
        register_metrics();

        match PrometheusBuilder::new().with_http_listener(self.addr).install() {
            Ok(()) => {
                tracing::info!(
                    addr = %self.addr,
                    "Metrics exporter started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        MESSAGES_PROCESSED,
        "Total number of valid messages classified by the consumer"
    );
    describe_counter!(
        MESSAGES_FAILED,
        "Total number of messages discarded because of delivery or malformation errors"
    );
    describe_counter!(
        SHUTDOWNS,
        "Total number of consumer shutdowns by cause"
    );
    describe_counter!(
        SUBSCRIBE_FAILURES,
        "Total number of fatal subscribe failures"
    );
    describe_gauge!(
        LIFECYCLE_STATE,
        "Current consumer lifecycle state (0=created, 1=subscribed, 2=terminating, 3=stopped)"
    );
}
