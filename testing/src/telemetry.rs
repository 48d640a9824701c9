//! Recording telemetry sink.

use crate::lock;
use event_consumer_core::{Severity, Telemetry, TelemetryEvent};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// Telemetry sink that keeps every event in memory.
///
/// # Example
///
/// ```
/// use event_consumer_testing::RecordingTelemetry;
/// use event_consumer_core::{Severity, Telemetry, TelemetryEvent};
///
/// let telemetry = RecordingTelemetry::new();
/// telemetry.emit(TelemetryEvent::trace("Subscribed to events", Severity::Information));
///
/// assert_eq!(telemetry.messages(), vec!["Subscribed to events".to_string()]);
/// ```
#[derive(Debug)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
    recorded: watch::Sender<usize>,
}

impl RecordingTelemetry {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            recorded: watch::Sender::new(0),
        }
    }

    /// Every event recorded so far, in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<TelemetryEvent> {
        lock(&self.events).clone()
    }

    /// The messages of every recorded event, in emission order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .map(|event| event.message.clone())
            .collect()
    }

    /// Recorded events with the given severity.
    #[must_use]
    pub fn with_severity(&self, severity: Severity) -> Vec<TelemetryEvent> {
        lock(&self.events)
            .iter()
            .filter(|event| event.severity == severity)
            .cloned()
            .collect()
    }

    /// Recorded events with the given message.
    #[must_use]
    pub fn with_message(&self, message: &str) -> Vec<TelemetryEvent> {
        lock(&self.events)
            .iter()
            .filter(|event| event.message == message)
            .cloned()
            .collect()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every recorded event.
    pub fn clear(&self) {
        lock(&self.events).clear();
        self.recorded.send_replace(0);
    }

    /// Wait until at least `count` events have been recorded.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_events(&self, count: usize, timeout: Duration) -> bool {
        let mut rx = self.recorded.subscribe();
        tokio::time::timeout(timeout, async move {
            let _ = rx.wait_for(|recorded| *recorded >= count).await;
        })
        .await
        .is_ok()
    }

    /// Wait until at least `count` events carrying `message` have been
    /// recorded.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_message(&self, message: &str, count: usize, timeout: Duration) -> bool {
        let mut rx = self.recorded.subscribe();
        tokio::time::timeout(timeout, async move {
            loop {
                if self.with_message(message).len() >= count {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .is_ok()
    }
}

impl Default for RecordingTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry for RecordingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        let recorded = {
            let mut events = lock(&self.events);
            events.push(event);
            events.len()
        };
        self.recorded.send_replace(recorded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn filters_by_severity_and_message() {
        let telemetry = RecordingTelemetry::new();
        telemetry.emit(TelemetryEvent::trace("a", Severity::Information));
        telemetry.emit(TelemetryEvent::exception("b", Severity::Error));
        telemetry.emit(TelemetryEvent::trace("a", Severity::Information));

        assert_eq!(telemetry.len(), 3);
        assert_eq!(telemetry.with_severity(Severity::Error).len(), 1);
        assert_eq!(telemetry.with_message("a").len(), 2);

        telemetry.clear();
        assert!(telemetry.is_empty());
    }

    #[tokio::test]
    async fn wait_for_events_wakes_on_emit() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let emitter = Arc::clone(&telemetry);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            emitter.emit(TelemetryEvent::trace("late", Severity::Information));
        });

        assert!(telemetry.wait_for_events(1, Duration::from_secs(1)).await);
        assert!(telemetry.wait_for_message("late", 1, Duration::from_secs(1)).await);
        assert!(!telemetry.wait_for_events(2, Duration::from_millis(20)).await);
    }
}
