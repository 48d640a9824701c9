//! Property tests for delivery ordering and exactly-once classification.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use event_consumer_core::{Context, DeliveryFailure, Envelope, Message, MessagingError};
use event_consumer_runtime::classify::{DELIVERY_FAILED, MALFORMED_MESSAGE, PROCESSING_EVENT};
use event_consumer_runtime::{ConsumerService, signal};
use event_consumer_testing::{InMemoryAdapter, RecordingTelemetry};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
enum Kind {
    Valid,
    Malformed,
    Undeliverable,
}

impl Kind {
    fn envelope(self, operation_id: &str) -> Envelope {
        match self {
            Self::Valid => Message::new(operation_id, "ok", "process").into(),
            Self::Malformed => Message::new(operation_id, "ok", "").into(),
            Self::Undeliverable => DeliveryFailure::new(MessagingError::DeserializationFailed(
                "decode failed".to_string(),
            ))
            .with_operation_id(operation_id)
            .into(),
        }
    }

    const fn expected_message(self) -> &'static str {
        match self {
            Self::Valid => PROCESSING_EVENT,
            Self::Malformed => MALFORMED_MESSAGE,
            Self::Undeliverable => DELIVERY_FAILED,
        }
    }
}

fn kind() -> impl Strategy<Value = Kind> {
    prop_oneof![
        3 => Just(Kind::Valid),
        1 => Just(Kind::Malformed),
        1 => Just(Kind::Undeliverable),
    ]
}

/// Run the service over `kinds` and return `(message, operation_id)` for
/// every classification event, in emission order.
fn consume(kinds: &[Kind]) -> Vec<(String, Option<String>)> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let adapter = Arc::new(InMemoryAdapter::new());
        let telemetry = Arc::new(RecordingTelemetry::new());
        let service = Arc::new(ConsumerService::initialize(adapter.clone(), telemetry.clone()));
        let (signals, _) = signal::channel();

        let (ctx, cancel) = Context::with_cancel();
        let handle = tokio::spawn({
            let service = Arc::clone(&service);
            let signals = signals.subscribe();
            async move { service.start(&ctx, signals).await }
        });
        assert!(adapter.wait_for_subscribers(1, TIMEOUT).await);

        for (i, kind) in kinds.iter().enumerate() {
            adapter.publish(kind.envelope(&format!("op-{i}")));
        }

        // Initializing + Subscribed precede the classification events.
        assert!(telemetry.wait_for_events(2 + kinds.len(), TIMEOUT).await);
        cancel.cancel();
        handle.await.unwrap().unwrap();

        telemetry
            .events()
            .into_iter()
            .filter(|e| {
                [PROCESSING_EVENT, DELIVERY_FAILED, MALFORMED_MESSAGE].contains(&e.message.as_str())
            })
            .map(|e| (e.message, e.operation_id))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_envelope_is_classified_once_in_delivery_order(
        kinds in prop::collection::vec(kind(), 0..24)
    ) {
        let classified = consume(&kinds);

        prop_assert_eq!(classified.len(), kinds.len());
        for (i, (kind, (message, operation_id))) in kinds.iter().zip(&classified).enumerate() {
            prop_assert_eq!(message.as_str(), kind.expected_message());
            let expected = format!("op-{i}");
            prop_assert_eq!(operation_id.as_deref(), Some(expected.as_str()));
        }
    }
}
