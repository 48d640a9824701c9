//! JSON envelope codec.
//!
//! Kafka records carry a JSON object:
//!
//! ```json
//! {"operationID": "op-1", "status": "ok", "command": "process", "payload": {}}
//! ```
//!
//! `operation_id` is accepted as well. When the record has no usable
//! operation id the record key is used, then the record coordinates
//! `topic/partition/offset`.

use event_consumer_core::{DeliveryFailure, Envelope, Message, MessagingError, OperationId};
use rdkafka::message::Message as KafkaMessage;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default, alias = "operationID", alias = "operationId")]
    operation_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    command: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Decode a Kafka record into an envelope.
///
/// Never fails: records that cannot be decoded become
/// [`Envelope::DeliveryError`] carrying the best correlation id available.
pub fn decode<M: KafkaMessage>(record: &M) -> Envelope {
    let fallback = fallback_operation_id(record);

    let Some(bytes) = record.payload() else {
        return DeliveryFailure::new(MessagingError::DeserializationFailed(
            "Message has no payload".to_string(),
        ))
        .with_operation_id(fallback)
        .into();
    };

    match serde_json::from_slice::<WireMessage>(bytes) {
        Ok(wire) => {
            let operation_id = if wire.operation_id.is_empty() {
                fallback
            } else {
                OperationId::new(wire.operation_id)
            };
            Message::new(operation_id, wire.status, wire.command)
                .with_payload(wire.payload)
                .into()
        }
        Err(e) => DeliveryFailure::new(MessagingError::DeserializationFailed(format!(
            "Failed to deserialize message: {e}"
        )))
        .with_operation_id(fallback)
        .into(),
    }
}

/// Record key when it is non-empty UTF-8, otherwise the record coordinates.
fn fallback_operation_id<M: KafkaMessage>(record: &M) -> OperationId {
    record
        .key()
        .and_then(|key| std::str::from_utf8(key).ok())
        .filter(|key| !key.is_empty())
        .map_or_else(
            || {
                OperationId::new(format!(
                    "{}/{}/{}",
                    record.topic(),
                    record.partition(),
                    record.offset()
                ))
            },
            OperationId::from,
        )
}
