//! Stream names, consumer groups, and the messaging producer

use event_bus::{BusResult, EventEnvelope, StreamBus};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::contracts::MessagingEventType;

/// Inbound messages published by the webhook
pub const INBOUND_STREAM: &str = "bc:whatsapp:inbound";
/// Outbound messages awaiting dispatch
pub const OUTBOUND_STREAM: &str = "bc:whatsapp:outbound";
/// Envelopes parked after exhausted retries
pub const DLQ_STREAM: &str = "bc:whatsapp:dlq";

/// Consumer group of the inbound/outbound/DLQ streams
pub const ENGINE_GROUP: &str = "whatsapp-engine";
/// Consumer group reading the domain stream for notifications
pub const NOTIFIER_GROUP: &str = "whatsapp-notifier";

/// Domain stream of a vertical (shared with the engines worker)
pub fn domain_stream(vertical: &str) -> String {
    format!("events:{vertical}")
}

/// Ensure all messaging streams and consumer groups exist.
///
/// Called at startup by both the webhook and the worker. The notifier group
/// starts at `$`: vertical history predating the messaging engine is not
/// replayed as notifications.
pub async fn ensure_messaging_streams(bus: &dyn StreamBus, vertical: &str) -> BusResult<()> {
    bus.ensure_group(INBOUND_STREAM, ENGINE_GROUP, "0").await?;
    bus.ensure_group(OUTBOUND_STREAM, ENGINE_GROUP, "0").await?;
    bus.ensure_group(DLQ_STREAM, ENGINE_GROUP, "0").await?;
    bus.ensure_group(&domain_stream(vertical), NOTIFIER_GROUP, "$")
        .await?;
    Ok(())
}

/// Publishes messaging envelopes to the streams
pub struct MessagingProducer {
    bus: Arc<dyn StreamBus>,
    vertical: String,
    max_len: usize,
}

impl MessagingProducer {
    pub fn new(bus: Arc<dyn StreamBus>, vertical: impl Into<String>, max_len: usize) -> Self {
        Self {
            bus,
            vertical: vertical.into(),
            max_len,
        }
    }

    async fn publish(&self, stream: &str, envelope: &EventEnvelope) -> BusResult<String> {
        let msg_id = self
            .bus
            .append(stream, &envelope.to_fields(), Some(self.max_len))
            .await?;
        tracing::debug!(
            stream = %stream,
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            msg_id = %msg_id,
            "Published envelope"
        );
        Ok(msg_id)
    }

    fn envelope(
        &self,
        event_type: MessagingEventType,
        tenant_id: Uuid,
        payload: Value,
        correlation_id: Option<String>,
    ) -> EventEnvelope {
        EventEnvelope::new(event_type.as_str(), tenant_id, self.vertical.clone(), payload)
            .with_correlation_id(correlation_id)
    }

    /// Publish an inbound message event (webhook → worker)
    pub async fn publish_inbound(
        &self,
        tenant_id: Uuid,
        payload: Value,
        correlation_id: Option<String>,
    ) -> BusResult<String> {
        let envelope = self.envelope(
            MessagingEventType::InboundReceived,
            tenant_id,
            payload,
            correlation_id,
        );
        self.publish(INBOUND_STREAM, &envelope).await
    }

    /// Publish an outbound message request
    pub async fn publish_outbound(
        &self,
        tenant_id: Uuid,
        payload: Value,
        correlation_id: Option<String>,
    ) -> BusResult<String> {
        let envelope = self.envelope(
            MessagingEventType::OutboundQueued,
            tenant_id,
            payload,
            correlation_id,
        );
        self.publish(OUTBOUND_STREAM, &envelope).await
    }

    /// Publish an action-requested event on the domain stream for verticals
    pub async fn publish_action_requested(
        &self,
        tenant_id: Uuid,
        intent: &str,
        from_phone: &str,
        original_message_id: &str,
        correlation_id: Option<String>,
    ) -> BusResult<String> {
        let envelope = self.envelope(
            MessagingEventType::ActionRequested,
            tenant_id,
            json!({
                "intent": intent,
                "from_phone": from_phone,
                "original_message_id": original_message_id,
            }),
            correlation_id,
        );
        self.publish(&domain_stream(&self.vertical), &envelope).await
    }

    /// Publish an opt-out event on the domain stream
    pub async fn publish_optout(
        &self,
        tenant_id: Uuid,
        phone: &str,
        reason: &str,
        original_message_id: &str,
        correlation_id: Option<String>,
    ) -> BusResult<String> {
        let envelope = self.envelope(
            MessagingEventType::CustomerOptedOut,
            tenant_id,
            json!({
                "phone": phone,
                "reason": reason,
                "original_message_id": original_message_id,
            }),
            correlation_id,
        );
        self.publish(&domain_stream(&self.vertical), &envelope).await
    }

    /// Publish a messaging lifecycle event on the domain stream
    pub async fn publish_domain_event(
        &self,
        event_type: MessagingEventType,
        tenant_id: Uuid,
        payload: Value,
        correlation_id: Option<String>,
    ) -> BusResult<String> {
        let envelope = self.envelope(event_type, tenant_id, payload, correlation_id);
        self.publish(&domain_stream(&self.vertical), &envelope).await
    }

    /// Park a failed envelope on the dead-letter stream.
    ///
    /// The DLQ payload wraps the original envelope verbatim under
    /// `original_event` so it can be replayed manually.
    pub async fn publish_to_dlq(
        &self,
        original: &EventEnvelope,
        error: &str,
        retry_count: u64,
    ) -> BusResult<String> {
        let dlq_payload = json!({
            "original_event": serde_json::to_value(original)
                .unwrap_or_else(|_| json!({"event_id": original.event_id})),
            "error": error,
            "retry_count": retry_count,
        });
        let envelope = self
            .envelope(
                MessagingEventType::DlqEntry,
                original.tenant_id,
                dlq_payload,
                original.correlation_id.clone(),
            );
        self.publish(DLQ_STREAM, &envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::InMemoryBus;
    use std::time::Duration;

    #[tokio::test]
    async fn test_dlq_payload_wraps_original_envelope() {
        let bus = Arc::new(InMemoryBus::new());
        bus.ensure_group(DLQ_STREAM, ENGINE_GROUP, "0").await.unwrap();
        let producer = MessagingProducer::new(bus.clone(), "materials", 1000);

        let original = EventEnvelope::new(
            "whatsapp_outbound_queued",
            Uuid::new_v4(),
            "materials",
            json!({"to_phone": "+5511999999999", "text": "oi"}),
        );
        producer
            .publish_to_dlq(&original, "simulated provider outage", 3)
            .await
            .unwrap();

        let batch = bus
            .read_group(&[DLQ_STREAM], ENGINE_GROUP, "t", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);

        let envelope = EventEnvelope::from_fields(&batch[0].id, &batch[0].fields).unwrap();
        assert_eq!(envelope.event_type, "whatsapp_dlq_entry");
        assert_eq!(envelope.payload["retry_count"], 3);
        assert_eq!(envelope.payload["error"], "simulated provider outage");
        assert_eq!(
            envelope.payload["original_event"]["event_id"],
            original.event_id.to_string()
        );
        assert_eq!(
            envelope.payload["original_event"]["payload"]["to_phone"],
            "+5511999999999"
        );
    }

    #[tokio::test]
    async fn test_ensure_streams_is_idempotent() {
        let bus = InMemoryBus::new();
        ensure_messaging_streams(&bus, "materials").await.unwrap();
        ensure_messaging_streams(&bus, "materials").await.unwrap();
    }
}
