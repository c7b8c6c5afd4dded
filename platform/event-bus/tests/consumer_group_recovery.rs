//! Consumer-group recovery semantics
//!
//! Exercises the crash/reclaim flow the workers rely on: a consumer reads a
//! message and dies before acking; after the idle threshold another consumer
//! claims it from the pending-entry list and finishes the work.

use event_bus::{EventEnvelope, InMemoryBus, StreamBus};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

const STREAM: &str = "events:materials";
const GROUP: &str = "engines";

#[tokio::test]
async fn crashed_consumer_message_is_claimed_and_processed_once() {
    let bus = InMemoryBus::new();
    bus.ensure_group(STREAM, GROUP, "0").await.unwrap();

    let envelope = EventEnvelope::new(
        "sale_recorded",
        Uuid::new_v4(),
        "materials",
        json!({"order_id": Uuid::new_v4(), "items": []}),
    );
    bus.append(STREAM, &envelope.to_fields(), Some(100_000))
        .await
        .unwrap();

    // Worker A reads the message and crashes before ack
    let batch = bus
        .read_group(&[STREAM], GROUP, "worker-a", 10, Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    let msg_id = batch[0].id.clone();

    // Nothing new is delivered to worker B through a group read
    let batch = bus
        .read_group(&[STREAM], GROUP, "worker-b", 10, Duration::from_millis(10))
        .await
        .unwrap();
    assert!(batch.is_empty());

    // Worker B's reclaim pass finds the idle pending entry and claims it
    let pending = bus
        .list_pending(STREAM, GROUP, Duration::ZERO, 100)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].consumer, "worker-a");
    assert_eq!(pending[0].delivery_count, 1);

    let claimed = bus
        .claim(STREAM, GROUP, "worker-b", Duration::ZERO, &[msg_id.clone()])
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    // The claimed message decodes to the same envelope (same idempotency key)
    let decoded = EventEnvelope::from_fields(&claimed[0].id, &claimed[0].fields).unwrap();
    assert_eq!(decoded.event_id, envelope.event_id);
    assert_eq!(decoded.event_type, "sale_recorded");

    // Worker B finishes the work and acks; the pending list drains
    assert_eq!(bus.ack(STREAM, GROUP, &msg_id).await.unwrap(), 1);
    let pending = bus
        .list_pending(STREAM, GROUP, Duration::ZERO, 100)
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn delivery_count_escalates_across_repeated_claims() {
    let bus = InMemoryBus::new();
    bus.ensure_group(STREAM, GROUP, "0").await.unwrap();

    let envelope = EventEnvelope::new(
        "whatsapp_outbound_queued",
        Uuid::new_v4(),
        "materials",
        json!({"to_phone": "+5511999999999", "text": "oi"}),
    );
    bus.append(STREAM, &envelope.to_fields(), None).await.unwrap();

    let batch = bus
        .read_group(&[STREAM], GROUP, "w1", 10, Duration::from_millis(10))
        .await
        .unwrap();
    let msg_id = batch[0].id.clone();

    // Each failed attempt leaves the entry pending; each reclaim bumps the
    // delivery count the retry budget is computed from
    for expected in 2..=4u64 {
        bus.claim(STREAM, GROUP, "rescuer", Duration::ZERO, &[msg_id.clone()])
            .await
            .unwrap();
        let pending = bus
            .list_pending(STREAM, GROUP, Duration::ZERO, 100)
            .await
            .unwrap();
        assert_eq!(pending[0].delivery_count, expected);
    }
}
