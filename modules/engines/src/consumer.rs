//! Stream consumer for the engines worker
//!
//! Reads from the domain stream with a consumer group and processes each
//! message with strong idempotency:
//!
//! 1. Decode the envelope, capture the message id
//! 2. Pre-check the processed-event key; skip when present
//! 3. Route through the engines inside one transaction
//! 4. Insert the processed-event key; a conflict rolls everything back
//! 5. Commit, then acknowledge on the bus
//!
//! Any failure leaves the message unacknowledged; pending-entry reclaim
//! redelivers it to this or another replica.

use event_bus::{EventEnvelope, StreamBus, StreamMessage};
use serde_json::Value;
use sqlx::PgPool;

use crate::config::Config;
use crate::engines::stock::AlertParams;
use crate::error::EngineError;
use crate::repos::processed_repo;
use crate::router::EventRouter;

/// Outcome of processing one stream message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Processed,
    /// The pre-check found the processed-event key
    SkippedAlreadyProcessed,
    /// Another replica inserted the key concurrently; this transaction rolled back
    SkippedConcurrent,
}

#[derive(Debug)]
pub struct ProcessOutcome {
    pub status: ProcessStatus,
    pub result: Option<Value>,
}

/// Process a single stream message with exactly-once effects
pub async fn process_stream_message(
    pool: &PgPool,
    router: &EventRouter,
    msg: &StreamMessage,
) -> Result<ProcessOutcome, EngineError> {
    let envelope = EventEnvelope::from_fields(&msg.id, &msg.fields)?;

    if processed_repo::exists(pool, envelope.event_id).await? {
        tracing::debug!(event_id = %envelope.event_id, "Event already processed, skipping");
        return Ok(ProcessOutcome {
            status: ProcessStatus::SkippedAlreadyProcessed,
            result: None,
        });
    }

    let mut tx = pool.begin().await?;

    let result = router.handle(&mut tx, &envelope).await?;

    let claimed = processed_repo::insert(&mut tx, &envelope, Some(&result)).await?;
    if !claimed {
        // Another worker committed this event between our pre-check and insert
        tx.rollback().await?;
        tracing::debug!(
            event_id = %envelope.event_id,
            "Event processed concurrently by another worker"
        );
        return Ok(ProcessOutcome {
            status: ProcessStatus::SkippedConcurrent,
            result: None,
        });
    }

    tx.commit().await?;

    tracing::info!(
        event_id = %envelope.event_id,
        event_type = %envelope.event_type,
        tenant_id = %envelope.tenant_id,
        "Processed event"
    );

    Ok(ProcessOutcome {
        status: ProcessStatus::Processed,
        result: Some(result),
    })
}

/// Read and process one batch from the stream; returns messages handled
pub async fn consume_from_stream(
    pool: &PgPool,
    bus: &dyn StreamBus,
    router: &EventRouter,
    config: &Config,
) -> Result<usize, EngineError> {
    let messages = bus
        .read_group(
            &[config.stream_name.as_str()],
            &config.group_name,
            &config.consumer_name,
            config.batch_size,
            config.block,
        )
        .await?;

    if messages.is_empty() {
        return Ok(0);
    }

    let mut handled = 0usize;
    for msg in &messages {
        match process_stream_message(pool, router, msg).await {
            Ok(outcome) => {
                bus.ack(&config.stream_name, &config.group_name, &msg.id)
                    .await?;
                handled += 1;
                tracing::debug!(msg_id = %msg.id, status = ?outcome.status, "ACKed message");
            }
            Err(e) => {
                // No ack: the message stays pending and will be redelivered
                tracing::error!(msg_id = %msg.id, error = %e, "Failed to process message");
            }
        }
    }

    Ok(handled)
}

/// Claim and process pending messages idle longer than the reclaim threshold
///
/// Recovers messages from crashed or stuck consumers. Idempotency protects
/// against a concurrent delivery to the original owner.
pub async fn reclaim_pending_messages(
    pool: &PgPool,
    bus: &dyn StreamBus,
    router: &EventRouter,
    config: &Config,
) -> Result<usize, EngineError> {
    let pending = bus
        .list_pending(
            &config.stream_name,
            &config.group_name,
            config.reclaim_idle,
            100,
        )
        .await?;

    if pending.is_empty() {
        return Ok(0);
    }

    let ids: Vec<String> = pending.iter().map(|p| p.id.clone()).collect();
    let claimed = bus
        .claim(
            &config.stream_name,
            &config.group_name,
            &config.consumer_name,
            config.reclaim_idle,
            &ids,
        )
        .await?;

    if claimed.is_empty() {
        return Ok(0);
    }

    tracing::info!(count = claimed.len(), "Reclaimed pending messages");

    let mut handled = 0usize;
    for msg in &claimed {
        match process_stream_message(pool, router, msg).await {
            Ok(_) => {
                bus.ack(&config.stream_name, &config.group_name, &msg.id)
                    .await?;
                handled += 1;
            }
            Err(e) => {
                tracing::error!(msg_id = %msg.id, error = %e, "Failed to process reclaimed message");
            }
        }
    }

    Ok(handled)
}

/// Router built from worker configuration
pub fn router_from_config(config: &Config) -> EventRouter {
    EventRouter::new(AlertParams {
        lead_time_days: config.lead_time_days,
        safety_percent: config.safety_percent,
    })
}
