//! Relay loop: outbox rows → stream bus
//!
//! Contract: for every outbox row with `published_at IS NULL`, eventually
//! publish an envelope to the bus and set `published_at`. Delivery is
//! at-least-once; consumers are idempotent.

use event_bus::{EventEnvelope, PollBackoff, StreamBus};
use serde_json::Map;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::Config;
use crate::outbox::{fetch_unpublished, mark_published, OutboxRow};

/// Consumer group ensured on the per-vertical domain streams at startup
pub const ENGINES_GROUP: &str = "engines";

/// Stream name for a vertical's domain events
pub fn stream_name(vertical: &str) -> String {
    format!("events:{vertical}")
}

/// Vertical an outbox row routes to: from the payload, or the configured default
pub fn vertical_for_row(row: &OutboxRow, default_vertical: &str) -> String {
    row.payload
        .get("vertical")
        .and_then(|v| v.as_str())
        .unwrap_or(default_vertical)
        .to_string()
}

/// Build the on-bus envelope for an outbox row
pub fn envelope_for_row(row: &OutboxRow, default_vertical: &str) -> EventEnvelope {
    EventEnvelope {
        event_id: row.event_id,
        event_type: row.event_type.clone(),
        tenant_id: row.tenant_id,
        vertical: vertical_for_row(row, default_vertical),
        occurred_at: row.created_at,
        version: row.version,
        payload: row.payload.clone(),
        correlation_id: None,
        metadata: Map::new(),
    }
}

/// Ensure the engines consumer group exists for every configured vertical
pub async fn ensure_stream_groups(
    bus: &dyn StreamBus,
    config: &Config,
) -> Result<(), event_bus::BusError> {
    for vertical in &config.verticals {
        let stream = stream_name(vertical);
        let created = bus.ensure_group(&stream, ENGINES_GROUP, "0").await?;
        if created {
            tracing::info!(stream = %stream, group = ENGINES_GROUP, "Created consumer group");
        }
    }
    Ok(())
}

/// Relay one batch of outbox rows to the bus
///
/// Opens a transaction, selects up to `batch_size` unpublished rows with
/// skip-locked row locks, appends each to its vertical's stream, marks the
/// successfully appended rows published, and commits. A row whose append
/// fails stays unpublished and is retried on a later pass.
pub async fn relay_batch(
    pool: &PgPool,
    bus: &dyn StreamBus,
    config: &Config,
) -> Result<usize, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let rows = fetch_unpublished(&mut tx, config.batch_size).await?;

    if rows.is_empty() {
        tx.rollback().await?;
        return Ok(0);
    }

    let mut published_ids = Vec::with_capacity(rows.len());
    for row in &rows {
        let envelope = envelope_for_row(row, &config.default_vertical);
        let stream = stream_name(&envelope.vertical);
        match bus
            .append(&stream, &envelope.to_fields(), Some(config.stream_max_len))
            .await
        {
            Ok(msg_id) => {
                published_ids.push(row.id);
                tracing::debug!(
                    event_id = %row.event_id,
                    event_type = %row.event_type,
                    stream = %stream,
                    msg_id = %msg_id,
                    "Published outbox event to stream"
                );
            }
            Err(e) => {
                tracing::error!(
                    event_id = %row.event_id,
                    stream = %stream,
                    error = %e,
                    "Failed to publish outbox event; will retry"
                );
            }
        }
    }

    let count = published_ids.len();
    mark_published(&mut tx, &published_ids).await?;
    tx.commit().await?;

    Ok(count)
}

/// Main relay loop; exits when the shutdown flag is set
pub async fn run(
    pool: PgPool,
    bus: Arc<dyn StreamBus>,
    config: Config,
    shutdown: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
) {
    let mut backoff = PollBackoff::new(config.poll_interval_empty, Duration::from_secs(30));

    while !shutdown.load(Ordering::SeqCst) {
        let sleep_for = match relay_batch(&pool, bus.as_ref(), &config).await {
            Ok(0) => backoff.next_empty(),
            Ok(count) => {
                tracing::info!(count = count, "Relayed events to the stream bus");
                backoff.reset();
                config.poll_interval_busy
            }
            Err(e) => {
                tracing::error!(error = %e, "Error in relay loop");
                config.poll_interval_empty
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = shutdown_notify.notified() => {}
        }
    }

    tracing::info!("Outbox relay shutting down gracefully");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn row(payload: serde_json::Value) -> OutboxRow {
        OutboxRow {
            id: 1,
            event_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            event_type: "sale_recorded".to_string(),
            payload,
            version: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_stream_routing_uses_payload_vertical() {
        let r = row(json!({"vertical": "restaurant", "order_id": "o-1"}));
        assert_eq!(vertical_for_row(&r, "materials"), "restaurant");
        assert_eq!(stream_name(&vertical_for_row(&r, "materials")), "events:restaurant");
    }

    #[test]
    fn test_stream_routing_falls_back_to_default() {
        let r = row(json!({"order_id": "o-1"}));
        assert_eq!(vertical_for_row(&r, "materials"), "materials");
    }

    #[test]
    fn test_envelope_for_row_carries_identity() {
        let r = row(json!({"order_id": "o-1"}));
        let envelope = envelope_for_row(&r, "materials");
        assert_eq!(envelope.event_id, r.event_id);
        assert_eq!(envelope.tenant_id, r.tenant_id);
        assert_eq!(envelope.event_type, "sale_recorded");
        assert_eq!(envelope.payload, r.payload);
        assert_eq!(envelope.occurred_at, r.created_at);
    }
}
