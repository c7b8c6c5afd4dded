//! Processed-event keys for exactly-once effects
//!
//! Existence of a row means "already applied; skip". The insert and the
//! projection writes for an event share one transaction; the insert's
//! `ON CONFLICT DO NOTHING` is the atomic check-and-set that resolves
//! concurrent replicas.

use event_bus::EventEnvelope;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Check if an event has already been processed (idempotency pre-check)
pub async fn exists(pool: &PgPool, event_id: Uuid) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM engine_processed_events WHERE event_id = $1)",
    )
    .bind(event_id)
    .fetch_one(pool)
    .await
}

/// Insert the processed-event key within the event's transaction
///
/// Returns `true` if this call claimed the event, `false` if another worker
/// already did (caller must roll back and treat the event as a no-op).
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    envelope: &EventEnvelope,
    result: Option<&serde_json::Value>,
) -> Result<bool, sqlx::Error> {
    let outcome = sqlx::query(
        r#"
        INSERT INTO engine_processed_events
            (event_id, tenant_id, vertical, event_type, processed_at, result)
        VALUES ($1, $2, $3, $4, now(), $5)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(envelope.event_id)
    .bind(envelope.tenant_id)
    .bind(&envelope.vertical)
    .bind(&envelope.event_type)
    .bind(result)
    .execute(&mut **tx)
    .await?;

    Ok(outcome.rows_affected() > 0)
}
