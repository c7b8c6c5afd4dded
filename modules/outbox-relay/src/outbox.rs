//! Outbox table access
//!
//! The outbox row is inserted by vertical domain code in the same transaction
//! as the business operation (see [`enqueue_event`]); the relay is the only
//! writer of `published_at`.

use chrono::{DateTime, Utc};
use event_bus::EventEnvelope;
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

/// An unpublished outbox row selected for relaying
#[derive(Debug, FromRow)]
pub struct OutboxRow {
    pub id: i64,
    pub event_id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

/// Enqueue an event into the transactional outbox
///
/// Called by domain code inside the transaction that performs the state
/// change. A background relay picks the row up and publishes it to the bus.
pub async fn enqueue_event(
    tx: &mut Transaction<'_, Postgres>,
    envelope: &EventEnvelope,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO event_outbox
            (event_id, tenant_id, event_type, payload, version, status, created_at)
        VALUES ($1, $2, $3, $4, $5, 'pending', $6)
        "#,
    )
    .bind(envelope.event_id)
    .bind(envelope.tenant_id)
    .bind(&envelope.event_type)
    .bind(&envelope.payload)
    .bind(envelope.version)
    .bind(envelope.occurred_at)
    .execute(&mut **tx)
    .await?;

    tracing::debug!(
        event_id = %envelope.event_id,
        event_type = %envelope.event_type,
        "Event enqueued to outbox"
    );

    Ok(())
}

/// Fetch unpublished outbox rows with row-level locks
///
/// `FOR UPDATE SKIP LOCKED` lets multiple relay replicas partition the
/// backlog without blocking each other. Rows stay locked until the caller's
/// transaction commits.
pub async fn fetch_unpublished(
    tx: &mut Transaction<'_, Postgres>,
    limit: i64,
) -> Result<Vec<OutboxRow>, sqlx::Error> {
    sqlx::query_as::<_, OutboxRow>(
        r#"
        SELECT id, event_id, tenant_id, event_type, payload, version, created_at
        FROM event_outbox
        WHERE published_at IS NULL
          AND status IN ('pending', 'processing', 'processed')
        ORDER BY created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(limit)
    .fetch_all(&mut **tx)
    .await
}

/// Mark a set of outbox rows as published
pub async fn mark_published(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[i64],
) -> Result<u64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        r#"
        UPDATE event_outbox
        SET published_at = now()
        WHERE id = ANY($1)
        "#,
    )
    .bind(ids)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}
