//! Facts repositories: append-only sales and stock movements
//!
//! Facts are the data boundary between verticals and engines. Inserts are
//! idempotent on `event_id` so partial retries of a multi-item event never
//! duplicate rows.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

pub struct NewSalesFact<'a> {
    pub tenant_id: Uuid,
    pub vertical: &'a str,
    pub event_id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub client_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_value: Decimal,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

pub struct NewStockFact<'a> {
    pub tenant_id: Uuid,
    pub vertical: &'a str,
    pub event_id: Uuid,
    pub product_id: Uuid,
    pub movement_type: &'a str,
    pub quantity_delta: Decimal,
    pub quantity_after: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
    pub reference_id: Option<Uuid>,
    pub payload: serde_json::Value,
}

/// Record a sales fact; returns `false` when the event_id was already recorded
pub async fn record_sales_fact(
    tx: &mut Transaction<'_, Postgres>,
    fact: &NewSalesFact<'_>,
) -> Result<bool, sqlx::Error> {
    let outcome = sqlx::query(
        r#"
        INSERT INTO engine_sales_facts
            (tenant_id, vertical, event_id, order_id, product_id, client_id,
             quantity, unit_price, total_value, occurred_at, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(fact.tenant_id)
    .bind(fact.vertical)
    .bind(fact.event_id)
    .bind(fact.order_id)
    .bind(fact.product_id)
    .bind(fact.client_id)
    .bind(fact.quantity)
    .bind(fact.unit_price)
    .bind(fact.total_value)
    .bind(fact.occurred_at)
    .bind(&fact.payload)
    .execute(&mut **tx)
    .await?;

    Ok(outcome.rows_affected() > 0)
}

/// Record a stock fact; returns `false` when the event_id was already recorded
pub async fn record_stock_fact(
    tx: &mut Transaction<'_, Postgres>,
    fact: &NewStockFact<'_>,
) -> Result<bool, sqlx::Error> {
    let outcome = sqlx::query(
        r#"
        INSERT INTO engine_stock_facts
            (tenant_id, vertical, event_id, product_id, movement_type,
             quantity_delta, quantity_after, occurred_at, reference_id, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(fact.tenant_id)
    .bind(fact.vertical)
    .bind(fact.event_id)
    .bind(fact.product_id)
    .bind(fact.movement_type)
    .bind(fact.quantity_delta)
    .bind(fact.quantity_after)
    .bind(fact.occurred_at)
    .bind(fact.reference_id)
    .bind(&fact.payload)
    .execute(&mut **tx)
    .await?;

    Ok(outcome.rows_affected() > 0)
}

/// Current stock level for a product, from facts only
///
/// Latest known `quantity_after` wins; products with no absolute snapshot
/// fall back to the sum of deltas.
pub async fn current_stock(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    product_id: Uuid,
) -> Result<Decimal, sqlx::Error> {
    let latest: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT quantity_after
        FROM engine_stock_facts
        WHERE tenant_id = $1 AND product_id = $2 AND quantity_after IS NOT NULL
        ORDER BY occurred_at DESC, created_at DESC
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .bind(product_id)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(stock) = latest {
        return Ok(stock);
    }

    let total_delta: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT SUM(quantity_delta)
        FROM engine_stock_facts
        WHERE tenant_id = $1 AND product_id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(product_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(total_delta.unwrap_or(Decimal::ZERO))
}

/// Average daily sales of a product over the trailing window
pub async fn average_daily_sales(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    product_id: Uuid,
    days: i64,
) -> Result<Decimal, sqlx::Error> {
    if days <= 0 {
        return Ok(Decimal::ZERO);
    }
    let date_limit = Utc::now() - Duration::days(days);

    let total: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT SUM(quantity)
        FROM engine_sales_facts
        WHERE tenant_id = $1 AND product_id = $2 AND occurred_at >= $3
        "#,
    )
    .bind(tenant_id)
    .bind(product_id)
    .bind(date_limit)
    .fetch_one(&mut **tx)
    .await?;

    Ok(total.unwrap_or(Decimal::ZERO) / Decimal::from(days))
}

/// Distinct order ids containing a product within the trailing window
pub async fn orders_containing_product(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    product_id: Uuid,
    days: i64,
) -> Result<Vec<Uuid>, sqlx::Error> {
    let date_limit = Utc::now() - Duration::days(days);

    sqlx::query_scalar(
        r#"
        SELECT DISTINCT order_id
        FROM engine_sales_facts
        WHERE tenant_id = $1 AND product_id = $2 AND occurred_at >= $3
        "#,
    )
    .bind(tenant_id)
    .bind(product_id)
    .bind(date_limit)
    .fetch_all(&mut **tx)
    .await
}

/// Co-occurrence counts: for the given orders, how many contain each other product
pub async fn co_occurrence_counts(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    order_ids: &[Uuid],
    exclude_product_id: Uuid,
) -> Result<Vec<(Uuid, i64)>, sqlx::Error> {
    if order_ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<(Uuid, i64)> = sqlx::query_as(
        r#"
        SELECT product_id, COUNT(DISTINCT order_id) AS orders
        FROM engine_sales_facts
        WHERE tenant_id = $1 AND order_id = ANY($2) AND product_id <> $3
        GROUP BY product_id
        "#,
    )
    .bind(tenant_id)
    .bind(order_ids)
    .bind(exclude_product_id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows)
}
