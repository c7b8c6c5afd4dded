//! Stock alert and replenishment suggestion projections

use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

pub struct StockAlertUpsert<'a> {
    pub tenant_id: Uuid,
    pub vertical: &'a str,
    pub product_id: Uuid,
    pub alert_type: &'a str,
    pub risk_level: &'a str,
    pub current_stock: Decimal,
    pub minimum_stock: Decimal,
    pub days_until_rupture: Option<i32>,
    pub explanation: &'a str,
    pub payload: serde_json::Value,
}

/// Upsert the single active alert row for `(tenant, product)`
///
/// An update replaces all assessment fields and bumps `updated_at`.
pub async fn upsert_stock_alert(
    tx: &mut Transaction<'_, Postgres>,
    alert: &StockAlertUpsert<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO engine_stock_alerts
            (tenant_id, vertical, product_id, alert_type, risk_level,
             current_stock, minimum_stock, days_until_rupture, status, explanation, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'active', $9, $10)
        ON CONFLICT (tenant_id, product_id) WHERE status = 'active'
        DO UPDATE SET
            alert_type = EXCLUDED.alert_type,
            risk_level = EXCLUDED.risk_level,
            current_stock = EXCLUDED.current_stock,
            minimum_stock = EXCLUDED.minimum_stock,
            days_until_rupture = EXCLUDED.days_until_rupture,
            explanation = EXCLUDED.explanation,
            payload = EXCLUDED.payload,
            updated_at = now()
        "#,
    )
    .bind(alert.tenant_id)
    .bind(alert.vertical)
    .bind(alert.product_id)
    .bind(alert.alert_type)
    .bind(alert.risk_level)
    .bind(alert.current_stock)
    .bind(alert.minimum_stock)
    .bind(alert.days_until_rupture)
    .bind(alert.explanation)
    .bind(&alert.payload)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Resolve the active alert for a product, if any
pub async fn resolve_stock_alert(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    product_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let outcome = sqlx::query(
        r#"
        UPDATE engine_stock_alerts
        SET status = 'resolved', updated_at = now()
        WHERE tenant_id = $1 AND product_id = $2 AND status = 'active'
        "#,
    )
    .bind(tenant_id)
    .bind(product_id)
    .execute(&mut **tx)
    .await?;
    Ok(outcome.rows_affected())
}

/// Upsert the single active replenishment suggestion for `(tenant, product)`
pub async fn upsert_replenishment_suggestion(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    vertical: &str,
    product_id: Uuid,
    suggested_quantity: Decimal,
    priority: &str,
    explanation: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO engine_replenishment_suggestions
            (tenant_id, vertical, product_id, suggested_quantity, priority, status, explanation)
        VALUES ($1, $2, $3, $4, $5, 'active', $6)
        ON CONFLICT (tenant_id, product_id) WHERE status = 'active'
        DO UPDATE SET
            suggested_quantity = EXCLUDED.suggested_quantity,
            priority = EXCLUDED.priority,
            explanation = EXCLUDED.explanation,
            updated_at = now()
        "#,
    )
    .bind(tenant_id)
    .bind(vertical)
    .bind(product_id)
    .bind(suggested_quantity)
    .bind(priority)
    .bind(explanation)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
