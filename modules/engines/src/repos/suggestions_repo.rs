//! Sales suggestion projections (co-occurrence based)

use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

pub struct SalesSuggestionUpsert<'a> {
    pub tenant_id: Uuid,
    pub vertical: &'a str,
    pub suggestion_type: &'a str,
    pub source_product_id: Uuid,
    pub suggested_product_id: Uuid,
    pub frequency: Decimal,
    pub priority: &'a str,
    pub explanation: &'a str,
    pub payload: serde_json::Value,
}

/// Upsert the active suggestion row for `(tenant, type, source, suggested)`
pub async fn upsert_sales_suggestion(
    tx: &mut Transaction<'_, Postgres>,
    suggestion: &SalesSuggestionUpsert<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO engine_sales_suggestions
            (tenant_id, vertical, suggestion_type, source_product_id, suggested_product_id,
             frequency, priority, status, explanation, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', $8, $9)
        ON CONFLICT (tenant_id, suggestion_type, source_product_id, suggested_product_id)
            WHERE status = 'active'
        DO UPDATE SET
            frequency = EXCLUDED.frequency,
            priority = EXCLUDED.priority,
            explanation = EXCLUDED.explanation,
            payload = EXCLUDED.payload,
            updated_at = now()
        "#,
    )
    .bind(suggestion.tenant_id)
    .bind(suggestion.vertical)
    .bind(suggestion.suggestion_type)
    .bind(suggestion.source_product_id)
    .bind(suggestion.suggested_product_id)
    .bind(suggestion.frequency)
    .bind(suggestion.priority)
    .bind(suggestion.explanation)
    .bind(&suggestion.payload)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
