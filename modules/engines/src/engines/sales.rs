//! Sales intelligence engine
//!
//! Computes complementary-product suggestions from co-occurrence in the sales
//! facts table. No vertical table access.

use event_bus::EventEnvelope;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::engines::ANALYSIS_WINDOW_DAYS;
use crate::error::EngineError;
use crate::events::SaleRecordedPayload;
use crate::repos::{facts_repo, suggestions_repo};

/// Suggestion priority tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Priority tier for a co-occurrence frequency percentage.
///
/// Frequencies below 20% do not materialize a suggestion at all (boundary
/// inclusive: exactly 20 does). 70%+ is high, 40%+ medium, the rest low.
pub fn suggestion_priority(frequency: Decimal) -> Option<Priority> {
    if frequency < Decimal::from(20) {
        return None;
    }
    Some(if frequency >= Decimal::from(70) {
        Priority::High
    } else if frequency >= Decimal::from(40) {
        Priority::Medium
    } else {
        Priority::Low
    })
}

/// Sales intelligence engine
pub struct SalesEngine;

impl SalesEngine {
    pub fn new() -> Self {
        Self
    }

    /// Apply a `sale_recorded` event: ensure facts exist, then recompute
    /// complementary suggestions for the order's products.
    pub async fn process_sale_recorded(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        envelope: &EventEnvelope,
    ) -> Result<Value, EngineError> {
        let payload: SaleRecordedPayload = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| EngineError::Payload(format!("sale_recorded: {e}")))?;

        let occurred_at = payload.delivered_at.unwrap_or(envelope.occurred_at);

        // Facts may already exist from the stock engine in this transaction;
        // the insert is idempotent on the derived event id either way.
        for item in &payload.items {
            let item_event_id =
                Uuid::new_v5(&envelope.event_id, item.product_id.to_string().as_bytes());
            facts_repo::record_sales_fact(
                tx,
                &facts_repo::NewSalesFact {
                    tenant_id: envelope.tenant_id,
                    vertical: &envelope.vertical,
                    event_id: item_event_id,
                    order_id: payload.order_id,
                    product_id: item.product_id,
                    client_id: payload.client_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    total_value: item.total(),
                    occurred_at,
                    payload: json!({
                        "order_id": payload.order_id,
                        "quantity": item.quantity,
                        "unit_price": item.unit_price,
                    }),
                },
            )
            .await?;
        }

        let product_ids: Vec<Uuid> = payload.items.iter().map(|i| i.product_id).collect();
        let suggestions_updated = self
            .update_associations(tx, envelope, &product_ids)
            .await?;

        tracing::info!(
            tenant_id = %envelope.tenant_id,
            order_id = %payload.order_id,
            products = product_ids.len(),
            suggestions_updated = suggestions_updated,
            "Sales engine processed sale_recorded"
        );

        Ok(json!({
            "order_id": payload.order_id,
            "products": product_ids.len(),
            "suggestions_updated": suggestions_updated,
        }))
    }

    /// Apply a `quote_converted` event: record-only, suggestions are computed
    /// when the sale is recorded (delivered).
    pub fn process_quote_converted(&self, envelope: &EventEnvelope) -> Value {
        let quote_id = envelope.payload.get("quote_id").cloned();
        let order_id = envelope.payload.get("order_id").cloned();

        tracing::info!(
            tenant_id = %envelope.tenant_id,
            quote_id = ?quote_id,
            order_id = ?order_id,
            "Sales engine recorded quote_converted"
        );

        json!({
            "quote_id": quote_id,
            "order_id": order_id,
            "status": "recorded",
        })
    }

    /// Recompute complementary suggestions for each affected product
    async fn update_associations(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        envelope: &EventEnvelope,
        product_ids: &[Uuid],
    ) -> Result<usize, EngineError> {
        let mut suggestions_updated = 0usize;

        for &product_id in product_ids {
            let order_ids = facts_repo::orders_containing_product(
                tx,
                envelope.tenant_id,
                product_id,
                ANALYSIS_WINDOW_DAYS,
            )
            .await?;

            if order_ids.is_empty() {
                continue;
            }

            let total_orders = order_ids.len() as i64;
            let counts =
                facts_repo::co_occurrence_counts(tx, envelope.tenant_id, &order_ids, product_id)
                    .await?;

            for (other_product_id, count) in counts {
                let frequency =
                    Decimal::from(count) * Decimal::from(100) / Decimal::from(total_orders);
                let Some(priority) = suggestion_priority(frequency) else {
                    continue;
                };

                let explanation = format!(
                    "{:.0}% of orders containing this product also contain the suggested product",
                    frequency
                );

                suggestions_repo::upsert_sales_suggestion(
                    tx,
                    &suggestions_repo::SalesSuggestionUpsert {
                        tenant_id: envelope.tenant_id,
                        vertical: &envelope.vertical,
                        suggestion_type: "complementary",
                        source_product_id: product_id,
                        suggested_product_id: other_product_id,
                        frequency,
                        priority: priority.as_str(),
                        explanation: &explanation,
                        payload: json!({
                            "total_orders": total_orders,
                            "co_occurrences": count,
                        }),
                    },
                )
                .await?;
                suggestions_updated += 1;
            }
        }

        Ok(suggestions_updated)
    }
}

impl Default for SalesEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_below_threshold_is_not_materialized() {
        assert_eq!(suggestion_priority(dec("19.99")), None);
        assert_eq!(suggestion_priority(Decimal::ZERO), None);
    }

    #[test]
    fn test_exactly_twenty_percent_materializes_low() {
        // 2 of 10 orders → 20.0%
        let frequency = Decimal::from(2) * Decimal::from(100) / Decimal::from(10);
        assert_eq!(suggestion_priority(frequency), Some(Priority::Low));
    }

    #[test]
    fn test_priority_tiers() {
        assert_eq!(suggestion_priority(dec("39.9")), Some(Priority::Low));
        assert_eq!(suggestion_priority(dec("40")), Some(Priority::Medium));
        assert_eq!(suggestion_priority(dec("69.9")), Some(Priority::Medium));
        assert_eq!(suggestion_priority(dec("70")), Some(Priority::High));
        assert_eq!(suggestion_priority(dec("100")), Some(Priority::High));
    }

    #[test]
    fn test_frequency_updates_with_new_orders() {
        // 3 of 11 orders ≈ 27.27% → still low priority, updated frequency
        let frequency = Decimal::from(3) * Decimal::from(100) / Decimal::from(11);
        assert!(frequency > dec("27.2") && frequency < dec("27.3"));
        assert_eq!(suggestion_priority(frequency), Some(Priority::Low));
    }
}
