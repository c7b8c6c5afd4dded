//! Stock intelligence engine
//!
//! Computes rupture-risk alerts and replenishment suggestions from the
//! engine facts tables only. No vertical table access.

use event_bus::EventEnvelope;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::engines::ANALYSIS_WINDOW_DAYS;
use crate::error::EngineError;
use crate::events::{SaleRecordedPayload, StockUpdatedPayload};
use crate::repos::{alerts_repo, facts_repo};

/// Rupture risk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Tunable parameters of the minimum-stock formula
#[derive(Debug, Clone)]
pub struct AlertParams {
    pub lead_time_days: u32,
    pub safety_percent: Decimal,
}

impl Default for AlertParams {
    fn default() -> Self {
        Self {
            lead_time_days: 7,
            safety_percent: Decimal::from(20),
        }
    }
}

/// Outcome of assessing one product's stock position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertAssessment {
    pub minimum_stock: Decimal,
    pub days_until_rupture: i32,
    pub risk: RiskLevel,
}

/// Assess a product's stock position against its consumption rate.
///
/// Returns `None` when no alert is warranted: no sales history, or stock at or
/// above the minimum. `minimum_stock = avg_daily_sales × lead_time ×
/// (1 + safety/100)`; risk is `high` when rupture is ≤ 7 days away (boundary
/// inclusive), `medium` ≤ 14, `low` otherwise.
pub fn assess_stock(
    current_stock: Decimal,
    avg_daily_sales: Decimal,
    params: &AlertParams,
) -> Option<AlertAssessment> {
    if avg_daily_sales <= Decimal::ZERO {
        return None;
    }

    let minimum_stock = avg_daily_sales
        * Decimal::from(params.lead_time_days)
        * (Decimal::ONE + params.safety_percent / Decimal::from(100));

    if current_stock >= minimum_stock {
        return None;
    }

    let days_until_rupture = (current_stock / avg_daily_sales)
        .floor()
        .to_i32()
        .unwrap_or(i32::MAX);

    let risk = if days_until_rupture <= 7 {
        RiskLevel::High
    } else if days_until_rupture <= 14 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    Some(AlertAssessment {
        minimum_stock,
        days_until_rupture,
        risk,
    })
}

/// Stock intelligence engine
pub struct StockEngine {
    params: AlertParams,
}

impl StockEngine {
    pub fn new(params: AlertParams) -> Self {
        Self { params }
    }

    /// Apply a `sale_recorded` event: record facts and recompute alerts.
    ///
    /// Per-item event ids are derived with UUIDv5 over the outer event id so
    /// partial retries of a multi-item event stay idempotent.
    pub async fn process_sale_recorded(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        envelope: &EventEnvelope,
    ) -> Result<Value, EngineError> {
        let payload: SaleRecordedPayload = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| EngineError::Payload(format!("sale_recorded: {e}")))?;

        let occurred_at = payload.delivered_at.unwrap_or(envelope.occurred_at);
        let mut items_processed = 0usize;
        let mut alerts_upserted = 0usize;

        for item in &payload.items {
            let item_event_id =
                Uuid::new_v5(&envelope.event_id, item.product_id.to_string().as_bytes());

            let recorded = facts_repo::record_sales_fact(
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

            if !recorded {
                // Fact already present from an earlier delivery of this event
                continue;
            }

            let before = facts_repo::current_stock(tx, envelope.tenant_id, item.product_id).await?;
            let after = (before - item.quantity).max(Decimal::ZERO);

            let stock_event_id = Uuid::new_v5(
                &envelope.event_id,
                format!("stock_{}", item.product_id).as_bytes(),
            );
            facts_repo::record_stock_fact(
                tx,
                &facts_repo::NewStockFact {
                    tenant_id: envelope.tenant_id,
                    vertical: &envelope.vertical,
                    event_id: stock_event_id,
                    product_id: item.product_id,
                    movement_type: "sale",
                    quantity_delta: -item.quantity,
                    quantity_after: Some(after),
                    occurred_at,
                    reference_id: Some(payload.order_id),
                    payload: json!({
                        "order_id": payload.order_id,
                        "quantity_sold": item.quantity,
                    }),
                },
            )
            .await?;

            if self
                .recompute_alert(tx, envelope.tenant_id, &envelope.vertical, item.product_id)
                .await?
            {
                alerts_upserted += 1;
            }

            items_processed += 1;
        }

        tracing::info!(
            tenant_id = %envelope.tenant_id,
            order_id = %payload.order_id,
            items_processed = items_processed,
            alerts_upserted = alerts_upserted,
            "Stock engine processed sale_recorded"
        );

        Ok(json!({
            "order_id": payload.order_id,
            "items_processed": items_processed,
            "alerts_upserted": alerts_upserted,
        }))
    }

    /// Apply a `stock_updated` event: append the movement fact
    pub async fn process_stock_updated(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        envelope: &EventEnvelope,
    ) -> Result<Value, EngineError> {
        let payload: StockUpdatedPayload = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| EngineError::Payload(format!("stock_updated: {e}")))?;

        let movement_type = payload.movement_type.as_deref().unwrap_or("adjustment");
        if !matches!(movement_type, "received" | "adjustment") {
            return Err(EngineError::Payload(format!(
                "stock_updated: unsupported movement_type {movement_type}"
            )));
        }

        let recorded = facts_repo::record_stock_fact(
            tx,
            &facts_repo::NewStockFact {
                tenant_id: envelope.tenant_id,
                vertical: &envelope.vertical,
                event_id: envelope.event_id,
                product_id: payload.product_id,
                movement_type,
                quantity_delta: payload.quantity_delta,
                quantity_after: payload.quantity_after,
                occurred_at: envelope.occurred_at,
                reference_id: payload.reference_id,
                payload: envelope.payload.clone(),
            },
        )
        .await?;

        Ok(json!({
            "product_id": payload.product_id,
            "movement_type": movement_type,
            "recorded": recorded,
        }))
    }

    /// Recompute the single active alert row for a product.
    ///
    /// Returns whether an alert is active after the recomputation.
    async fn recompute_alert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        vertical: &str,
        product_id: Uuid,
    ) -> Result<bool, EngineError> {
        let current_stock = facts_repo::current_stock(tx, tenant_id, product_id).await?;
        let avg_daily_sales =
            facts_repo::average_daily_sales(tx, tenant_id, product_id, ANALYSIS_WINDOW_DAYS)
                .await?;

        let Some(assessment) = assess_stock(current_stock, avg_daily_sales, &self.params) else {
            alerts_repo::resolve_stock_alert(tx, tenant_id, product_id).await?;
            return Ok(false);
        };

        let explanation = format!(
            "current stock {:.2}, avg daily sales {:.2}/day, lead time {} days, \
             suggested minimum stock {:.2}; estimated rupture in {} days",
            current_stock,
            avg_daily_sales,
            self.params.lead_time_days,
            assessment.minimum_stock,
            assessment.days_until_rupture,
        );

        alerts_repo::upsert_stock_alert(
            tx,
            &alerts_repo::StockAlertUpsert {
                tenant_id,
                vertical,
                product_id,
                alert_type: "rupture",
                risk_level: assessment.risk.as_str(),
                current_stock,
                minimum_stock: assessment.minimum_stock,
                days_until_rupture: Some(assessment.days_until_rupture),
                explanation: &explanation,
                payload: json!({
                    "avg_daily_sales": avg_daily_sales,
                    "lead_time_days": self.params.lead_time_days,
                    "safety_stock_percent": self.params.safety_percent,
                }),
            },
        )
        .await?;

        let shortfall = (assessment.minimum_stock - current_stock).ceil();
        alerts_repo::upsert_replenishment_suggestion(
            tx,
            tenant_id,
            vertical,
            product_id,
            shortfall,
            assessment.risk.as_str(),
            &format!(
                "replenish {:.0} units to reach the suggested minimum of {:.2}",
                shortfall, assessment.minimum_stock
            ),
        )
        .await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_no_alert_without_sales_history() {
        assert_eq!(
            assess_stock(dec("100"), Decimal::ZERO, &AlertParams::default()),
            None
        );
        assert_eq!(
            assess_stock(dec("100"), dec("-1"), &AlertParams::default()),
            None
        );
    }

    #[test]
    fn test_no_alert_when_stock_meets_minimum() {
        // avg 5/day → minimum = 5 * 7 * 1.2 = 42
        assert_eq!(
            assess_stock(dec("42"), dec("5"), &AlertParams::default()),
            None
        );
        assert_eq!(
            assess_stock(dec("100"), dec("5"), &AlertParams::default()),
            None
        );
    }

    #[test]
    fn test_alert_fields_match_formula() {
        // Scenario from the sale flow: stock 40, avg 5 → minimum 42, rupture in 8 days
        let assessment = assess_stock(dec("40"), dec("5"), &AlertParams::default()).unwrap();
        assert_eq!(assessment.minimum_stock, dec("42.0"));
        assert_eq!(assessment.days_until_rupture, 8);
        assert_eq!(assessment.risk, RiskLevel::Medium);
    }

    #[test]
    fn test_rupture_at_seven_days_is_high_risk() {
        // 35 / 5 = exactly 7 days → boundary inclusive
        let assessment = assess_stock(dec("35"), dec("5"), &AlertParams::default()).unwrap();
        assert_eq!(assessment.days_until_rupture, 7);
        assert_eq!(assessment.risk, RiskLevel::High);
    }

    #[test]
    fn test_rupture_at_fourteen_days_is_medium_risk() {
        let params = AlertParams {
            lead_time_days: 30,
            safety_percent: Decimal::ZERO,
        };
        // minimum = 150; 70/5 = 14 days
        let assessment = assess_stock(dec("70"), dec("5"), &params).unwrap();
        assert_eq!(assessment.days_until_rupture, 14);
        assert_eq!(assessment.risk, RiskLevel::Medium);

        // 75/5 = 15 days → low
        let assessment = assess_stock(dec("75"), dec("5"), &params).unwrap();
        assert_eq!(assessment.risk, RiskLevel::Low);
    }

    #[test]
    fn test_fractional_rupture_days_floor() {
        // 39 / 5 = 7.8 → floor 7 → high
        let assessment = assess_stock(dec("39"), dec("5"), &AlertParams::default()).unwrap();
        assert_eq!(assessment.days_until_rupture, 7);
        assert_eq!(assessment.risk, RiskLevel::High);
    }

    #[test]
    fn test_per_item_event_id_is_deterministic() {
        let event_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();
        let a = Uuid::new_v5(&event_id, product_id.to_string().as_bytes());
        let b = Uuid::new_v5(&event_id, product_id.to_string().as_bytes());
        assert_eq!(a, b);

        let other = Uuid::new_v5(&event_id, format!("stock_{product_id}").as_bytes());
        assert_ne!(a, other);
    }
}
