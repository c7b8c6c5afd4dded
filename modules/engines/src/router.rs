//! Event router: applies an envelope's effects via the appropriate engines
//!
//! Each event type can be processed by multiple engines; all processing for
//! one envelope happens inside the caller's single database transaction.
//! Unknown event types are a logged no-op so messaging-originated or future
//! events flowing on the shared stream never poison the consumer group.

use event_bus::EventEnvelope;
use serde_json::{json, Map, Value};
use sqlx::{Postgres, Transaction};

use crate::engines::stock::AlertParams;
use crate::engines::{SalesEngine, StockEngine};
use crate::error::EngineError;
use crate::events::EventKind;

/// Routes events to the engines that handle them
pub struct EventRouter {
    stock: StockEngine,
    sales: SalesEngine,
}

impl EventRouter {
    pub fn new(params: AlertParams) -> Self {
        Self {
            stock: StockEngine::new(params),
            sales: SalesEngine::new(),
        }
    }

    /// Apply the envelope's effects inside `tx`, returning a result summary
    pub async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        envelope: &EventEnvelope,
    ) -> Result<Value, EngineError> {
        let mut engines = Map::new();

        match EventKind::from_tag(&envelope.event_type) {
            EventKind::SaleRecorded => {
                let stock_result = self.stock.process_sale_recorded(tx, envelope).await?;
                engines.insert("stock".to_string(), stock_result);

                let sales_result = self.sales.process_sale_recorded(tx, envelope).await?;
                engines.insert("sales".to_string(), sales_result);
            }
            EventKind::QuoteConverted => {
                engines.insert(
                    "sales".to_string(),
                    self.sales.process_quote_converted(envelope),
                );
            }
            EventKind::OrderStatusChanged => {
                tracing::info!(
                    tenant_id = %envelope.tenant_id,
                    order_id = ?envelope.payload.get("order_id"),
                    old_status = ?envelope.payload.get("old_status"),
                    new_status = ?envelope.payload.get("new_status"),
                    "Order status changed"
                );
                engines.insert("delivery".to_string(), json!({"status": "logged"}));
            }
            EventKind::StockUpdated => {
                let stock_result = self.stock.process_stock_updated(tx, envelope).await?;
                engines.insert("stock".to_string(), stock_result);
            }
            EventKind::SupplierPriceRegistered => {
                tracing::info!(
                    tenant_id = %envelope.tenant_id,
                    product_id = ?envelope.payload.get("product_id"),
                    "Supplier price registered"
                );
                engines.insert("pricing".to_string(), json!({"status": "logged"}));
            }
            EventKind::Unknown(tag) => {
                tracing::warn!(
                    event_type = %tag,
                    event_id = %envelope.event_id,
                    "No handlers for event type; ignoring"
                );
            }
        }

        Ok(json!({
            "event_id": envelope.event_id,
            "event_type": envelope.event_type,
            "engines": engines,
            "status": "success",
        }))
    }
}
