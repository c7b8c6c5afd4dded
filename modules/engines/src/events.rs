//! Event kinds and payload contracts consumed by the engines
//!
//! Event types are vertical-agnostic string tags; the vertical lives in the
//! envelope. Unknown tags are a first-class variant so the consumer keeps
//! evolving without poisoning the stream.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

/// Event kinds the engines router dispatches on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    SaleRecorded,
    QuoteConverted,
    OrderStatusChanged,
    StockUpdated,
    SupplierPriceRegistered,
    /// Anything else; handled as a logged no-op
    Unknown(String),
}

impl EventKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "sale_recorded" => Self::SaleRecorded,
            "quote_converted" => Self::QuoteConverted,
            "order_status_changed" => Self::OrderStatusChanged,
            "stock_updated" => Self::StockUpdated,
            "supplier_price_registered" => Self::SupplierPriceRegistered,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// One line item of a recorded sale
#[derive(Debug, Clone, Deserialize)]
pub struct SaleItem {
    pub product_id: Uuid,
    pub quantity: Decimal,
    #[serde(default)]
    pub unit_price: Decimal,
    #[serde(default)]
    pub total_value: Option<Decimal>,
}

impl SaleItem {
    /// Total value of the line, derived when the producer omitted it
    pub fn total(&self) -> Decimal {
        self.total_value.unwrap_or(self.quantity * self.unit_price)
    }
}

/// Payload of a `sale_recorded` event
#[derive(Debug, Clone, Deserialize)]
pub struct SaleRecordedPayload {
    pub order_id: Uuid,
    #[serde(default)]
    pub client_id: Option<Uuid>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub items: Vec<SaleItem>,
}

/// Payload of a `stock_updated` event
#[derive(Debug, Clone, Deserialize)]
pub struct StockUpdatedPayload {
    pub product_id: Uuid,
    #[serde(default)]
    pub movement_type: Option<String>,
    pub quantity_delta: Decimal,
    #[serde(default)]
    pub quantity_after: Option<Decimal>,
    #[serde(default)]
    pub reference_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(EventKind::from_tag("sale_recorded"), EventKind::SaleRecorded);
        assert_eq!(EventKind::from_tag("stock_updated"), EventKind::StockUpdated);
        assert_eq!(
            EventKind::from_tag("whatsapp_customer_opted_out"),
            EventKind::Unknown("whatsapp_customer_opted_out".to_string())
        );
    }

    #[test]
    fn test_sale_payload_deserializes_numbers() {
        let payload: SaleRecordedPayload = serde_json::from_value(json!({
            "order_id": "1f4e8e9e-1111-2222-3333-444455556666",
            "items": [
                {"product_id": "1f4e8e9e-aaaa-bbbb-cccc-ddddeeeeffff", "quantity": 10, "unit_price": 150.0}
            ]
        }))
        .unwrap();

        assert_eq!(payload.items.len(), 1);
        assert_eq!(payload.items[0].quantity, Decimal::from(10));
        assert_eq!(payload.items[0].total(), Decimal::from(1500));
    }

    #[test]
    fn test_sale_item_explicit_total_wins() {
        let item: SaleItem = serde_json::from_value(json!({
            "product_id": "1f4e8e9e-aaaa-bbbb-cccc-ddddeeeeffff",
            "quantity": 2,
            "unit_price": 10,
            "total_value": 18.5
        }))
        .unwrap();
        assert_eq!(item.total().to_string(), "18.5");
    }
}
