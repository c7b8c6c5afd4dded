//! Event types and payload contracts of the messaging engine
//!
//! Events this engine PUBLISHES:
//! - `whatsapp_inbound_received` — customer sent a message (domain stream)
//! - `whatsapp_action_requested` — customer requested an action (domain stream)
//! - `whatsapp_customer_opted_out` — customer opted out (domain stream)
//! - `whatsapp_delivery_failed` / `whatsapp_delivery_confirmed` (domain stream)
//! - `whatsapp_outbound_queued` — internal outbound queue entry
//! - `whatsapp_dlq_entry` — parked envelope after exhausted retries
//!
//! Events CONSUMED from verticals (notification loop) keep their domain tags
//! (`quote_created`, `order_status_changed`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event types published by the messaging engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagingEventType {
    InboundReceived,
    OutboundQueued,
    ActionRequested,
    CustomerOptedOut,
    DeliveryFailed,
    DeliveryConfirmed,
    DlqEntry,
}

impl MessagingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InboundReceived => "whatsapp_inbound_received",
            Self::OutboundQueued => "whatsapp_outbound_queued",
            Self::ActionRequested => "whatsapp_action_requested",
            Self::CustomerOptedOut => "whatsapp_customer_opted_out",
            Self::DeliveryFailed => "whatsapp_delivery_failed",
            Self::DeliveryConfirmed => "whatsapp_delivery_confirmed",
            Self::DlqEntry => "whatsapp_dlq_entry",
        }
    }
}

/// Customer intents detectable from messages and button payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionIntent {
    CreateQuote,
    OrderStatus,
    TalkToHuman,
}

impl ActionIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateQuote => "create_quote",
            Self::OrderStatus => "order_status",
            Self::TalkToHuman => "talk_to_human",
        }
    }
}

/// Inbound message as published to the inbound stream by the webhook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundMessagePayload {
    pub message_id: String,
    pub from_phone: String,
    #[serde(default)]
    pub to_phone: Option<String>,
    #[serde(default)]
    pub phone_number_id: Option<String>,
    #[serde(default)]
    pub waba_id: Option<String>,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub media_id: Option<String>,
    #[serde(default)]
    pub media_mime_type: Option<String>,
    #[serde(default)]
    pub context_message_id: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub button_payload: Option<String>,
    #[serde(default)]
    pub button_text: Option<String>,
}

fn default_message_type() -> String {
    "text".to_string()
}

/// Delivery-status update as published to the inbound stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdatePayload {
    pub is_status_update: bool,
    pub provider_message_id: String,
    #[serde(default)]
    pub recipient_phone: Option<String>,
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Outbound message request as published to the outbound stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundMessagePayload {
    pub to_phone: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub template_language: Option<String>,
    #[serde(default)]
    pub template_components: Option<serde_json::Value>,
    #[serde(default)]
    pub buttons: Option<Vec<Button>>,
    #[serde(default)]
    pub header_text: Option<String>,
    #[serde(default)]
    pub footer_text: Option<String>,
    #[serde(default)]
    pub reply_to_message_id: Option<String>,
    #[serde(default)]
    pub triggered_by_event_id: Option<Uuid>,
}

/// A quick-reply button
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Button {
    pub id: String,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_payload_round_trip() {
        let payload = InboundMessagePayload {
            message_id: "wamid.1".to_string(),
            from_phone: "+5511999999999".to_string(),
            message_type: "text".to_string(),
            text: Some("oi".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&payload).unwrap();
        let back: InboundMessagePayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.message_id, "wamid.1");
        assert_eq!(back.text.as_deref(), Some("oi"));
    }

    #[test]
    fn test_outbound_payload_defaults() {
        let payload: OutboundMessagePayload = serde_json::from_value(json!({
            "to_phone": "+5511888887777"
        }))
        .unwrap();
        assert_eq!(payload.message_type, "text");
        assert!(payload.template_name.is_none());
    }
}
