//! Vertical-notification handling
//!
//! Consumes the domain stream under the notifier group and turns an
//! allow-list of vertical events into templated outbound messages. Strictly
//! best-effort: the caller acks every message whatever the outcome.

use event_bus::EventEnvelope;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::contracts::OutboundMessagePayload;
use crate::error::MessagingError;
use crate::providers::templates;
use crate::streams::MessagingProducer;

/// Vertical events that trigger a customer notification, and their templates
const NOTIFY_TEMPLATES: &[(&str, &str)] = &[
    ("quote_created", "quote_created_template"),
    ("quote_sent", "quote_sent_template"),
    ("order_created", "order_created_template"),
    ("order_status_changed", "order_status_template"),
    ("delivery_started", "delivery_started_template"),
    ("delivery_completed", "delivery_completed_template"),
];

/// Template name for an event type, if it is on the allow-list
pub fn template_for(event_type: &str) -> Option<&'static str> {
    NOTIFY_TEMPLATES
        .iter()
        .find(|(tag, _)| *tag == event_type)
        .map(|(_, template)| *template)
}

/// Extract template variables from an event payload.
///
/// Producers vary in field naming; the extraction accepts the known aliases
/// and leaves missing variables empty.
pub fn extract_template_variables(payload: &Value, template_name: &str) -> HashMap<String, String> {
    let mut variables = HashMap::new();

    let get = |keys: &[&str]| -> Option<String> {
        keys.iter().find_map(|key| {
            payload.get(*key).and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        })
    };

    if let Some(name) = get(&["customer_name", "client_name"]) {
        variables.insert("customer_name".to_string(), name);
    }

    if template_name.contains("quote") {
        if let Some(number) = get(&["quote_number", "numero"]) {
            variables.insert("quote_number".to_string(), number);
        }
        if let Some(total) = get(&["total_value", "valor_total"]) {
            variables.insert("total_value".to_string(), total);
        }
    }

    if template_name.contains("order") {
        if let Some(number) = get(&["order_number", "numero"]) {
            variables.insert("order_number".to_string(), number);
        }
        if let Some(status) = get(&["new_status", "status"]) {
            variables.insert("status".to_string(), status);
        }
    }

    if template_name.contains("delivery") {
        if let Some(number) = get(&["order_number", "numero"]) {
            variables.insert("order_number".to_string(), number);
        }
        if let Some(eta) = get(&["estimated_time"]) {
            variables.insert("estimated_time".to_string(), eta);
        }
    }

    variables
}

pub struct NotificationHandler {
    producer: Arc<MessagingProducer>,
}

impl NotificationHandler {
    pub fn new(producer: Arc<MessagingProducer>) -> Self {
        Self { producer }
    }

    /// Turn one vertical event into an outbound template message, if eligible
    pub async fn handle_domain_event(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<Value, MessagingError> {
        let Some(template_name) = template_for(&envelope.event_type) else {
            return Ok(json!({"status": "skipped", "reason": "event_type_not_configured"}));
        };

        let Some(customer_phone) = envelope
            .payload
            .get("customer_phone")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        else {
            return Ok(json!({"status": "skipped", "reason": "no_customer_phone"}));
        };

        let Some(template) = templates::get(template_name) else {
            tracing::warn!(template = %template_name, "Template not found");
            return Ok(json!({"status": "skipped", "reason": "template_not_found"}));
        };

        let variables = extract_template_variables(&envelope.payload, template_name);

        let outbound = OutboundMessagePayload {
            to_phone: customer_phone.to_string(),
            message_type: "template".to_string(),
            template_name: Some(template_name.to_string()),
            template_language: Some("pt_BR".to_string()),
            template_components: Some(template.build_components(&variables)),
            triggered_by_event_id: Some(envelope.event_id),
            ..Default::default()
        };

        self.producer
            .publish_outbound(
                envelope.tenant_id,
                serde_json::to_value(&outbound)
                    .map_err(|e| MessagingError::Payload(e.to_string()))?,
                envelope.correlation_id.clone(),
            )
            .await?;

        tracing::info!(
            event_type = %envelope.event_type,
            template = %template_name,
            to_phone = %customer_phone,
            "Queued notification"
        );

        Ok(json!({
            "status": "queued",
            "template": template_name,
            "to_phone": customer_phone,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::{InMemoryBus, StreamBus};
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_allow_list() {
        assert_eq!(template_for("quote_created"), Some("quote_created_template"));
        assert_eq!(
            template_for("order_status_changed"),
            Some("order_status_template")
        );
        assert_eq!(template_for("sale_recorded"), None);
        assert_eq!(template_for("whatsapp_customer_opted_out"), None);
    }

    #[test]
    fn test_variable_extraction_with_aliases() {
        let payload = json!({
            "client_name": "Maria",
            "numero": "PED-42",
            "new_status": "em entrega",
        });
        let variables = extract_template_variables(&payload, "order_status_template");
        assert_eq!(variables.get("customer_name").unwrap(), "Maria");
        assert_eq!(variables.get("order_number").unwrap(), "PED-42");
        assert_eq!(variables.get("status").unwrap(), "em entrega");
    }

    #[test]
    fn test_numeric_values_are_stringified() {
        let payload = json!({"quote_number": "ORC-7", "total_value": 1534.5});
        let variables = extract_template_variables(&payload, "quote_created_template");
        assert_eq!(variables.get("total_value").unwrap(), "1534.5");
    }

    #[tokio::test]
    async fn test_eligible_event_queues_outbound_template() {
        let bus = std::sync::Arc::new(InMemoryBus::new());
        bus.ensure_group(crate::streams::OUTBOUND_STREAM, crate::streams::ENGINE_GROUP, "0")
            .await
            .unwrap();
        let producer = Arc::new(MessagingProducer::new(bus.clone(), "materials", 1000));
        let handler = NotificationHandler::new(producer);

        let envelope = EventEnvelope::new(
            "order_status_changed",
            Uuid::new_v4(),
            "materials",
            json!({
                "customer_phone": "+5511999999999",
                "customer_name": "Maria",
                "order_number": "PED-42",
                "new_status": "em entrega",
            }),
        );

        let result = handler.handle_domain_event(&envelope).await.unwrap();
        assert_eq!(result["status"], "queued");

        let batch = bus
            .read_group(
                &[crate::streams::OUTBOUND_STREAM],
                crate::streams::ENGINE_GROUP,
                "t",
                10,
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);

        let outbound = EventEnvelope::from_fields(&batch[0].id, &batch[0].fields).unwrap();
        assert_eq!(outbound.event_type, "whatsapp_outbound_queued");
        assert_eq!(outbound.payload["message_type"], "template");
        assert_eq!(outbound.payload["template_name"], "order_status_template");
        assert_eq!(
            outbound.payload["triggered_by_event_id"],
            envelope.event_id.to_string()
        );
    }

    #[tokio::test]
    async fn test_event_without_phone_is_skipped() {
        let bus = std::sync::Arc::new(InMemoryBus::new());
        let producer = Arc::new(MessagingProducer::new(bus, "materials", 1000));
        let handler = NotificationHandler::new(producer);

        let envelope = EventEnvelope::new(
            "quote_created",
            Uuid::new_v4(),
            "materials",
            json!({"quote_number": "ORC-1"}),
        );
        let result = handler.handle_domain_event(&envelope).await.unwrap();
        assert_eq!(result["status"], "skipped");
        assert_eq!(result["reason"], "no_customer_phone");
    }
}
