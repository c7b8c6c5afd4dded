//! Meta Cloud API adapter
//!
//! One long-lived HTTP client serves every tenant; per-tenant credentials
//! arrive with each call. Webhook signatures are HMAC-SHA256 over the raw
//! body (`X-Hub-Signature-256: sha256=<hex>`), compared in constant time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use super::{
    constant_time_eq, BindingCredentials, DeliveryStatusUpdate, MessagingProvider, ParsedWebhook,
    ProviderSendResult,
};
use crate::contracts::{Button, InboundMessagePayload};

type HmacSha256 = Hmac<Sha256>;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v20.0";

pub struct MetaCloudProvider {
    client: reqwest::Client,
    base_url: String,
}

impl Default for MetaCloudProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaCloudProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: GRAPH_API_BASE.to_string(),
        }
    }

    /// Point the adapter at a different API base (tests, proxies)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post_messages(
        &self,
        credentials: &BindingCredentials,
        body: Value,
    ) -> ProviderSendResult {
        let url = format!("{}/{}/messages", self.base_url, credentials.routing_id);

        let response = match self
            .client
            .post(&url)
            .bearer_auth(&credentials.access_token)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return ProviderSendResult::failure("NETWORK_ERROR", e.to_string(), true);
            }
        };

        let status = response.status();
        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                return ProviderSendResult::failure(
                    "MALFORMED_RESPONSE",
                    e.to_string(),
                    status.is_server_error(),
                );
            }
        };

        if status.is_success() {
            match payload["messages"][0]["id"].as_str() {
                Some(id) => ProviderSendResult::ok(id),
                None => ProviderSendResult::failure(
                    "MALFORMED_RESPONSE",
                    "no message id in response",
                    false,
                ),
            }
        } else {
            let code = payload["error"]["code"]
                .as_i64()
                .map(|c| c.to_string())
                .or_else(|| payload["error"]["code"].as_str().map(String::from))
                .unwrap_or_else(|| status.as_u16().to_string());
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("provider error")
                .to_string();
            // 5xx is transient; 4xx (bad recipient, expired token) is not
            ProviderSendResult::failure(code, message, status.is_server_error())
        }
    }

    fn parse_message(
        msg: &Value,
        metadata: &Value,
        waba_id: Option<&str>,
        contact: Option<&Value>,
    ) -> InboundMessagePayload {
        let message_type = msg["type"].as_str().unwrap_or("unknown").to_string();

        let mut payload = InboundMessagePayload {
            message_id: msg["id"].as_str().unwrap_or_default().to_string(),
            from_phone: msg["from"].as_str().unwrap_or_default().to_string(),
            to_phone: metadata["display_phone_number"].as_str().map(String::from),
            phone_number_id: metadata["phone_number_id"].as_str().map(String::from),
            waba_id: waba_id.map(String::from),
            instance_name: None,
            message_type: message_type.clone(),
            timestamp: msg["timestamp"]
                .as_str()
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            customer_name: contact
                .and_then(|c| c["profile"]["name"].as_str())
                .map(String::from),
            context_message_id: msg["context"]["id"].as_str().map(String::from),
            ..Default::default()
        };

        match message_type.as_str() {
            "text" => {
                payload.text = msg["text"]["body"].as_str().map(String::from);
            }
            "button" => {
                payload.button_payload = msg["button"]["payload"].as_str().map(String::from);
                payload.button_text = msg["button"]["text"].as_str().map(String::from);
                payload.text = payload.button_text.clone();
            }
            "interactive" => {
                let reply = if msg["interactive"]["type"] == "button_reply" {
                    &msg["interactive"]["button_reply"]
                } else {
                    &msg["interactive"]["list_reply"]
                };
                payload.button_payload = reply["id"].as_str().map(String::from);
                payload.button_text = reply["title"].as_str().map(String::from);
                payload.text = payload.button_text.clone();
            }
            "image" | "document" | "audio" | "video" | "sticker" => {
                let media = &msg[message_type.as_str()];
                payload.media_id = media["id"].as_str().map(String::from);
                payload.media_mime_type = media["mime_type"].as_str().map(String::from);
                payload.caption = media["caption"].as_str().map(String::from);
            }
            _ => {}
        }

        payload
    }

    fn parse_status(status: &Value) -> DeliveryStatusUpdate {
        DeliveryStatusUpdate {
            provider_message_id: status["id"].as_str().unwrap_or_default().to_string(),
            recipient_phone: status["recipient_id"].as_str().map(String::from),
            status: status["status"].as_str().unwrap_or_default().to_string(),
            timestamp: status["timestamp"]
                .as_str()
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            error_code: status["errors"][0]["code"]
                .as_i64()
                .map(|c| c.to_string()),
            error_message: status["errors"][0]["title"].as_str().map(String::from),
        }
    }
}

/// Extract the routing identifier (phone_number_id) from a Meta webhook
/// payload, for tenant resolution before full parsing
pub fn extract_phone_number_id(payload: &Value) -> Option<String> {
    for entry in payload["entry"].as_array()? {
        if let Some(changes) = entry["changes"].as_array() {
            for change in changes {
                if let Some(id) = change["value"]["metadata"]["phone_number_id"].as_str() {
                    return Some(id.to_string());
                }
            }
        }
    }
    None
}

#[async_trait]
impl MessagingProvider for MetaCloudProvider {
    fn name(&self) -> &'static str {
        "meta"
    }

    async fn send_text(
        &self,
        credentials: &BindingCredentials,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> ProviderSendResult {
        let mut body = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "body": text, "preview_url": false },
        });
        if let Some(reply_to) = reply_to {
            body["context"] = json!({ "message_id": reply_to });
        }
        self.post_messages(credentials, body).await
    }

    async fn send_template(
        &self,
        credentials: &BindingCredentials,
        to: &str,
        template_name: &str,
        language_code: &str,
        components: Option<&Value>,
    ) -> ProviderSendResult {
        let mut template = json!({
            "name": template_name,
            "language": { "code": language_code },
        });
        if let Some(components) = components {
            template["components"] = components.clone();
        }
        let body = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "template",
            "template": template,
        });
        self.post_messages(credentials, body).await
    }

    async fn send_interactive(
        &self,
        credentials: &BindingCredentials,
        to: &str,
        body_text: &str,
        buttons: &[Button],
        header_text: Option<&str>,
        footer_text: Option<&str>,
        reply_to: Option<&str>,
    ) -> ProviderSendResult {
        // The provider caps quick-reply buttons at three
        let buttons: Vec<Value> = buttons
            .iter()
            .take(3)
            .map(|b| json!({ "type": "reply", "reply": { "id": b.id, "title": b.title } }))
            .collect();

        let mut interactive = json!({
            "type": "button",
            "body": { "text": body_text },
            "action": { "buttons": buttons },
        });
        if let Some(header) = header_text {
            interactive["header"] = json!({ "type": "text", "text": header });
        }
        if let Some(footer) = footer_text {
            interactive["footer"] = json!({ "text": footer });
        }

        let mut body = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "interactive",
            "interactive": interactive,
        });
        if let Some(reply_to) = reply_to {
            body["context"] = json!({ "message_id": reply_to });
        }
        self.post_messages(credentials, body).await
    }

    async fn mark_as_read(&self, credentials: &BindingCredentials, message_id: &str) -> bool {
        let url = format!("{}/{}/messages", self.base_url, credentials.routing_id);
        let body = json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": message_id,
        });
        match self
            .client
            .post(&url)
            .bearer_auth(&credentials.access_token)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn get_media_url(
        &self,
        credentials: &BindingCredentials,
        media_id: &str,
    ) -> Option<String> {
        let url = format!("{}/{}", self.base_url, media_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&credentials.access_token)
            .send()
            .await
            .ok()?;
        let payload: Value = response.json().await.ok()?;
        payload["url"].as_str().map(String::from)
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool {
        let Some(received_hex) = signature.strip_prefix("sha256=") else {
            tracing::warn!("Invalid signature header format");
            return false;
        };
        let Ok(received) = hex::decode(received_hex) else {
            return false;
        };

        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        constant_time_eq(&received, &expected)
    }

    fn parse_webhook(&self, payload: &Value) -> ParsedWebhook {
        let mut parsed = ParsedWebhook::default();

        if payload["object"] != "whatsapp_business_account" {
            return parsed;
        }

        for entry in payload["entry"].as_array().unwrap_or(&Vec::new()) {
            let waba_id = entry["id"].as_str();
            for change in entry["changes"].as_array().unwrap_or(&Vec::new()) {
                if change["field"] != "messages" {
                    continue;
                }
                let value = &change["value"];
                let metadata = &value["metadata"];
                let contact = value["contacts"].as_array().and_then(|c| c.first());

                for msg in value["messages"].as_array().unwrap_or(&Vec::new()) {
                    parsed
                        .messages
                        .push(Self::parse_message(msg, metadata, waba_id, contact));
                }
                for status in value["statuses"].as_array().unwrap_or(&Vec::new()) {
                    parsed.statuses.push(Self::parse_status(status));
                }
            }
        }

        parsed
    }

    fn verify_webhook_challenge(
        &self,
        mode: &str,
        token: &str,
        challenge: &str,
        verify_token: &str,
    ) -> Option<String> {
        if mode == "subscribe" && constant_time_eq(token.as_bytes(), verify_token.as_bytes()) {
            Some(challenge.to_string())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_webhook() -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "waba-1",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {
                            "display_phone_number": "5511000000000",
                            "phone_number_id": "phone-1"
                        },
                        "contacts": [{
                            "profile": { "name": "Maria" },
                            "wa_id": "5511999999999"
                        }],
                        "messages": [{
                            "from": "5511999999999",
                            "id": "wamid.A1",
                            "timestamp": "1700000000",
                            "type": "text",
                            "text": { "body": "quero um orçamento" }
                        }],
                        "statuses": [{
                            "id": "wamid.B2",
                            "status": "delivered",
                            "timestamp": "1700000100",
                            "recipient_id": "5511888888888"
                        }]
                    }
                }]
            }]
        })
    }

    #[test]
    fn test_parse_webhook_messages_and_statuses() {
        let provider = MetaCloudProvider::new();
        let parsed = provider.parse_webhook(&sample_webhook());

        assert_eq!(parsed.messages.len(), 1);
        let msg = &parsed.messages[0];
        assert_eq!(msg.message_id, "wamid.A1");
        assert_eq!(msg.from_phone, "5511999999999");
        assert_eq!(msg.phone_number_id.as_deref(), Some("phone-1"));
        assert_eq!(msg.waba_id.as_deref(), Some("waba-1"));
        assert_eq!(msg.text.as_deref(), Some("quero um orçamento"));
        assert_eq!(msg.customer_name.as_deref(), Some("Maria"));

        assert_eq!(parsed.statuses.len(), 1);
        let status = &parsed.statuses[0];
        assert_eq!(status.provider_message_id, "wamid.B2");
        assert_eq!(status.status, "delivered");
        assert_eq!(status.recipient_phone.as_deref(), Some("5511888888888"));
    }

    #[test]
    fn test_parse_interactive_button_reply() {
        let provider = MetaCloudProvider::new();
        let mut payload = sample_webhook();
        payload["entry"][0]["changes"][0]["value"]["messages"][0] = json!({
            "from": "5511999999999",
            "id": "wamid.C3",
            "timestamp": "1700000000",
            "type": "interactive",
            "interactive": {
                "type": "button_reply",
                "button_reply": { "id": "btn_status", "title": "Status do pedido" }
            }
        });

        let parsed = provider.parse_webhook(&payload);
        assert_eq!(parsed.messages[0].button_payload.as_deref(), Some("btn_status"));
        assert_eq!(
            parsed.messages[0].button_text.as_deref(),
            Some("Status do pedido")
        );
    }

    #[test]
    fn test_non_whatsapp_payload_parses_empty() {
        let provider = MetaCloudProvider::new();
        let parsed = provider.parse_webhook(&json!({"object": "page", "entry": []}));
        assert!(parsed.messages.is_empty());
        assert!(parsed.statuses.is_empty());
    }

    #[test]
    fn test_extract_phone_number_id() {
        assert_eq!(
            extract_phone_number_id(&sample_webhook()).as_deref(),
            Some("phone-1")
        );
        assert_eq!(extract_phone_number_id(&json!({"entry": []})), None);
    }

    #[test]
    fn test_signature_validation() {
        let provider = MetaCloudProvider::new();
        let secret = "app-secret";
        let body = br#"{"object":"whatsapp_business_account"}"#;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert!(provider.validate_webhook_signature(body, &signature, secret));
        assert!(!provider.validate_webhook_signature(body, &signature, "wrong-secret"));
        assert!(!provider.validate_webhook_signature(body, "sha256=deadbeef", secret));
        assert!(!provider.validate_webhook_signature(body, "not-a-signature", secret));
    }

    #[test]
    fn test_webhook_challenge() {
        let provider = MetaCloudProvider::new();
        assert_eq!(
            provider.verify_webhook_challenge("subscribe", "tok", "challenge-123", "tok"),
            Some("challenge-123".to_string())
        );
        assert_eq!(
            provider.verify_webhook_challenge("subscribe", "wrong", "challenge-123", "tok"),
            None
        );
        assert_eq!(
            provider.verify_webhook_challenge("unsubscribe", "tok", "challenge-123", "tok"),
            None
        );
    }
}
