//! Stub adapter for development and tests
//!
//! Sends nothing over the network: every send is recorded in memory and
//! acknowledged with a deterministic message id. A configurable failure mode
//! exercises the outbound retry and DLQ paths. Webhook parsing accepts a
//! minimal connector-style payload (`event`/`instance`/`data`), validated by
//! a shared key instead of a signature.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{
    constant_time_eq, BindingCredentials, DeliveryStatusUpdate, MessagingProvider, ParsedWebhook,
    ProviderSendResult,
};
use crate::contracts::{Button, InboundMessagePayload};

/// How the stub answers send calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    None,
    /// Simulate a transient provider outage (5xx)
    Retryable,
    /// Simulate a permanent rejection (4xx)
    Fatal,
}

/// A send recorded by the stub
#[derive(Debug, Clone)]
pub struct RecordedSend {
    pub to: String,
    pub message_type: String,
    pub body: String,
}

pub struct StubProvider {
    sent: Mutex<Vec<RecordedSend>>,
    failure_mode: Mutex<FailureMode>,
    counter: AtomicU64,
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure_mode: Mutex::new(FailureMode::None),
            counter: AtomicU64::new(0),
        }
    }

    pub fn set_failure_mode(&self, mode: FailureMode) {
        *self.failure_mode.lock().unwrap() = mode;
    }

    /// Sends recorded so far (testing aid)
    pub fn sent(&self) -> Vec<RecordedSend> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, to: &str, message_type: &str, body: &str) -> ProviderSendResult {
        match *self.failure_mode.lock().unwrap() {
            FailureMode::Retryable => {
                return ProviderSendResult::failure("503", "simulated provider outage", true);
            }
            FailureMode::Fatal => {
                return ProviderSendResult::failure("131026", "simulated invalid recipient", false);
            }
            FailureMode::None => {}
        }

        self.sent.lock().unwrap().push(RecordedSend {
            to: to.to_string(),
            message_type: message_type.to_string(),
            body: body.to_string(),
        });
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        ProviderSendResult::ok(format!("stub-{n}"))
    }
}

#[async_trait]
impl MessagingProvider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn send_text(
        &self,
        _credentials: &BindingCredentials,
        to: &str,
        text: &str,
        _reply_to: Option<&str>,
    ) -> ProviderSendResult {
        self.record(to, "text", text)
    }

    async fn send_template(
        &self,
        _credentials: &BindingCredentials,
        to: &str,
        template_name: &str,
        _language_code: &str,
        _components: Option<&Value>,
    ) -> ProviderSendResult {
        self.record(to, "template", template_name)
    }

    async fn send_interactive(
        &self,
        _credentials: &BindingCredentials,
        to: &str,
        body_text: &str,
        _buttons: &[Button],
        _header_text: Option<&str>,
        _footer_text: Option<&str>,
        _reply_to: Option<&str>,
    ) -> ProviderSendResult {
        self.record(to, "interactive", body_text)
    }

    async fn mark_as_read(&self, _credentials: &BindingCredentials, _message_id: &str) -> bool {
        true
    }

    async fn get_media_url(
        &self,
        _credentials: &BindingCredentials,
        media_id: &str,
    ) -> Option<String> {
        Some(format!("stub://media/{media_id}"))
    }

    fn validate_webhook_signature(&self, _payload: &[u8], signature: &str, secret: &str) -> bool {
        // Connector-style providers authenticate with a shared key header
        constant_time_eq(signature.as_bytes(), secret.as_bytes())
    }

    fn parse_webhook(&self, payload: &Value) -> ParsedWebhook {
        let mut parsed = ParsedWebhook::default();
        let instance = payload["instance"].as_str().map(String::from);

        match payload["event"].as_str() {
            Some("messages.upsert") => {
                let data = &payload["data"];
                // Messages the business itself sent echo back with fromMe=true
                if data["key"]["fromMe"].as_bool().unwrap_or(false) {
                    return parsed;
                }
                let from_phone = data["key"]["remoteJid"]
                    .as_str()
                    .map(|jid| jid.split('@').next().unwrap_or(jid).to_string())
                    .unwrap_or_default();

                parsed.messages.push(InboundMessagePayload {
                    message_id: data["key"]["id"].as_str().unwrap_or_default().to_string(),
                    from_phone,
                    instance_name: instance,
                    message_type: "text".to_string(),
                    timestamp: Some(Utc::now()),
                    text: data["message"]["conversation"].as_str().map(String::from),
                    customer_name: data["pushName"].as_str().map(String::from),
                    ..Default::default()
                });
            }
            Some("messages.update") => {
                let data = &payload["data"];
                parsed.statuses.push(DeliveryStatusUpdate {
                    provider_message_id: data["key"]["id"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    recipient_phone: data["key"]["remoteJid"]
                        .as_str()
                        .map(|jid| jid.split('@').next().unwrap_or(jid).to_string()),
                    status: data["status"].as_str().unwrap_or_default().to_lowercase(),
                    timestamp: Some(Utc::now()),
                    error_code: None,
                    error_message: None,
                });
            }
            _ => {}
        }

        parsed
    }

    fn verify_webhook_challenge(
        &self,
        _mode: &str,
        token: &str,
        challenge: &str,
        verify_token: &str,
    ) -> Option<String> {
        constant_time_eq(token.as_bytes(), verify_token.as_bytes())
            .then(|| challenge.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn credentials() -> BindingCredentials {
        BindingCredentials {
            routing_id: "shop-1".to_string(),
            access_token: "key".to_string(),
            api_url: None,
        }
    }

    #[tokio::test]
    async fn test_send_records_and_returns_id() {
        let stub = StubProvider::new();
        let result = stub
            .send_text(&credentials(), "+5511999999999", "olá", None)
            .await;
        assert!(result.success);
        assert_eq!(result.message_id.as_deref(), Some("stub-0"));

        let sent = stub.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "+5511999999999");
        assert_eq!(sent[0].body, "olá");
    }

    #[tokio::test]
    async fn test_failure_modes() {
        let stub = StubProvider::new();

        stub.set_failure_mode(FailureMode::Retryable);
        let result = stub.send_text(&credentials(), "+55", "x", None).await;
        assert!(!result.success);
        assert!(result.retryable);

        stub.set_failure_mode(FailureMode::Fatal);
        let result = stub.send_text(&credentials(), "+55", "x", None).await;
        assert!(!result.success);
        assert!(!result.retryable);

        assert!(stub.sent().is_empty());
    }

    #[test]
    fn test_parse_connector_webhook() {
        let stub = StubProvider::new();
        let parsed = stub.parse_webhook(&json!({
            "event": "messages.upsert",
            "instance": "shop-1",
            "data": {
                "key": { "id": "evo-1", "remoteJid": "5511999999999@s.whatsapp.net", "fromMe": false },
                "message": { "conversation": "stop" },
                "pushName": "João"
            }
        }));

        assert_eq!(parsed.messages.len(), 1);
        let msg = &parsed.messages[0];
        assert_eq!(msg.message_id, "evo-1");
        assert_eq!(msg.from_phone, "5511999999999");
        assert_eq!(msg.instance_name.as_deref(), Some("shop-1"));
        assert_eq!(msg.text.as_deref(), Some("stop"));
    }

    #[test]
    fn test_own_echo_messages_are_ignored() {
        let stub = StubProvider::new();
        let parsed = stub.parse_webhook(&json!({
            "event": "messages.upsert",
            "instance": "shop-1",
            "data": {
                "key": { "id": "evo-2", "remoteJid": "5511999999999@s.whatsapp.net", "fromMe": true },
                "message": { "conversation": "auto reply" }
            }
        }));
        assert!(parsed.messages.is_empty());
    }

    #[test]
    fn test_shared_key_validation() {
        let stub = StubProvider::new();
        assert!(stub.validate_webhook_signature(b"{}", "shared-key", "shared-key"));
        assert!(!stub.validate_webhook_signature(b"{}", "wrong", "shared-key"));
    }
}
