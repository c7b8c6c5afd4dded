//! Provider adapter capability
//!
//! Every adapter implements the same capability set: sending (text, template,
//! interactive), webhook parsing and validation, and the verification
//! challenge. Send operations return a structured [`ProviderSendResult`]
//! rather than an error: the outbound loop dispatches on success, error code,
//! and the retryable flag.

pub mod meta_cloud;
pub mod stub;
pub mod templates;

pub use meta_cloud::MetaCloudProvider;
pub use stub::StubProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::contracts::{Button, InboundMessagePayload};

/// Credentials an adapter needs for one send, resolved from the tenant binding
#[derive(Debug, Clone)]
pub struct BindingCredentials {
    /// Provider routing identifier: phone_number_id or instance name
    pub routing_id: String,
    /// Decrypted access token / API key
    pub access_token: String,
    /// Override base URL for self-hosted connector providers
    pub api_url: Option<String>,
}

/// Structured result of a send operation
#[derive(Debug, Clone)]
pub struct ProviderSendResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Whether the outbound loop should retry (5xx/network) or dead-letter (4xx)
    pub retryable: bool,
}

impl ProviderSendResult {
    pub fn ok(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error_code: None,
            error_message: None,
            retryable: false,
        }
    }

    pub fn failure(
        error_code: impl Into<String>,
        error_message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            success: false,
            message_id: None,
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
            retryable,
        }
    }
}

/// A delivery-status update parsed from a webhook
#[derive(Debug, Clone)]
pub struct DeliveryStatusUpdate {
    pub provider_message_id: String,
    pub recipient_phone: Option<String>,
    pub status: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Everything parsed out of one webhook call
#[derive(Debug, Default)]
pub struct ParsedWebhook {
    pub messages: Vec<InboundMessagePayload>,
    pub statuses: Vec<DeliveryStatusUpdate>,
}

/// Abstract interface for messaging providers
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Provider tag as stored on tenant bindings
    fn name(&self) -> &'static str;

    async fn send_text(
        &self,
        credentials: &BindingCredentials,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> ProviderSendResult;

    async fn send_template(
        &self,
        credentials: &BindingCredentials,
        to: &str,
        template_name: &str,
        language_code: &str,
        components: Option<&serde_json::Value>,
    ) -> ProviderSendResult;

    async fn send_interactive(
        &self,
        credentials: &BindingCredentials,
        to: &str,
        body_text: &str,
        buttons: &[Button],
        header_text: Option<&str>,
        footer_text: Option<&str>,
        reply_to: Option<&str>,
    ) -> ProviderSendResult;

    /// Mark an inbound message as read; best-effort
    async fn mark_as_read(&self, credentials: &BindingCredentials, message_id: &str) -> bool;

    /// Resolve the download URL of a media attachment
    async fn get_media_url(
        &self,
        credentials: &BindingCredentials,
        media_id: &str,
    ) -> Option<String>;

    /// Validate the webhook signature/credential for a raw body
    fn validate_webhook_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool;

    /// Parse a webhook payload into inbound messages and status updates
    fn parse_webhook(&self, payload: &serde_json::Value) -> ParsedWebhook;

    /// Handle the webhook verification challenge; echoes the challenge on match
    fn verify_webhook_challenge(
        &self,
        mode: &str,
        token: &str,
        challenge: &str,
        verify_token: &str,
    ) -> Option<String>;
}

/// Constant-time byte comparison for signatures and shared keys
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Registry of the adapters this deployment ships
pub struct ProviderRegistry {
    meta: Arc<MetaCloudProvider>,
    stub: Arc<StubProvider>,
}

impl ProviderRegistry {
    pub fn new(meta: Arc<MetaCloudProvider>, stub: Arc<StubProvider>) -> Self {
        Self { meta, stub }
    }

    /// Adapter for a tenant binding's provider tag
    pub fn for_tag(&self, tag: &str) -> Arc<dyn MessagingProvider> {
        match tag {
            "meta" => self.meta.clone(),
            _ => self.stub.clone(),
        }
    }

    /// Select the adapter by webhook payload shape:
    /// Meta-style payloads carry a root `object`, connector-style carry
    /// `event`/`instance`.
    pub fn for_payload(&self, payload: &serde_json::Value) -> Arc<dyn MessagingProvider> {
        if payload.get("object").and_then(|v| v.as_str()).is_some() {
            self.meta.clone()
        } else {
            self.stub.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_registry_detects_adapter_by_payload_shape() {
        let registry = ProviderRegistry::new(
            Arc::new(MetaCloudProvider::new()),
            Arc::new(StubProvider::new()),
        );

        let meta_payload = serde_json::json!({"object": "whatsapp_business_account", "entry": []});
        assert_eq!(registry.for_payload(&meta_payload).name(), "meta");

        let connector_payload =
            serde_json::json!({"event": "messages.upsert", "instance": "shop-1", "data": {}});
        assert_eq!(registry.for_payload(&connector_payload).name(), "stub");
    }
}
