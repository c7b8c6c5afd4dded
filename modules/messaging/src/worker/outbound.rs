//! Outbound message dispatch
//!
//! Sends one outbound envelope via the tenant's provider binding. The
//! message row is inserted (status `pending`) and committed BEFORE the
//! provider call so a crash mid-send is recoverable, and no transaction is
//! held across the network call.
//!
//! Failure handling: every send failure marks the row `failed` and publishes
//! a delivery-failed domain event. Retryable failures below the retry budget
//! stay unacknowledged so pending-entry reclaim redelivers them; exhausted or
//! non-retryable failures are parked on the DLQ and acknowledged.

use event_bus::EventEnvelope;
use sqlx::PgPool;
use std::sync::Arc;

use serde_json::json;

use crate::config::Config;
use crate::contracts::{MessagingEventType, OutboundMessagePayload};
use crate::crypto::CredentialCipher;
use crate::error::MessagingError;
use crate::persistence::models::{MessageDirection, MessageStatus, TenantBinding};
use crate::persistence::repo;
use crate::providers::{BindingCredentials, ProviderRegistry, ProviderSendResult};
use crate::streams::MessagingProducer;

/// Terminal-vs-retry outcome of one outbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundOutcome {
    Sent,
    /// Blocked by opt-out; terminal, ack
    Blocked,
    /// Configuration problem (no binding, no token); terminal, ack
    Terminal(String),
    /// Retryable failure within budget; do NOT ack
    Retry,
    /// Parked on the DLQ; ack
    DeadLettered,
}

/// What to do with a failed send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    DeadLetter,
}

/// Decide between retry and DLQ for a failed send.
///
/// `attempt` counts deliveries of the envelope (1 = first). Non-retryable
/// errors dead-letter immediately; retryable ones dead-letter once the
/// attempt budget is spent.
pub fn retry_decision(retryable: bool, attempt: u64, max_retries: u64) -> RetryDecision {
    if retryable && attempt < max_retries {
        RetryDecision::Retry
    } else {
        RetryDecision::DeadLetter
    }
}

pub struct OutboundHandler {
    pool: PgPool,
    producer: Arc<MessagingProducer>,
    providers: Arc<ProviderRegistry>,
    cipher: Option<Arc<CredentialCipher>>,
    max_retries: u64,
}

impl OutboundHandler {
    pub fn new(
        pool: PgPool,
        producer: Arc<MessagingProducer>,
        providers: Arc<ProviderRegistry>,
        cipher: Option<Arc<CredentialCipher>>,
        config: &Config,
    ) -> Self {
        Self {
            pool,
            producer,
            providers,
            cipher,
            max_retries: config.max_retries,
        }
    }

    /// Process one envelope from the outbound stream.
    ///
    /// `attempt` is the delivery count of the bus message (1 on first read,
    /// higher when redelivered through reclaim).
    pub async fn handle_envelope(
        &self,
        envelope: &EventEnvelope,
        attempt: u64,
    ) -> Result<OutboundOutcome, MessagingError> {
        let payload: OutboundMessagePayload =
            match serde_json::from_value(envelope.payload.clone()) {
                Ok(payload) => payload,
                Err(e) => {
                    // Poison: nothing to retry
                    tracing::warn!(event_id = %envelope.event_id, error = %e, "Malformed outbound payload");
                    return Ok(OutboundOutcome::Terminal(format!("malformed payload: {e}")));
                }
            };

        if payload.to_phone.is_empty() {
            return Ok(OutboundOutcome::Terminal("missing to_phone".to_string()));
        }

        // Opted-out numbers never receive outbound messages
        if repo::is_opted_out(&self.pool, envelope.tenant_id, &payload.to_phone).await? {
            tracing::info!(
                tenant_id = %envelope.tenant_id,
                to_phone = %payload.to_phone,
                "Recipient opted out; blocking outbound message"
            );
            return Ok(OutboundOutcome::Blocked);
        }

        let Some(binding) =
            repo::active_binding_for_tenant(&self.pool, envelope.tenant_id).await?
        else {
            tracing::warn!(tenant_id = %envelope.tenant_id, "No active binding for tenant");
            return Ok(OutboundOutcome::Terminal("no_active_binding".to_string()));
        };

        let credentials = match self.credentials_for(&binding) {
            Ok(credentials) => credentials,
            Err(reason) => {
                tracing::warn!(tenant_id = %envelope.tenant_id, reason = %reason, "Unusable binding");
                return Ok(OutboundOutcome::Terminal(reason));
            }
        };

        // Pending row committed before the provider call
        let mut tx = self.pool.begin().await?;
        let (conversation, _) = repo::get_or_create_conversation(
            &mut tx,
            envelope.tenant_id,
            &payload.to_phone,
            None,
        )
        .await?;
        let message_id = repo::create_message(
            &mut tx,
            &repo::NewMessage {
                tenant_id: envelope.tenant_id,
                conversation_id: conversation.id,
                direction: MessageDirection::Outbound,
                message_type: &payload.message_type,
                content: payload.text.as_deref(),
                content_json: envelope.payload.clone(),
                provider_message_id: None,
                status: MessageStatus::Pending,
                template_name: payload.template_name.as_deref(),
                reply_to_message_id: payload.reply_to_message_id.as_deref(),
                triggered_by_event_id: payload.triggered_by_event_id,
            },
        )
        .await?;
        tx.commit().await?;

        // Provider call with no transaction open
        let provider = self.providers.for_tag(&binding.provider);
        let result = self.dispatch(&*provider, &credentials, &payload).await;

        if result.success {
            let provider_message_id = result.message_id.clone().unwrap_or_default();
            let mut tx = self.pool.begin().await?;
            repo::mark_message_sent(&mut tx, message_id, &provider_message_id).await?;
            repo::record_conversation_message(
                &mut tx,
                conversation.id,
                MessageDirection::Outbound,
                None,
            )
            .await?;
            tx.commit().await?;

            tracing::info!(
                to_phone = %payload.to_phone,
                provider_message_id = %provider_message_id,
                message_type = %payload.message_type,
                "Message sent"
            );
            return Ok(OutboundOutcome::Sent);
        }

        // Failure path: mark the row, always publish delivery_failed
        let mut tx = self.pool.begin().await?;
        repo::mark_message_failed(
            &mut tx,
            message_id,
            result.error_code.as_deref(),
            result.error_message.as_deref(),
        )
        .await?;
        tx.commit().await?;

        self.producer
            .publish_domain_event(
                MessagingEventType::DeliveryFailed,
                envelope.tenant_id,
                json!({
                    "message_id": message_id,
                    "to_phone": payload.to_phone,
                    "error_code": result.error_code,
                    "error_message": result.error_message,
                    "attempt": attempt,
                }),
                envelope.correlation_id.clone(),
            )
            .await?;

        tracing::warn!(
            to_phone = %payload.to_phone,
            error_code = ?result.error_code,
            error_message = ?result.error_message,
            attempt = attempt,
            retryable = result.retryable,
            "Message send failed"
        );

        match retry_decision(result.retryable, attempt, self.max_retries) {
            RetryDecision::Retry => Ok(OutboundOutcome::Retry),
            RetryDecision::DeadLetter => {
                let error = result
                    .error_message
                    .unwrap_or_else(|| "unknown error".to_string());
                self.producer
                    .publish_to_dlq(envelope, &error, attempt)
                    .await?;
                tracing::error!(
                    event_id = %envelope.event_id,
                    attempt = attempt,
                    "Envelope moved to DLQ"
                );
                Ok(OutboundOutcome::DeadLettered)
            }
        }
    }

    /// Resolve and decrypt the binding's credentials
    fn credentials_for(&self, binding: &TenantBinding) -> Result<BindingCredentials, String> {
        let routing_id = binding
            .routing_id()
            .ok_or_else(|| "binding has no routing identifier".to_string())?
            .to_string();

        let stored = binding
            .access_token_encrypted
            .as_deref()
            .ok_or_else(|| "no_access_token".to_string())?;

        let access_token = match &self.cipher {
            Some(cipher) if CredentialCipher::looks_encrypted(stored) => cipher
                .decrypt(stored)
                .map_err(|e| format!("credential decrypt failed: {e}"))?,
            // Stub/dev mode stores tokens in the clear
            _ => stored.to_string(),
        };

        Ok(BindingCredentials {
            routing_id,
            access_token,
            api_url: binding.api_url.clone(),
        })
    }

    async fn dispatch(
        &self,
        provider: &dyn crate::providers::MessagingProvider,
        credentials: &BindingCredentials,
        payload: &OutboundMessagePayload,
    ) -> ProviderSendResult {
        match payload.message_type.as_str() {
            "template" => {
                provider
                    .send_template(
                        credentials,
                        &payload.to_phone,
                        payload.template_name.as_deref().unwrap_or_default(),
                        payload.template_language.as_deref().unwrap_or("pt_BR"),
                        payload.template_components.as_ref(),
                    )
                    .await
            }
            "interactive" => match &payload.buttons {
                Some(buttons) if !buttons.is_empty() => {
                    provider
                        .send_interactive(
                            credentials,
                            &payload.to_phone,
                            payload.text.as_deref().unwrap_or_default(),
                            buttons,
                            payload.header_text.as_deref(),
                            payload.footer_text.as_deref(),
                            payload.reply_to_message_id.as_deref(),
                        )
                        .await
                }
                _ => {
                    provider
                        .send_text(
                            credentials,
                            &payload.to_phone,
                            payload.text.as_deref().unwrap_or_default(),
                            payload.reply_to_message_id.as_deref(),
                        )
                        .await
                }
            },
            _ => {
                provider
                    .send_text(
                        credentials,
                        &payload.to_phone,
                        payload.text.as_deref().unwrap_or_default(),
                        payload.reply_to_message_id.as_deref(),
                    )
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_within_budget_retries() {
        assert_eq!(retry_decision(true, 1, 3), RetryDecision::Retry);
        assert_eq!(retry_decision(true, 2, 3), RetryDecision::Retry);
    }

    #[test]
    fn test_retryable_at_budget_dead_letters() {
        assert_eq!(retry_decision(true, 3, 3), RetryDecision::DeadLetter);
        assert_eq!(retry_decision(true, 7, 3), RetryDecision::DeadLetter);
    }

    #[test]
    fn test_non_retryable_dead_letters_immediately() {
        assert_eq!(retry_decision(false, 1, 3), RetryDecision::DeadLetter);
    }
}
