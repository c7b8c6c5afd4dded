//! Inbound message handling
//!
//! For each inbound envelope: idempotency by provider message id, lazy
//! conversation creation, message persistence, automation (opt-out and
//! intent detection), auto-reply queueing, and domain event publication.
//! All database work commits before anything is published; the caller acks
//! only after the handler returns.

use event_bus::EventEnvelope;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;

use crate::automation::AutomationEngine;
use crate::contracts::{
    InboundMessagePayload, MessagingEventType, OutboundMessagePayload, StatusUpdatePayload,
};
use crate::error::MessagingError;
use crate::persistence::models::{
    ConversationState, ConversationStatus, MessageDirection, MessageStatus,
};
use crate::persistence::repo;
use crate::streams::MessagingProducer;

pub struct InboundHandler {
    pool: PgPool,
    producer: Arc<MessagingProducer>,
    automation: AutomationEngine,
}

impl InboundHandler {
    pub fn new(pool: PgPool, producer: Arc<MessagingProducer>) -> Self {
        Self {
            pool,
            producer,
            automation: AutomationEngine::new(),
        }
    }

    /// Process one envelope from the inbound stream
    pub async fn handle_envelope(&self, envelope: &EventEnvelope) -> Result<Value, MessagingError> {
        let is_status_update = envelope
            .payload
            .get("is_status_update")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if is_status_update {
            return self.handle_delivery_status(envelope).await;
        }

        let message: InboundMessagePayload = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| MessagingError::Payload(format!("inbound message: {e}")))?;

        // Idempotency: the provider message id is unique on the messages table
        if !message.message_id.is_empty()
            && repo::message_exists(&self.pool, &message.message_id).await?
        {
            tracing::debug!(
                provider_message_id = %message.message_id,
                "Message already processed, skipping"
            );
            return Ok(json!({
                "status": "skipped",
                "reason": "already_processed",
                "message_id": message.message_id,
            }));
        }

        let binding = repo::active_binding_for_tenant(&self.pool, envelope.tenant_id).await?;
        let auto_reply_enabled = binding
            .as_ref()
            .map(|b| b.auto_reply_enabled())
            .unwrap_or(true);
        let business_name = binding
            .as_ref()
            .map(|b| b.business_name())
            .unwrap_or_else(|| "nossa loja".to_string());

        let mut tx = self.pool.begin().await?;

        let (conversation, is_new) = repo::get_or_create_conversation(
            &mut tx,
            envelope.tenant_id,
            &message.from_phone,
            message.customer_name.as_deref(),
        )
        .await?;

        repo::record_conversation_message(
            &mut tx,
            conversation.id,
            MessageDirection::Inbound,
            message.timestamp,
        )
        .await?;

        repo::create_message(
            &mut tx,
            &repo::NewMessage {
                tenant_id: envelope.tenant_id,
                conversation_id: conversation.id,
                direction: MessageDirection::Inbound,
                message_type: &message.message_type,
                content: message.text.as_deref(),
                content_json: envelope.payload.clone(),
                provider_message_id: (!message.message_id.is_empty())
                    .then_some(message.message_id.as_str()),
                // Inbound means it reached us
                status: MessageStatus::Delivered,
                template_name: None,
                reply_to_message_id: message.context_message_id.as_deref(),
                triggered_by_event_id: None,
            },
        )
        .await?;

        let detection = self
            .automation
            .detect(message.text.as_deref(), message.button_payload.as_deref());

        let mut action = "none";
        if detection.is_optout {
            repo::upsert_optout(
                &mut tx,
                envelope.tenant_id,
                &message.from_phone,
                detection.optout_keyword.as_deref().unwrap_or("unknown"),
                Some(&message.message_id),
            )
            .await?;
            repo::update_conversation_state(
                &mut tx,
                conversation.id,
                ConversationStatus::OptedOut.as_str(),
                ConversationState::OptedOut.as_str(),
            )
            .await?;
            action = "opted_out";
        } else if let Some(intent) = detection.intent {
            let (status, state) = match intent {
                crate::contracts::ActionIntent::TalkToHuman => (
                    ConversationStatus::HumanAssigned,
                    ConversationState::HumanRequested,
                ),
                _ => (ConversationStatus::Active, ConversationState::Processing),
            };
            repo::update_conversation_state(
                &mut tx,
                conversation.id,
                status.as_str(),
                state.as_str(),
            )
            .await?;
            action = "intent";
        }

        let reply_type = self
            .automation
            .should_auto_reply(is_new, &detection, auto_reply_enabled);

        tx.commit().await?;

        // Publishes happen after commit; a failure here leaves the bus
        // message pending and the redelivery is absorbed by idempotency
        let correlation = envelope
            .correlation_id
            .clone()
            .or_else(|| Some(message.message_id.clone()));

        if detection.is_optout {
            self.producer
                .publish_optout(
                    envelope.tenant_id,
                    &message.from_phone,
                    detection.optout_keyword.as_deref().unwrap_or("unknown"),
                    &message.message_id,
                    correlation.clone(),
                )
                .await?;
        } else if let Some(intent) = detection.intent {
            self.producer
                .publish_action_requested(
                    envelope.tenant_id,
                    intent.as_str(),
                    &message.from_phone,
                    &message.message_id,
                    correlation.clone(),
                )
                .await?;
        }

        self.producer
            .publish_domain_event(
                MessagingEventType::InboundReceived,
                envelope.tenant_id,
                json!({
                    "message_id": message.message_id,
                    "from_phone": message.from_phone,
                    "message_type": message.message_type,
                    "text": message.text,
                    "conversation_id": conversation.id,
                }),
                correlation.clone(),
            )
            .await?;

        let mut auto_reply = None;
        if let Some(reply_type) = reply_type {
            let mut variables = HashMap::new();
            variables.insert("business_name".to_string(), business_name);
            let reply = self.automation.auto_reply(reply_type, &variables);

            let outbound = OutboundMessagePayload {
                to_phone: message.from_phone.clone(),
                message_type: if reply.buttons.is_some() {
                    "interactive".to_string()
                } else {
                    "text".to_string()
                },
                text: Some(reply.text),
                buttons: reply.buttons,
                reply_to_message_id: Some(message.message_id.clone()),
                ..Default::default()
            };
            self.producer
                .publish_outbound(
                    envelope.tenant_id,
                    serde_json::to_value(&outbound)
                        .map_err(|e| MessagingError::Payload(e.to_string()))?,
                    correlation,
                )
                .await?;
            auto_reply = Some(format!("{:?}", reply.reply_type));
        }

        Ok(json!({
            "status": "processed",
            "message_id": message.message_id,
            "conversation_id": conversation.id,
            "is_new_conversation": is_new,
            "action": action,
            "auto_reply": auto_reply,
        }))
    }

    /// Apply a provider delivery-status update to the matching message row
    async fn handle_delivery_status(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<Value, MessagingError> {
        let status: StatusUpdatePayload = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| MessagingError::Payload(format!("status update: {e}")))?;

        let Some(row) =
            repo::message_by_provider_id(&self.pool, &status.provider_message_id).await?
        else {
            tracing::debug!(
                provider_message_id = %status.provider_message_id,
                "No message for status update"
            );
            return Ok(json!({"status": "skipped", "reason": "message_not_found"}));
        };

        let Some(new_status) = MessageStatus::from_provider(&status.status) else {
            return Ok(json!({"status": "skipped", "reason": "unknown_status"}));
        };

        let mut tx = self.pool.begin().await?;
        repo::update_message_status(
            &mut tx,
            row.id,
            new_status,
            status.error_code.as_deref(),
            status.error_message.as_deref(),
        )
        .await?;
        tx.commit().await?;

        match new_status {
            MessageStatus::Delivered | MessageStatus::Read => {
                self.producer
                    .publish_domain_event(
                        MessagingEventType::DeliveryConfirmed,
                        envelope.tenant_id,
                        json!({
                            "provider_message_id": status.provider_message_id,
                            "status": status.status,
                        }),
                        envelope.correlation_id.clone(),
                    )
                    .await?;
            }
            MessageStatus::Failed => {
                self.producer
                    .publish_domain_event(
                        MessagingEventType::DeliveryFailed,
                        envelope.tenant_id,
                        json!({
                            "provider_message_id": status.provider_message_id,
                            "error_code": status.error_code,
                            "error_message": status.error_message,
                        }),
                        envelope.correlation_id.clone(),
                    )
                    .await?;
            }
            _ => {}
        }

        Ok(json!({
            "status": "updated",
            "provider_message_id": status.provider_message_id,
            "new_status": new_status.as_str(),
        }))
    }
}
