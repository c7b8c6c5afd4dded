//! Webhook ingress (axum)
//!
//! Receives provider callbacks, validates them, resolves the tenant from the
//! provider routing identifier, and publishes envelopes to the inbound
//! stream. The handler returns 200 after a successful publish even when
//! resolution or parsing partially failed for other items, so the provider
//! never retries duplicates; only signature failures (403) and malformed
//! JSON (400) are client errors. Provider timeout budgets are short, so all
//! work happens inline and fast.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::contracts::StatusUpdatePayload;
use crate::persistence::repo;
use crate::providers::meta_cloud::extract_phone_number_id;
use crate::providers::{DeliveryStatusUpdate, ProviderRegistry};
use crate::streams::MessagingProducer;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub producer: Arc<MessagingProducer>,
    pub providers: Arc<ProviderRegistry>,
    pub config: Arc<Config>,
}

/// Build the webhook router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "messaging-webhook"}))
}

/// Provider verification challenge (GET)
///
/// The provider sends `hub.mode`, `hub.verify_token`, and `hub.challenge`;
/// the challenge is echoed back when the token matches.
async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or("");
    let token = params
        .get("hub.verify_token")
        .map(String::as_str)
        .unwrap_or("");
    let challenge = params
        .get("hub.challenge")
        .map(String::as_str)
        .unwrap_or("");

    let provider = state.providers.for_tag(&state.config.provider);
    match provider.verify_webhook_challenge(mode, token, challenge, &state.config.verify_token) {
        Some(challenge) => {
            tracing::info!("Webhook verification successful");
            (StatusCode::OK, challenge).into_response()
        }
        None => {
            tracing::warn!("Webhook verification failed");
            (
                StatusCode::FORBIDDEN,
                Json(json!({"detail": "Verification failed"})),
            )
                .into_response()
        }
    }
}

/// Provider callback receipt (POST)
async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => {
            tracing::warn!("Invalid JSON payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"detail": "Invalid JSON"})),
            )
                .into_response();
        }
    };

    // Adapter selection by payload shape
    let provider = state.providers.for_payload(&payload);

    // Per-adapter credential check: HMAC signature for Meta-style payloads,
    // shared key header for connector-style ones
    if provider.name() == "meta" {
        if let Some(secret) = &state.config.app_secret {
            let signature = headers
                .get("X-Hub-Signature-256")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if !provider.validate_webhook_signature(&body, signature, secret) {
                tracing::warn!("Invalid webhook signature");
                return (
                    StatusCode::FORBIDDEN,
                    Json(json!({"detail": "Invalid signature"})),
                )
                    .into_response();
            }
        }
    } else if let Some(shared_key) = &state.config.webhook_api_key {
        let presented = headers
            .get("apikey")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !provider.validate_webhook_signature(&body, presented, shared_key) {
            tracing::warn!("Invalid webhook shared key");
            return (
                StatusCode::FORBIDDEN,
                Json(json!({"detail": "Invalid credential"})),
            )
                .into_response();
        }
    }

    // Routing identifier for tenant resolution
    let routing_id = match provider.name() {
        "meta" => extract_phone_number_id(&payload),
        _ => payload["instance"].as_str().map(String::from),
    };
    let Some(routing_id) = routing_id else {
        tracing::debug!("No routing identifier in webhook payload; ignoring");
        return Json(json!({"status": "ignored", "reason": "no_routing_id"})).into_response();
    };

    let binding = match repo::binding_by_routing_id(&state.pool, &routing_id).await {
        Ok(binding) => binding,
        Err(e) => {
            // Still 200: the provider must not retry this delivery forever
            tracing::error!(error = %e, "Failed to resolve tenant binding");
            return Json(json!({"status": "error", "message": e.to_string()})).into_response();
        }
    };
    let Some(binding) = binding else {
        tracing::warn!(routing_id = %routing_id, "No tenant binding for routing identifier");
        return Json(json!({"status": "ignored", "reason": "no_binding"})).into_response();
    };

    let parsed = provider.parse_webhook(&payload);
    let (message_count, status_count) = (parsed.messages.len(), parsed.statuses.len());

    for message in parsed.messages {
        let correlation_id = Some(message.message_id.clone());
        let message_payload = match serde_json::to_value(&message) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode inbound message");
                continue;
            }
        };
        match state
            .producer
            .publish_inbound(binding.tenant_id, message_payload, correlation_id)
            .await
        {
            Ok(_) => {
                tracing::info!(
                    message_id = %message.message_id,
                    from = %message.from_phone,
                    message_type = %message.message_type,
                    "Published inbound message"
                );
            }
            Err(e) => {
                tracing::error!(
                    message_id = %message.message_id,
                    error = %e,
                    "Failed to publish inbound message"
                );
            }
        }
    }

    for status in parsed.statuses {
        let correlation_id = Some(status.provider_message_id.clone());
        let status_payload = status_to_payload(&status);
        if let Err(e) = state
            .producer
            .publish_inbound(
                binding.tenant_id,
                serde_json::to_value(&status_payload).unwrap_or_default(),
                correlation_id,
            )
            .await
        {
            tracing::error!(
                provider_message_id = %status.provider_message_id,
                error = %e,
                "Failed to publish status update"
            );
        }
    }

    Json(json!({
        "status": "accepted",
        "messages": message_count,
        "statuses": status_count,
    }))
    .into_response()
}

fn status_to_payload(status: &DeliveryStatusUpdate) -> StatusUpdatePayload {
    StatusUpdatePayload {
        is_status_update: true,
        provider_message_id: status.provider_message_id.clone(),
        recipient_phone: status.recipient_phone.clone(),
        status: status.status.clone(),
        timestamp: status.timestamp,
        error_code: status.error_code.clone(),
        error_message: status.error_message.clone(),
    }
}
