//! Repository for the messaging tables
//!
//! Reads take the pool; writes take the caller's transaction so handlers
//! control commit boundaries (all inbound work commits before the bus ack;
//! outbound commits the pending row before the provider call).

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::models::{Conversation, MessageDirection, MessageRow, MessageStatus, TenantBinding};

// ---------------------------------------------------------------------------
// Tenant bindings
// ---------------------------------------------------------------------------

/// Resolve a binding from the provider routing identifier
/// (phone_number_id for Meta-style providers, instance_name for connectors)
pub async fn binding_by_routing_id(
    pool: &PgPool,
    routing_id: &str,
) -> Result<Option<TenantBinding>, sqlx::Error> {
    sqlx::query_as::<_, TenantBinding>(
        r#"
        SELECT id, tenant_id, provider, phone_number_id, waba_id, access_token_encrypted,
               webhook_verify_token, instance_name, api_url, display_number, is_active, config
        FROM messaging_tenant_bindings
        WHERE (phone_number_id = $1 OR instance_name = $1) AND is_active
        "#,
    )
    .bind(routing_id)
    .fetch_optional(pool)
    .await
}

/// The active binding for a tenant (used for outbound sends)
pub async fn active_binding_for_tenant(
    pool: &PgPool,
    tenant_id: Uuid,
) -> Result<Option<TenantBinding>, sqlx::Error> {
    sqlx::query_as::<_, TenantBinding>(
        r#"
        SELECT id, tenant_id, provider, phone_number_id, waba_id, access_token_encrypted,
               webhook_verify_token, instance_name, api_url, display_number, is_active, config
        FROM messaging_tenant_bindings
        WHERE tenant_id = $1 AND is_active
        ORDER BY created_at
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

const CONVERSATION_COLUMNS: &str = "id, tenant_id, customer_phone, customer_name, status, \
     current_state, message_count, last_message_at, last_inbound_at, last_outbound_at, context";

pub async fn get_conversation(
    pool: &PgPool,
    tenant_id: Uuid,
    customer_phone: &str,
) -> Result<Option<Conversation>, sqlx::Error> {
    sqlx::query_as::<_, Conversation>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM messaging_conversations \
         WHERE tenant_id = $1 AND customer_phone = $2"
    ))
    .bind(tenant_id)
    .bind(customer_phone)
    .fetch_optional(pool)
    .await
}

/// Get or lazily create the conversation for `(tenant, phone)`
///
/// Returns `(conversation, created)`.
pub async fn get_or_create_conversation(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    customer_phone: &str,
    customer_name: Option<&str>,
) -> Result<(Conversation, bool), sqlx::Error> {
    let existing = sqlx::query_as::<_, Conversation>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM messaging_conversations \
         WHERE tenant_id = $1 AND customer_phone = $2"
    ))
    .bind(tenant_id)
    .bind(customer_phone)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(conversation) = existing {
        return Ok((conversation, false));
    }

    let created = sqlx::query_as::<_, Conversation>(&format!(
        "INSERT INTO messaging_conversations (tenant_id, customer_phone, customer_name, status, current_state) \
         VALUES ($1, $2, $3, 'active', 'new') \
         ON CONFLICT (tenant_id, customer_phone) DO NOTHING \
         RETURNING {CONVERSATION_COLUMNS}"
    ))
    .bind(tenant_id)
    .bind(customer_phone)
    .bind(customer_name)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(conversation) = created {
        return Ok((conversation, true));
    }

    // Lost a race with a concurrent insert; the row exists now
    let conversation = sqlx::query_as::<_, Conversation>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM messaging_conversations \
         WHERE tenant_id = $1 AND customer_phone = $2"
    ))
    .bind(tenant_id)
    .bind(customer_phone)
    .fetch_one(&mut **tx)
    .await?;
    Ok((conversation, false))
}

/// Record a message on the conversation: bump counters and timestamps
pub async fn record_conversation_message(
    tx: &mut Transaction<'_, Postgres>,
    conversation_id: Uuid,
    direction: MessageDirection,
    timestamp: Option<DateTime<Utc>>,
) -> Result<(), sqlx::Error> {
    let ts = timestamp.unwrap_or_else(Utc::now);
    let column = match direction {
        MessageDirection::Inbound => "last_inbound_at",
        MessageDirection::Outbound => "last_outbound_at",
    };
    sqlx::query(&format!(
        "UPDATE messaging_conversations \
         SET last_message_at = $2, {column} = $2, message_count = message_count + 1, updated_at = now() \
         WHERE id = $1"
    ))
    .bind(conversation_id)
    .bind(ts)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Update a conversation's status and FSM state label
pub async fn update_conversation_state(
    tx: &mut Transaction<'_, Postgres>,
    conversation_id: Uuid,
    status: &str,
    current_state: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE messaging_conversations
        SET status = $2, current_state = $3, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(conversation_id)
    .bind(status)
    .bind(current_state)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

const MESSAGE_COLUMNS: &str = "id, tenant_id, conversation_id, direction, provider_message_id, \
     message_type, content, status, error_code, error_message, template_name, triggered_by_event_id";

/// Whether a provider message id has already been persisted (inbound idempotency)
pub async fn message_exists(pool: &PgPool, provider_message_id: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM messaging_messages WHERE provider_message_id = $1)",
    )
    .bind(provider_message_id)
    .fetch_one(pool)
    .await
}

pub async fn message_by_provider_id(
    pool: &PgPool,
    provider_message_id: &str,
) -> Result<Option<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messaging_messages WHERE provider_message_id = $1"
    ))
    .bind(provider_message_id)
    .fetch_optional(pool)
    .await
}

pub struct NewMessage<'a> {
    pub tenant_id: Uuid,
    pub conversation_id: Uuid,
    pub direction: MessageDirection,
    pub message_type: &'a str,
    pub content: Option<&'a str>,
    pub content_json: serde_json::Value,
    pub provider_message_id: Option<&'a str>,
    pub status: MessageStatus,
    pub template_name: Option<&'a str>,
    pub reply_to_message_id: Option<&'a str>,
    pub triggered_by_event_id: Option<Uuid>,
}

/// Insert a message row, returning its id
pub async fn create_message(
    tx: &mut Transaction<'_, Postgres>,
    message: &NewMessage<'_>,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO messaging_messages
            (tenant_id, conversation_id, direction, message_type, content, content_json,
             provider_message_id, status, template_name, reply_to_message_id, triggered_by_event_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING id
        "#,
    )
    .bind(message.tenant_id)
    .bind(message.conversation_id)
    .bind(message.direction.as_str())
    .bind(message.message_type)
    .bind(message.content)
    .bind(&message.content_json)
    .bind(message.provider_message_id)
    .bind(message.status.as_str())
    .bind(message.template_name)
    .bind(message.reply_to_message_id)
    .bind(message.triggered_by_event_id)
    .fetch_one(&mut **tx)
    .await
}

/// Set the provider message id and status after a successful send
pub async fn mark_message_sent(
    tx: &mut Transaction<'_, Postgres>,
    message_id: Uuid,
    provider_message_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE messaging_messages
        SET provider_message_id = $2, status = 'sent', status_updated_at = now(), updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(message_id)
    .bind(provider_message_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Mark a message failed with the provider's error
pub async fn mark_message_failed(
    tx: &mut Transaction<'_, Postgres>,
    message_id: Uuid,
    error_code: Option<&str>,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE messaging_messages
        SET status = 'failed', error_code = $2, error_message = $3,
            status_updated_at = now(), updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(message_id)
    .bind(error_code)
    .bind(error_message)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Apply a provider delivery-status update to a message row
pub async fn update_message_status(
    tx: &mut Transaction<'_, Postgres>,
    message_id: Uuid,
    status: MessageStatus,
    error_code: Option<&str>,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE messaging_messages
        SET status = $2, error_code = $3, error_message = $4,
            status_updated_at = now(), updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(message_id)
    .bind(status.as_str())
    .bind(error_code)
    .bind(error_message)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Opt-outs
// ---------------------------------------------------------------------------

/// Whether outbound to this phone is blocked by an active opt-out
pub async fn is_opted_out(
    pool: &PgPool,
    tenant_id: Uuid,
    customer_phone: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM messaging_optouts
            WHERE tenant_id = $1 AND customer_phone = $2 AND is_active
        )
        "#,
    )
    .bind(tenant_id)
    .bind(customer_phone)
    .fetch_one(pool)
    .await
}

/// Record an opt-out; re-opting-out reactivates an old row
pub async fn upsert_optout(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    customer_phone: &str,
    reason: &str,
    original_message_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO messaging_optouts
            (tenant_id, customer_phone, reason, original_message_id, is_active)
        VALUES ($1, $2, $3, $4, TRUE)
        ON CONFLICT (tenant_id, customer_phone)
        DO UPDATE SET
            reason = EXCLUDED.reason,
            original_message_id = EXCLUDED.original_message_id,
            is_active = TRUE,
            reactivated_at = NULL,
            updated_at = now()
        "#,
    )
    .bind(tenant_id)
    .bind(customer_phone)
    .bind(reason)
    .bind(original_message_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Administration (CLI)
// ---------------------------------------------------------------------------

pub struct NewBinding<'a> {
    pub tenant_id: Uuid,
    pub provider: &'a str,
    pub phone_number_id: Option<&'a str>,
    pub waba_id: Option<&'a str>,
    pub access_token_encrypted: Option<&'a str>,
    pub webhook_verify_token: Option<&'a str>,
    pub instance_name: Option<&'a str>,
    pub api_url: Option<&'a str>,
    pub display_number: &'a str,
}

/// Register a tenant binding; returns its id
pub async fn create_binding(
    pool: &PgPool,
    binding: &NewBinding<'_>,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO messaging_tenant_bindings
            (tenant_id, provider, phone_number_id, waba_id, access_token_encrypted,
             webhook_verify_token, instance_name, api_url, display_number, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE)
        RETURNING id
        "#,
    )
    .bind(binding.tenant_id)
    .bind(binding.provider)
    .bind(binding.phone_number_id)
    .bind(binding.waba_id)
    .bind(binding.access_token_encrypted)
    .bind(binding.webhook_verify_token)
    .bind(binding.instance_name)
    .bind(binding.api_url)
    .bind(binding.display_number)
    .fetch_one(pool)
    .await
}

/// Deactivate a binding by routing identifier; the row survives for audit
pub async fn deactivate_binding(pool: &PgPool, routing_id: &str) -> Result<u64, sqlx::Error> {
    let outcome = sqlx::query(
        r#"
        UPDATE messaging_tenant_bindings
        SET is_active = FALSE, updated_at = now()
        WHERE (phone_number_id = $1 OR instance_name = $1) AND is_active
        "#,
    )
    .bind(routing_id)
    .execute(pool)
    .await?;
    Ok(outcome.rows_affected())
}

/// List bindings, newest first
pub async fn list_bindings(
    pool: &PgPool,
    tenant_id: Option<Uuid>,
    include_inactive: bool,
) -> Result<Vec<TenantBinding>, sqlx::Error> {
    sqlx::query_as::<_, TenantBinding>(
        r#"
        SELECT id, tenant_id, provider, phone_number_id, waba_id, access_token_encrypted,
               webhook_verify_token, instance_name, api_url, display_number, is_active, config
        FROM messaging_tenant_bindings
        WHERE ($1::uuid IS NULL OR tenant_id = $1)
          AND (is_active OR $2)
        ORDER BY created_at DESC
        "#,
    )
    .bind(tenant_id)
    .bind(include_inactive)
    .fetch_all(pool)
    .await
}

/// List a tenant's conversations, most recent activity first
pub async fn list_conversations(
    pool: &PgPool,
    tenant_id: Uuid,
    status: Option<&str>,
    limit: i64,
) -> Result<Vec<Conversation>, sqlx::Error> {
    sqlx::query_as::<_, Conversation>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM messaging_conversations \
         WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2) \
         ORDER BY last_message_at DESC NULLS LAST \
         LIMIT $3"
    ))
    .bind(tenant_id)
    .bind(status)
    .bind(limit)
    .fetch_all(pool)
    .await
}
