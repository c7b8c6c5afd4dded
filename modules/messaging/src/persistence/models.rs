//! Rows and state enums of the messaging tables

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Status of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    Active,
    WaitingResponse,
    HumanAssigned,
    Closed,
    OptedOut,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::WaitingResponse => "waiting_response",
            Self::HumanAssigned => "human_assigned",
            Self::Closed => "closed",
            Self::OptedOut => "opted_out",
        }
    }
}

/// Fine-grained conversation FSM label used by automation flows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    New,
    Idle,
    AwaitingResponse,
    Processing,
    QuoteFlow,
    OrderStatusFlow,
    HumanRequested,
    Closed,
    OptedOut,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Idle => "idle",
            Self::AwaitingResponse => "awaiting_response",
            Self::Processing => "processing",
            Self::QuoteFlow => "quote_flow",
            Self::OrderStatusFlow => "order_status_flow",
            Self::HumanRequested => "human_requested",
            Self::Closed => "closed",
            Self::OptedOut => "opted_out",
        }
    }
}

/// Direction of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "in",
            Self::Outbound => "out",
        }
    }
}

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    /// Map a provider-reported status string
    pub fn from_provider(status: &str) -> Option<Self> {
        match status {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A tenant's provider binding
#[derive(Debug, Clone, FromRow)]
pub struct TenantBinding {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub provider: String,
    pub phone_number_id: Option<String>,
    pub waba_id: Option<String>,
    pub access_token_encrypted: Option<String>,
    pub webhook_verify_token: Option<String>,
    pub instance_name: Option<String>,
    pub api_url: Option<String>,
    pub display_number: String,
    pub is_active: bool,
    pub config: serde_json::Value,
}

impl TenantBinding {
    /// The identifier incoming webhooks are routed by
    pub fn routing_id(&self) -> Option<&str> {
        self.phone_number_id
            .as_deref()
            .or(self.instance_name.as_deref())
    }

    /// Whether the tenant wants acknowledgment auto-replies
    pub fn auto_reply_enabled(&self) -> bool {
        self.config
            .get("auto_reply_enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }

    /// Tenant display name for reply templates
    pub fn business_name(&self) -> String {
        self.config
            .get("business_name")
            .and_then(|v| v.as_str())
            .unwrap_or("nossa loja")
            .to_string()
    }
}

/// A conversation row
#[derive(Debug, Clone, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub customer_phone: String,
    pub customer_name: Option<String>,
    pub status: String,
    pub current_state: Option<String>,
    pub message_count: i32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub context: serde_json::Value,
}

/// A message row
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub conversation_id: Uuid,
    pub direction: String,
    pub provider_message_id: Option<String>,
    pub message_type: String,
    pub content: Option<String>,
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub template_name: Option<String>,
    pub triggered_by_event_id: Option<Uuid>,
}
