//! Messaging engine administration CLI
//!
//! Commands:
//! - `bind-tenant`        register a tenant's provider binding
//! - `unbind-tenant`      deactivate a binding (kept for audit)
//! - `list-bindings`      show bindings
//! - `list-conversations` show a tenant's conversations
//! - `send-test`          send a test message through the tenant's provider
//! - `replay-dlq`         republish dead-lettered envelopes to their streams
//! - `stream-info`        show stream length and consumer-group backlog

use clap::{Parser, Subcommand};
use event_bus::{EventEnvelope, RedisBus, StreamBus};
use std::sync::Arc;
use uuid::Uuid;

use messaging_rs::crypto::CredentialCipher;
use messaging_rs::db;
use messaging_rs::persistence::repo;
use messaging_rs::providers::{
    BindingCredentials, MessagingProvider, MetaCloudProvider, ProviderRegistry, StubProvider,
};
use messaging_rs::streams::{DLQ_STREAM, INBOUND_STREAM, OUTBOUND_STREAM};

#[derive(Parser)]
#[command(name = "messaging-cli", about = "Messaging engine administration")]
struct Cli {
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379/0")]
    redis_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a tenant's provider binding
    BindTenant {
        tenant_id: Uuid,
        /// Display phone number (e.g. +5511999999999)
        display_number: String,
        #[arg(long, default_value = "meta")]
        provider: String,
        /// Provider phone number id (Meta-style routing identifier)
        #[arg(long)]
        phone_number_id: Option<String>,
        /// Business account id
        #[arg(long)]
        waba_id: Option<String>,
        /// Access token; encrypted at rest when an encryption key is configured
        #[arg(long)]
        access_token: Option<String>,
        /// Webhook verify token
        #[arg(long)]
        verify_token: Option<String>,
        /// Connector instance name (routing identifier for connector providers)
        #[arg(long)]
        instance_name: Option<String>,
        /// Connector API base URL
        #[arg(long)]
        api_url: Option<String>,
    },
    /// Deactivate a binding by its routing identifier
    UnbindTenant { routing_id: String },
    /// List bindings
    ListBindings {
        #[arg(long)]
        tenant_id: Option<Uuid>,
        /// Include inactive bindings
        #[arg(long, short)]
        all: bool,
    },
    /// List a tenant's conversations
    ListConversations {
        tenant_id: Uuid,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Send a test message via the tenant's provider binding
    SendTest {
        /// Recipient phone number (E.164 format)
        to: String,
        #[arg(long, default_value = "Test message")]
        text: String,
        /// Tenant to send as; defaults to the first active binding
        #[arg(long)]
        tenant_id: Option<Uuid>,
    },
    /// Replay dead-lettered envelopes to their original streams
    ReplayDlq {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show stream length and consumer-group backlog
    StreamInfo {
        #[arg(default_value = INBOUND_STREAM)]
        stream: String,
    },
}

/// Stream a dead-lettered event replays to, by its original event type
fn replay_target(event_type: &str) -> Option<&'static str> {
    if event_type.contains("inbound") {
        Some(INBOUND_STREAM)
    } else if event_type.contains("outbound") || event_type.contains("queued") {
        Some(OUTBOUND_STREAM)
    } else {
        None
    }
}

fn require_database_url(cli: &Cli) -> String {
    cli.database_url.clone().unwrap_or_else(|| {
        eprintln!("DATABASE_URL must be set");
        std::process::exit(1);
    })
}

async fn connect_pool(cli: &Cli) -> sqlx::PgPool {
    let url = require_database_url(cli);
    match db::init_pool(&url).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Failed to connect to database: {e}");
            std::process::exit(1);
        }
    }
}

async fn connect_bus(cli: &Cli) -> RedisBus {
    match RedisBus::connect(&cli.redis_url).await {
        Ok(bus) => bus,
        Err(e) => {
            eprintln!("Failed to connect to the stream bus: {e}");
            std::process::exit(1);
        }
    }
}

fn load_cipher() -> Option<CredentialCipher> {
    match CredentialCipher::from_env() {
        Ok(cipher) => cipher,
        Err(e) => {
            eprintln!("Invalid credential encryption key: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match &cli.command {
        Command::BindTenant {
            tenant_id,
            display_number,
            provider,
            phone_number_id,
            waba_id,
            access_token,
            verify_token,
            instance_name,
            api_url,
        } => {
            match provider.as_str() {
                "meta" if phone_number_id.is_none() || waba_id.is_none() => {
                    eprintln!("meta provider requires --phone-number-id and --waba-id");
                    std::process::exit(1);
                }
                "stub" | "meta" => {}
                other => {
                    eprintln!("unknown provider: {other} (expected meta or stub)");
                    std::process::exit(1);
                }
            }
            if provider == "stub" && instance_name.is_none() && phone_number_id.is_none() {
                eprintln!("stub provider requires --instance-name or --phone-number-id");
                std::process::exit(1);
            }

            let stored_token = match access_token {
                Some(token) => match load_cipher() {
                    Some(cipher) => match cipher.encrypt(token) {
                        Ok(encrypted) => Some(encrypted),
                        Err(e) => {
                            eprintln!("Failed to encrypt access token: {e}");
                            std::process::exit(1);
                        }
                    },
                    None => {
                        eprintln!("warning: no encryption key set, storing token as provided");
                        Some(token.clone())
                    }
                },
                None => None,
            };

            let pool = connect_pool(&cli).await;
            let binding_id = match repo::create_binding(
                &pool,
                &repo::NewBinding {
                    tenant_id: *tenant_id,
                    provider: provider.as_str(),
                    phone_number_id: phone_number_id.as_deref(),
                    waba_id: waba_id.as_deref(),
                    access_token_encrypted: stored_token.as_deref(),
                    webhook_verify_token: verify_token.as_deref(),
                    instance_name: instance_name.as_deref(),
                    api_url: api_url.as_deref(),
                    display_number: display_number.as_str(),
                },
            )
            .await
            {
                Ok(id) => id,
                Err(e) => {
                    eprintln!("Failed to create binding: {e}");
                    std::process::exit(1);
                }
            };

            println!("Created binding {binding_id}");
            println!("  tenant:   {tenant_id}");
            println!("  provider: {provider}");
            println!("  display:  {display_number}");
        }

        Command::UnbindTenant { routing_id } => {
            let pool = connect_pool(&cli).await;
            match repo::deactivate_binding(&pool, routing_id).await {
                Ok(0) => {
                    eprintln!("No active binding for routing id {routing_id}");
                    std::process::exit(1);
                }
                Ok(_) => println!("Binding deactivated"),
                Err(e) => {
                    eprintln!("Failed to deactivate binding: {e}");
                    std::process::exit(1);
                }
            }
        }

        Command::ListBindings { tenant_id, all } => {
            let pool = connect_pool(&cli).await;
            let bindings = match repo::list_bindings(&pool, *tenant_id, *all).await {
                Ok(bindings) => bindings,
                Err(e) => {
                    eprintln!("Failed to list bindings: {e}");
                    std::process::exit(1);
                }
            };
            if bindings.is_empty() {
                println!("No bindings found");
                return;
            }
            println!(
                "{:<38} {:<10} {:<22} {:<18} active",
                "tenant", "provider", "routing id", "display"
            );
            for binding in bindings {
                println!(
                    "{:<38} {:<10} {:<22} {:<18} {}",
                    binding.tenant_id,
                    binding.provider,
                    binding.routing_id().unwrap_or("-"),
                    binding.display_number,
                    if binding.is_active { "yes" } else { "no" },
                );
            }
        }

        Command::ListConversations {
            tenant_id,
            status,
            limit,
        } => {
            let pool = connect_pool(&cli).await;
            let conversations =
                match repo::list_conversations(&pool, *tenant_id, status.as_deref(), *limit).await
                {
                    Ok(conversations) => conversations,
                    Err(e) => {
                        eprintln!("Failed to list conversations: {e}");
                        std::process::exit(1);
                    }
                };
            if conversations.is_empty() {
                println!("No conversations found");
                return;
            }
            println!(
                "{:<18} {:<20} {:<14} {:>8}  last message",
                "phone", "name", "status", "messages"
            );
            for conversation in conversations {
                println!(
                    "{:<18} {:<20} {:<14} {:>8}  {}",
                    conversation.customer_phone,
                    conversation.customer_name.as_deref().unwrap_or("-"),
                    conversation.status,
                    conversation.message_count,
                    conversation
                        .last_message_at
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }

        Command::SendTest {
            to,
            text,
            tenant_id,
        } => {
            let pool = connect_pool(&cli).await;
            let binding = match tenant_id {
                Some(tenant_id) => repo::active_binding_for_tenant(&pool, *tenant_id).await,
                None => repo::list_bindings(&pool, None, false)
                    .await
                    .map(|bindings| bindings.into_iter().next()),
            };
            let binding = match binding {
                Ok(Some(binding)) => binding,
                Ok(None) => {
                    eprintln!("No active binding found");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Failed to resolve binding: {e}");
                    std::process::exit(1);
                }
            };

            let Some(routing_id) = binding.routing_id().map(String::from) else {
                eprintln!("Binding has no routing identifier");
                std::process::exit(1);
            };
            let Some(stored) = binding.access_token_encrypted.as_deref() else {
                eprintln!("No access token configured for this binding");
                std::process::exit(1);
            };
            let access_token = match load_cipher() {
                Some(cipher) if CredentialCipher::looks_encrypted(stored) => {
                    match cipher.decrypt(stored) {
                        Ok(token) => token,
                        Err(e) => {
                            eprintln!("Failed to decrypt access token: {e}");
                            std::process::exit(1);
                        }
                    }
                }
                _ => stored.to_string(),
            };

            let registry = ProviderRegistry::new(
                Arc::new(MetaCloudProvider::new()),
                Arc::new(StubProvider::new()),
            );
            let provider = registry.for_tag(&binding.provider);
            let credentials = BindingCredentials {
                routing_id,
                access_token,
                api_url: binding.api_url.clone(),
            };

            let result = provider.send_text(&credentials, to, text, None).await;
            if result.success {
                println!(
                    "Message sent: provider message id {}",
                    result.message_id.unwrap_or_default()
                );
            } else {
                eprintln!(
                    "Send failed: {} ({})",
                    result.error_message.unwrap_or_default(),
                    result.error_code.unwrap_or_default(),
                );
                std::process::exit(1);
            }
        }

        Command::ReplayDlq { limit } => {
            let bus = connect_bus(&cli).await;
            let entries = match bus.range_head(DLQ_STREAM, *limit).await {
                Ok(entries) => entries,
                Err(e) => {
                    eprintln!("Failed to read DLQ: {e}");
                    std::process::exit(1);
                }
            };
            if entries.is_empty() {
                println!("No messages in DLQ");
                return;
            }
            println!("Found {} messages in DLQ", entries.len());

            let mut replayed = 0usize;
            for entry in entries {
                let envelope = match EventEnvelope::from_fields(&entry.id, &entry.fields) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        eprintln!("Skipping {}: {e}", entry.id);
                        continue;
                    }
                };
                let Some(original) = envelope.payload.get("original_event").cloned() else {
                    eprintln!("Skipping {}: no original_event", entry.id);
                    continue;
                };
                let original: EventEnvelope = match serde_json::from_value(original) {
                    Ok(original) => original,
                    Err(e) => {
                        eprintln!("Skipping {}: bad original_event: {e}", entry.id);
                        continue;
                    }
                };
                let Some(target) = replay_target(&original.event_type) else {
                    eprintln!(
                        "Skipping {}: unknown event type {}",
                        entry.id, original.event_type
                    );
                    continue;
                };

                if let Err(e) = bus
                    .append(target, &original.to_fields(), Some(100_000))
                    .await
                {
                    eprintln!("Failed to replay {}: {e}", entry.id);
                    continue;
                }
                let _ = bus.delete(DLQ_STREAM, &[entry.id.clone()]).await;
                println!("Replayed {} to {target}", entry.id);
                replayed += 1;
            }
            println!("Replayed {replayed} messages");
        }

        Command::StreamInfo { stream } => {
            let bus = connect_bus(&cli).await;
            match bus.stream_len(stream).await {
                Ok(len) => println!("Stream {stream}: {len} entries"),
                Err(e) => {
                    eprintln!("Failed to read stream info: {e}");
                    std::process::exit(1);
                }
            }
            match bus.group_info(stream).await {
                Ok(groups) if groups.is_empty() => println!("  no consumer groups"),
                Ok(groups) => {
                    for group in groups {
                        println!(
                            "  group {}: {} pending, {} consumers, last delivered {}",
                            group.name, group.pending, group.consumers, group.last_delivered_id
                        );
                    }
                }
                Err(e) => eprintln!("Failed to read group info: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_target_routing() {
        assert_eq!(
            replay_target("whatsapp_inbound_received"),
            Some(INBOUND_STREAM)
        );
        assert_eq!(
            replay_target("whatsapp_outbound_queued"),
            Some(OUTBOUND_STREAM)
        );
        assert_eq!(replay_target("whatsapp_customer_opted_out"), None);
    }
}
