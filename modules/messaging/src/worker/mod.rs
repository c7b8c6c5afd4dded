//! Messaging worker: three consume loops plus pending-entry reclaim
//!
//! The loops are independent and communicate only via the bus; each owns its
//! own database sessions, so no shared mutex is needed:
//!
//! - **inbound** — conversation state, automation, auto-replies
//! - **outbound** — provider sends with retries and DLQ
//! - **notifications** — vertical events → templated outbound messages
//!
//! Ack policy differs per loop: inbound/outbound ack only terminal outcomes
//! (retryable failures stay pending for reclaim); the notification loop
//! always acks because it shares the domain stream and must never block it.

pub mod inbound;
pub mod notifications;
pub mod outbound;
pub mod reclaim;

use event_bus::{EventEnvelope, StreamBus, StreamMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::Config;
use crate::streams::{domain_stream, ENGINE_GROUP, INBOUND_STREAM, NOTIFIER_GROUP, OUTBOUND_STREAM};
use self::inbound::InboundHandler;
use self::notifications::NotificationHandler;
use self::outbound::{OutboundHandler, OutboundOutcome};

/// Decode a stream message, treating malformed envelopes as poison
fn decode_envelope(msg: &StreamMessage) -> Option<EventEnvelope> {
    match EventEnvelope::from_fields(&msg.id, &msg.fields) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::warn!(msg_id = %msg.id, error = %e, "Unparseable envelope; dropping");
            None
        }
    }
}

/// One pass of the inbound loop; returns messages handled
pub async fn inbound_pass(
    bus: &dyn StreamBus,
    handler: &InboundHandler,
    config: &Config,
    block: Duration,
) -> usize {
    let messages = match bus
        .read_group(
            &[INBOUND_STREAM],
            ENGINE_GROUP,
            &config.consumer_name,
            config.batch_size,
            block,
        )
        .await
    {
        Ok(messages) => messages,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read inbound stream");
            return 0;
        }
    };

    let mut handled = 0usize;
    for msg in &messages {
        let Some(envelope) = decode_envelope(msg) else {
            let _ = bus.ack(INBOUND_STREAM, ENGINE_GROUP, &msg.id).await;
            continue;
        };
        match handler.handle_envelope(&envelope).await {
            Ok(result) => {
                if let Err(e) = bus.ack(INBOUND_STREAM, ENGINE_GROUP, &msg.id).await {
                    tracing::error!(msg_id = %msg.id, error = %e, "Failed to ack inbound message");
                }
                handled += 1;
                tracing::debug!(msg_id = %msg.id, result = %result, "Processed inbound message");
            }
            Err(e) => {
                // Stays pending; reclaim will redeliver
                tracing::error!(msg_id = %msg.id, error = %e, "Failed to process inbound message");
            }
        }
    }
    handled
}

/// One pass of the outbound loop; returns messages handled
pub async fn outbound_pass(
    bus: &dyn StreamBus,
    handler: &OutboundHandler,
    config: &Config,
    block: Duration,
) -> usize {
    let messages = match bus
        .read_group(
            &[OUTBOUND_STREAM],
            ENGINE_GROUP,
            &config.consumer_name,
            config.batch_size,
            block,
        )
        .await
    {
        Ok(messages) => messages,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read outbound stream");
            return 0;
        }
    };

    let mut handled = 0usize;
    for msg in &messages {
        let Some(envelope) = decode_envelope(msg) else {
            let _ = bus.ack(OUTBOUND_STREAM, ENGINE_GROUP, &msg.id).await;
            continue;
        };
        // First delivery; redeliveries arrive through reclaim with the
        // pending entry's delivery count
        match handler.handle_envelope(&envelope, 1).await {
            Ok(OutboundOutcome::Retry) => {
                tracing::warn!(msg_id = %msg.id, "Send failed; leaving pending for retry");
            }
            Ok(outcome) => {
                if let Err(e) = bus.ack(OUTBOUND_STREAM, ENGINE_GROUP, &msg.id).await {
                    tracing::error!(msg_id = %msg.id, error = %e, "Failed to ack outbound message");
                }
                handled += 1;
                tracing::debug!(msg_id = %msg.id, outcome = ?outcome, "Processed outbound message");
            }
            Err(e) => {
                tracing::error!(msg_id = %msg.id, error = %e, "Failed to process outbound message");
            }
        }
    }
    handled
}

/// One pass of the vertical-notification loop; returns messages handled
///
/// Best-effort: every message is acked, processed or not, because this loop
/// shares the domain stream with other consumers of its group and must never
/// wedge it.
pub async fn notifications_pass(
    bus: &dyn StreamBus,
    handler: &NotificationHandler,
    config: &Config,
    block: Duration,
) -> usize {
    let stream = domain_stream(&config.vertical);
    let messages = match bus
        .read_group(
            &[stream.as_str()],
            NOTIFIER_GROUP,
            &config.consumer_name,
            config.batch_size,
            block,
        )
        .await
    {
        Ok(messages) => messages,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read domain stream");
            return 0;
        }
    };

    let mut handled = 0usize;
    for msg in &messages {
        if let Some(envelope) = decode_envelope(msg) {
            match handler.handle_domain_event(&envelope).await {
                Ok(result) => {
                    tracing::debug!(msg_id = %msg.id, result = %result, "Processed vertical event");
                }
                Err(e) => {
                    tracing::error!(msg_id = %msg.id, error = %e, "Failed to process vertical event");
                }
            }
        }
        if let Err(e) = bus.ack(&stream, NOTIFIER_GROUP, &msg.id).await {
            tracing::error!(msg_id = %msg.id, error = %e, "Failed to ack vertical event");
        }
        handled += 1;
    }
    handled
}

/// Run all worker loops until shutdown
pub async fn run(
    bus: Arc<dyn StreamBus>,
    inbound_handler: Arc<InboundHandler>,
    outbound_handler: Arc<OutboundHandler>,
    notification_handler: Arc<NotificationHandler>,
    config: Arc<Config>,
    shutdown: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
) {
    let mut tasks = Vec::new();

    // Inbound loop blocks for the full configured duration; outbound and
    // notification loops poll with a short block so one quiet stream does
    // not starve the others.
    {
        let bus = bus.clone();
        let config = config.clone();
        let handler = inbound_handler.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            while !shutdown.load(Ordering::SeqCst) {
                let count = inbound_pass(bus.as_ref(), &handler, &config, config.block).await;
                if count > 0 {
                    tracing::info!(count = count, "Processed inbound messages");
                }
            }
        }));
    }

    {
        let bus = bus.clone();
        let config = config.clone();
        let handler = outbound_handler.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            while !shutdown.load(Ordering::SeqCst) {
                let count =
                    outbound_pass(bus.as_ref(), &handler, &config, Duration::from_millis(100))
                        .await;
                if count > 0 {
                    tracing::info!(count = count, "Processed outbound messages");
                } else {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }));
    }

    {
        let bus = bus.clone();
        let config = config.clone();
        let handler = notification_handler.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            while !shutdown.load(Ordering::SeqCst) {
                let count =
                    notifications_pass(bus.as_ref(), &handler, &config, Duration::from_millis(100))
                        .await;
                if count > 0 {
                    tracing::info!(count = count, "Processed vertical events");
                } else {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }));
    }

    {
        let bus = bus.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();
        let shutdown_notify = shutdown_notify.clone();
        tasks.push(tokio::spawn(async move {
            reclaim::run(
                bus,
                inbound_handler,
                outbound_handler,
                config,
                shutdown,
                shutdown_notify,
            )
            .await;
        }));
    }

    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("Messaging worker shutting down gracefully");
}
