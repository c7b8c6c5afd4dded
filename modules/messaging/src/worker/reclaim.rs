//! Pending-entry reclaim
//!
//! Recovers messages from crashed or stuck consumers: every interval, list
//! pending entries idle beyond the threshold on the inbound and outbound
//! streams, claim them for this consumer, and run them through the normal
//! handlers. The claimed entry's delivery count is the attempt number for
//! the outbound retry budget; idempotency absorbs any concurrent delivery.

use event_bus::{EventEnvelope, StreamBus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::config::Config;
use crate::streams::{ENGINE_GROUP, INBOUND_STREAM, OUTBOUND_STREAM};
use crate::worker::inbound::InboundHandler;
use crate::worker::outbound::{OutboundHandler, OutboundOutcome};

/// Claim idle pending entries of one stream; returns `(message, delivery_count)`
async fn claim_idle(
    bus: &dyn StreamBus,
    stream: &str,
    config: &Config,
) -> Vec<(event_bus::StreamMessage, u64)> {
    let pending = match bus
        .list_pending(stream, ENGINE_GROUP, config.reclaim_idle, 100)
        .await
    {
        Ok(pending) => pending,
        Err(e) => {
            tracing::error!(stream = %stream, error = %e, "Failed to list pending entries");
            return Vec::new();
        }
    };
    if pending.is_empty() {
        return Vec::new();
    }

    // Claiming bumps the delivery count, so the attempt number of the claimed
    // message is its pre-claim count plus one
    let delivery_counts: HashMap<String, u64> = pending
        .iter()
        .map(|p| (p.id.clone(), p.delivery_count + 1))
        .collect();
    let ids: Vec<String> = pending.into_iter().map(|p| p.id).collect();

    let claimed = match bus
        .claim(
            stream,
            ENGINE_GROUP,
            &config.consumer_name,
            config.reclaim_idle,
            &ids,
        )
        .await
    {
        Ok(claimed) => claimed,
        Err(e) => {
            tracing::error!(stream = %stream, error = %e, "Failed to claim pending entries");
            return Vec::new();
        }
    };

    claimed
        .into_iter()
        .map(|msg| {
            let attempt = delivery_counts.get(&msg.id).copied().unwrap_or(2);
            (msg, attempt)
        })
        .collect()
}

/// One reclaim pass over the inbound and outbound streams
pub async fn reclaim_pass(
    bus: &dyn StreamBus,
    inbound: &InboundHandler,
    outbound: &OutboundHandler,
    config: &Config,
) -> usize {
    let mut handled = 0usize;

    for (msg, _) in claim_idle(bus, INBOUND_STREAM, config).await {
        let Ok(envelope) = EventEnvelope::from_fields(&msg.id, &msg.fields) else {
            let _ = bus.ack(INBOUND_STREAM, ENGINE_GROUP, &msg.id).await;
            continue;
        };
        match inbound.handle_envelope(&envelope).await {
            Ok(_) => {
                let _ = bus.ack(INBOUND_STREAM, ENGINE_GROUP, &msg.id).await;
                handled += 1;
            }
            Err(e) => {
                tracing::error!(msg_id = %msg.id, error = %e, "Failed to process reclaimed inbound message");
            }
        }
    }

    for (msg, attempt) in claim_idle(bus, OUTBOUND_STREAM, config).await {
        let Ok(envelope) = EventEnvelope::from_fields(&msg.id, &msg.fields) else {
            let _ = bus.ack(OUTBOUND_STREAM, ENGINE_GROUP, &msg.id).await;
            continue;
        };
        match outbound.handle_envelope(&envelope, attempt).await {
            Ok(OutboundOutcome::Retry) => {
                tracing::warn!(
                    msg_id = %msg.id,
                    attempt = attempt,
                    "Reclaimed send failed; leaving pending for another retry"
                );
            }
            Ok(_) => {
                let _ = bus.ack(OUTBOUND_STREAM, ENGINE_GROUP, &msg.id).await;
                handled += 1;
            }
            Err(e) => {
                tracing::error!(msg_id = %msg.id, error = %e, "Failed to process reclaimed outbound message");
            }
        }
    }

    handled
}

/// Reclaim loop; runs until shutdown
pub async fn run(
    bus: Arc<dyn StreamBus>,
    inbound: Arc<InboundHandler>,
    outbound: Arc<OutboundHandler>,
    config: Arc<Config>,
    shutdown: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
) {
    tracing::info!(
        interval_secs = config.reclaim_interval.as_secs(),
        idle_ms = config.reclaim_idle.as_millis() as u64,
        "Starting pending-entry reclaim loop"
    );

    while !shutdown.load(Ordering::SeqCst) {
        tokio::select! {
            _ = tokio::time::sleep(config.reclaim_interval) => {}
            _ = shutdown_notify.notified() => break,
        }

        let handled = reclaim_pass(bus.as_ref(), &inbound, &outbound, &config).await;
        if handled > 0 {
            tracing::info!(count = handled, "Reclaimed and processed pending messages");
        }
    }
}
