//! # StreamBus Abstraction
//!
//! A platform-level abstraction for durable, consumer-grouped event streams.
//!
//! ## Why This Lives in Tier 1
//!
//! The stream bus is a **shared runtime capability** that all modules depend on.
//! Placing it in `platform/` allows:
//! - Modules to depend on platform crates without circular dependencies
//! - Plug-and-play module development (modules don't depend on each other)
//! - Config-driven swap between Redis Streams (production) and InMemory (dev/test)
//!
//! ## Delivery Model
//!
//! Messages appended to a stream persist until acknowledged by a consumer
//! group member. Unacknowledged messages remain on the group's pending-entry
//! list, visible via [`StreamBus::list_pending`] and transferable to another
//! consumer via [`StreamBus::claim`]. Combined with per-event idempotency on
//! the consumer side this yields at-least-once delivery with exactly-once
//! effects.
//!
//! ## Implementations
//!
//! - **RedisBus**: production implementation over Redis Streams
//! - **InMemoryBus**: test/dev implementation with the same group semantics
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{StreamBus, RedisBus, InMemoryBus};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Production: Redis Streams
//! let bus: Arc<dyn StreamBus> = Arc::new(RedisBus::connect("redis://localhost:6379/0").await?);
//!
//! // Dev/Test: In-Memory
//! let bus: Arc<dyn StreamBus> = Arc::new(InMemoryBus::new());
//!
//! bus.ensure_group("events:materials", "engines", "0").await?;
//! let fields = vec![("event_type".to_string(), "sale_recorded".to_string())];
//! bus.append("events:materials", &fields, Some(100_000)).await?;
//!
//! let batch = bus
//!     .read_group(&["events:materials"], "engines", "worker-1", 10, Duration::from_secs(5))
//!     .await?;
//! for msg in batch {
//!     // ... process ...
//!     bus.ack("events:materials", "engines", &msg.id).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod backoff;
mod envelope;
mod inmemory_bus;
mod redis_bus;

pub use backoff::PollBackoff;
pub use envelope::EventEnvelope;
pub use inmemory_bus::InMemoryBus;
pub use redis_bus::{GroupInfo, RedisBus};

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// A message read from a stream
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// Stream the message was read from
    pub stream: String,
    /// Bus-assigned monotonic message id
    pub id: String,
    /// String-keyed record of the message fields
    pub fields: HashMap<String, String>,
}

/// A pending (delivered but unacknowledged) entry of a consumer group
#[derive(Debug, Clone)]
pub struct PendingEntry {
    /// Message id of the pending entry
    pub id: String,
    /// Consumer currently owning the delivery
    pub consumer: String,
    /// Time since last delivery
    pub idle: Duration,
    /// Number of times the message has been delivered
    pub delivery_count: u64,
}

/// Errors that can occur when using the stream bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to append to stream: {0}")]
    AppendError(String),

    #[error("failed to read from stream: {0}")]
    ReadError(String),

    #[error("consumer group error: {0}")]
    GroupError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Result type for stream bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core stream bus abstraction: named streams with consumer groups
///
/// This trait defines the interface that all bus implementations must satisfy.
/// It covers the full consumer-group lifecycle: append, idempotent group
/// creation, blocking group reads, acknowledgement, and pending-entry
/// inspection and claim for crash recovery.
#[async_trait]
pub trait StreamBus: Send + Sync {
    /// Append a record to a stream, returning the assigned message id.
    ///
    /// `max_len` trims the stream approximately from the head when set; the
    /// trim is advisory, so consumers must tolerate missing historic entries.
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        max_len: Option<usize>,
    ) -> BusResult<String>;

    /// Idempotently create a consumer group on a stream.
    ///
    /// `start_id` of `"0"` replays the whole stream to the new group, `"$"`
    /// delivers only messages appended after creation. The stream is created
    /// if it does not exist. Returns `true` if the group was created, `false`
    /// if it already existed.
    async fn ensure_group(&self, stream: &str, group: &str, start_id: &str) -> BusResult<bool>;

    /// Read new messages for a consumer group member.
    ///
    /// Blocks for up to `block` when no messages are available. Each returned
    /// message is delivered to exactly this consumer and stays on the group's
    /// pending-entry list until acknowledged.
    async fn read_group(
        &self,
        streams: &[&str],
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> BusResult<Vec<StreamMessage>>;

    /// Acknowledge a delivered message. Returns the number acknowledged (0 or 1).
    async fn ack(&self, stream: &str, group: &str, msg_id: &str) -> BusResult<u64>;

    /// List pending entries idle for at least `min_idle`.
    async fn list_pending(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> BusResult<Vec<PendingEntry>>;

    /// Atomically transfer ownership of pending messages to `consumer`.
    ///
    /// Only entries idle for at least `min_idle` are claimed. Returns the
    /// claimed messages with their fields; entries trimmed from the stream are
    /// omitted.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        msg_ids: &[String],
    ) -> BusResult<Vec<StreamMessage>>;
}

impl fmt::Debug for dyn StreamBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamBus")
    }
}
