//! Redis Streams implementation of the stream bus
//!
//! Production backend. One `ConnectionManager` is shared by all operations;
//! it reconnects transparently, so loops recover from transient Redis
//! failures by retrying the call.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamInfoGroupsReply, StreamMaxlen, StreamPendingCountReply,
    StreamRangeReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

use crate::{BusError, BusResult, PendingEntry, StreamBus, StreamMessage};

/// Summary of one consumer group, as reported by the bus
#[derive(Debug, Clone)]
pub struct GroupInfo {
    pub name: String,
    pub consumers: u64,
    pub pending: u64,
    pub last_delivered_id: String,
}

/// Stream bus backed by Redis Streams (XADD / XREADGROUP / XACK / XPENDING / XCLAIM)
#[derive(Clone)]
pub struct RedisBus {
    conn: ConnectionManager,
}

impl RedisBus {
    /// Connect to Redis and build a managed connection
    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| BusError::ConnectionError(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Wrap an existing managed connection
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn message_from_entry(stream: &str, entry: &StreamId) -> StreamMessage {
        let mut fields = HashMap::with_capacity(entry.map.len());
        for (key, value) in &entry.map {
            if let Ok(s) = redis::from_redis_value::<String>(value) {
                fields.insert(key.clone(), s);
            }
        }
        StreamMessage {
            stream: stream.to_string(),
            id: entry.id.clone(),
            fields,
        }
    }

    // Admin-plane operations used by operational tooling (DLQ replay, stream
    // inspection). Not part of the consumer contract.

    /// Read up to `count` entries from the head of a stream, outside any group
    pub async fn range_head(&self, stream: &str, count: usize) -> BusResult<Vec<StreamMessage>> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn
            .xrange_count(stream, "-", "+", count)
            .await
            .map_err(|e| BusError::ReadError(e.to_string()))?;
        Ok(reply
            .ids
            .iter()
            .map(|entry| Self::message_from_entry(stream, entry))
            .collect())
    }

    /// Delete entries from a stream; returns the number removed
    pub async fn delete(&self, stream: &str, msg_ids: &[String]) -> BusResult<u64> {
        if msg_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .xdel(stream, msg_ids)
            .await
            .map_err(|e| BusError::ReadError(e.to_string()))?;
        Ok(removed)
    }

    /// Number of entries currently held in a stream
    pub async fn stream_len(&self, stream: &str) -> BusResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn
            .xlen(stream)
            .await
            .map_err(|e| BusError::ReadError(e.to_string()))?;
        Ok(len)
    }

    /// Consumer groups of a stream with their pending counts
    pub async fn group_info(&self, stream: &str) -> BusResult<Vec<GroupInfo>> {
        let mut conn = self.conn.clone();
        let reply: StreamInfoGroupsReply = conn
            .xinfo_groups(stream)
            .await
            .map_err(|e| BusError::ReadError(e.to_string()))?;
        Ok(reply
            .groups
            .into_iter()
            .map(|g| GroupInfo {
                name: g.name,
                consumers: g.consumers as u64,
                pending: g.pending as u64,
                last_delivered_id: g.last_delivered_id,
            })
            .collect())
    }
}

#[async_trait]
impl StreamBus for RedisBus {
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        max_len: Option<usize>,
    ) -> BusResult<String> {
        let mut conn = self.conn.clone();
        let id: String = match max_len {
            Some(n) => conn
                .xadd_maxlen(stream, StreamMaxlen::Approx(n), "*", fields)
                .await
                .map_err(|e| BusError::AppendError(e.to_string()))?,
            None => conn
                .xadd(stream, "*", fields)
                .await
                .map_err(|e| BusError::AppendError(e.to_string()))?,
        };
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str, start_id: &str) -> BusResult<bool> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<String> =
            conn.xgroup_create_mkstream(stream, group, start_id).await;
        match result {
            Ok(_) => {
                tracing::debug!(stream = %stream, group = %group, start_id = %start_id, "Created consumer group");
                Ok(true)
            }
            // Group already exists; creation is idempotent
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(false),
            Err(e) => Err(BusError::GroupError(e.to_string())),
        }
    }

    async fn read_group(
        &self,
        streams: &[&str],
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> BusResult<Vec<StreamMessage>> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);
        let ids: Vec<&str> = streams.iter().map(|_| ">").collect();

        let reply: StreamReadReply = conn
            .xread_options(streams, &ids, &opts)
            .await
            .map_err(|e| BusError::ReadError(e.to_string()))?;

        let mut messages = Vec::new();
        for key in &reply.keys {
            for entry in &key.ids {
                messages.push(Self::message_from_entry(&key.key, entry));
            }
        }
        Ok(messages)
    }

    async fn ack(&self, stream: &str, group: &str, msg_id: &str) -> BusResult<u64> {
        let mut conn = self.conn.clone();
        let acked: u64 = conn
            .xack(stream, group, &[msg_id])
            .await
            .map_err(|e| BusError::ReadError(e.to_string()))?;
        Ok(acked)
    }

    async fn list_pending(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> BusResult<Vec<PendingEntry>> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingCountReply = conn
            .xpending_count(stream, group, "-", "+", count)
            .await
            .map_err(|e| BusError::ReadError(e.to_string()))?;

        let min_idle_ms = min_idle.as_millis() as usize;
        let entries = reply
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms >= min_idle_ms)
            .map(|p| PendingEntry {
                id: p.id,
                consumer: p.consumer,
                idle: Duration::from_millis(p.last_delivered_ms as u64),
                delivery_count: p.times_delivered as u64,
            })
            .collect();
        Ok(entries)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        msg_ids: &[String],
    ) -> BusResult<Vec<StreamMessage>> {
        if msg_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let reply: StreamClaimReply = conn
            .xclaim(
                stream,
                group,
                consumer,
                min_idle.as_millis() as usize,
                msg_ids,
            )
            .await
            .map_err(|e| BusError::ReadError(e.to_string()))?;

        Ok(reply
            .ids
            .iter()
            .map(|entry| Self::message_from_entry(stream, entry))
            .collect())
    }
}
