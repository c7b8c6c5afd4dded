//! In-memory implementation of the stream bus
//!
//! Dev/test twin of [`RedisBus`](crate::RedisBus) with the same consumer-group
//! semantics: per-group delivery cursor, pending-entry list with idle tracking
//! and delivery counts, idle-based claim, and approximate head trim.
//!
//! Not intended for production use; everything lives behind one async mutex.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

use crate::{BusError, BusResult, PendingEntry, StreamBus, StreamMessage};

#[derive(Clone)]
struct Entry {
    id: (u64, u64),
    fields: HashMap<String, String>,
}

struct Pending {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Default)]
struct Group {
    last_delivered: (u64, u64),
    pending: HashMap<(u64, u64), Pending>,
}

#[derive(Default)]
struct Stream {
    entries: VecDeque<Entry>,
    next_seq: u64,
    groups: HashMap<String, Group>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, Stream>,
}

/// In-memory stream bus with full consumer-group semantics
pub struct InMemoryBus {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

fn format_id(id: (u64, u64)) -> String {
    format!("{}-{}", id.0, id.1)
}

fn parse_id(s: &str) -> Option<(u64, u64)> {
    let (ms, seq) = s.split_once('-')?;
    Some((ms.parse().ok()?, seq.parse().ok()?))
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    /// Total number of entries currently held in a stream (testing aid)
    pub async fn len(&self, stream: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.streams.get(stream).map_or(0, |s| s.entries.len())
    }

    /// Whether a stream holds no entries (testing aid)
    pub async fn is_empty(&self, stream: &str) -> bool {
        self.len(stream).await == 0
    }
}

#[async_trait]
impl StreamBus for InMemoryBus {
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        max_len: Option<usize>,
    ) -> BusResult<String> {
        let mut inner = self.inner.lock().await;
        let s = inner.streams.entry(stream.to_string()).or_default();
        // Ids start at 1-0 so a fresh group cursor of 0-0 sees every entry
        s.next_seq += 1;
        let id = (s.next_seq, 0);
        s.entries.push_back(Entry {
            id,
            fields: fields.iter().cloned().collect(),
        });
        if let Some(max) = max_len {
            while s.entries.len() > max {
                s.entries.pop_front();
            }
        }
        drop(inner);
        self.notify.notify_waiters();
        Ok(format_id(id))
    }

    async fn ensure_group(&self, stream: &str, group: &str, start_id: &str) -> BusResult<bool> {
        let mut inner = self.inner.lock().await;
        let s = inner.streams.entry(stream.to_string()).or_default();
        if s.groups.contains_key(group) {
            return Ok(false);
        }
        let last_delivered = match start_id {
            // "$" delivers only entries appended after group creation
            "$" => s.entries.back().map(|e| e.id).unwrap_or((0, 0)),
            _ => parse_id(start_id).unwrap_or((0, 0)),
        };
        s.groups.insert(
            group.to_string(),
            Group {
                last_delivered,
                pending: HashMap::new(),
            },
        );
        Ok(true)
    }

    async fn read_group(
        &self,
        streams: &[&str],
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> BusResult<Vec<StreamMessage>> {
        let deadline = Instant::now() + block;
        loop {
            {
                let mut inner = self.inner.lock().await;
                let mut messages = Vec::new();
                for stream in streams {
                    let s = inner
                        .streams
                        .get_mut(*stream)
                        .ok_or_else(|| BusError::ReadError(format!("no such stream: {stream}")))?;
                    let Stream {
                        entries, groups, ..
                    } = s;
                    let g = groups.get_mut(group).ok_or_else(|| {
                        BusError::GroupError(format!("no such group: {group} on {stream}"))
                    })?;
                    let new_entries: Vec<Entry> = entries
                        .iter()
                        .filter(|e| e.id > g.last_delivered)
                        .take(count.saturating_sub(messages.len()))
                        .cloned()
                        .collect();
                    for entry in new_entries {
                        g.last_delivered = entry.id;
                        g.pending.insert(
                            entry.id,
                            Pending {
                                consumer: consumer.to_string(),
                                delivered_at: Instant::now(),
                                delivery_count: 1,
                            },
                        );
                        messages.push(StreamMessage {
                            stream: stream.to_string(),
                            id: format_id(entry.id),
                            fields: entry.fields,
                        });
                    }
                }
                if !messages.is_empty() {
                    return Ok(messages);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, msg_id: &str) -> BusResult<u64> {
        let id = parse_id(msg_id)
            .ok_or_else(|| BusError::ReadError(format!("bad message id: {msg_id}")))?;
        let mut inner = self.inner.lock().await;
        let removed = inner
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .map(|g| g.pending.remove(&id).is_some())
            .unwrap_or(false);
        Ok(u64::from(removed))
    }

    async fn list_pending(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> BusResult<Vec<PendingEntry>> {
        let inner = self.inner.lock().await;
        let Some(g) = inner.streams.get(stream).and_then(|s| s.groups.get(group)) else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<PendingEntry> = g
            .pending
            .iter()
            .filter(|(_, p)| p.delivered_at.elapsed() >= min_idle)
            .map(|(id, p)| PendingEntry {
                id: format_id(*id),
                consumer: p.consumer.clone(),
                idle: p.delivered_at.elapsed(),
                delivery_count: p.delivery_count,
            })
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries.truncate(count);
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
        let mut inner = self.inner.lock().await;
        let Some(s) = inner.streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let Stream {
            entries, groups, ..
        } = s;
        let Some(g) = groups.get_mut(group) else {
            return Ok(Vec::new());
        };
        let mut claimed = Vec::new();
        for msg_id in msg_ids {
            let Some(id) = parse_id(msg_id) else { continue };
            let Some(p) = g.pending.get_mut(&id) else {
                continue;
            };
            if p.delivered_at.elapsed() < min_idle {
                continue;
            }
            match entries.iter().find(|e| e.id == id) {
                Some(entry) => {
                    p.consumer = consumer.to_string();
                    p.delivered_at = Instant::now();
                    p.delivery_count += 1;
                    claimed.push(StreamMessage {
                        stream: stream.to_string(),
                        id: format_id(id),
                        fields: entry.fields.clone(),
                    });
                }
                // Entry trimmed from the stream; drop the dangling pending record
                None => {
                    g.pending.remove(&id);
                }
            }
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_append_read_ack() {
        let bus = InMemoryBus::new();
        bus.ensure_group("s", "g", "0").await.unwrap();
        let id = bus
            .append("s", &fields(&[("event_type", "sale_recorded")]), None)
            .await
            .unwrap();

        let batch = bus
            .read_group(&["s"], "g", "c1", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
        assert_eq!(
            batch[0].fields.get("event_type").map(String::as_str),
            Some("sale_recorded")
        );

        assert_eq!(bus.ack("s", "g", &id).await.unwrap(), 1);
        // Second ack is a no-op
        assert_eq!(bus.ack("s", "g", &id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_each_message_delivered_to_one_consumer() {
        let bus = InMemoryBus::new();
        bus.ensure_group("s", "g", "0").await.unwrap();
        bus.append("s", &fields(&[("n", "1")]), None).await.unwrap();
        bus.append("s", &fields(&[("n", "2")]), None).await.unwrap();

        let a = bus
            .read_group(&["s"], "g", "c1", 1, Duration::from_millis(10))
            .await
            .unwrap();
        let b = bus
            .read_group(&["s"], "g", "c2", 1, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_ne!(a[0].id, b[0].id);
    }

    #[tokio::test]
    async fn test_unacked_messages_stay_pending_and_are_claimable() {
        let bus = InMemoryBus::new();
        bus.ensure_group("s", "g", "0").await.unwrap();
        bus.append("s", &fields(&[("n", "1")]), None).await.unwrap();

        let batch = bus
            .read_group(&["s"], "g", "crashed", 10, Duration::from_millis(10))
            .await
            .unwrap();
        let msg_id = batch[0].id.clone();

        let pending = bus
            .list_pending("s", "g", Duration::ZERO, 100)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].consumer, "crashed");
        assert_eq!(pending[0].delivery_count, 1);

        let claimed = bus
            .claim("s", "g", "rescuer", Duration::ZERO, &[msg_id.clone()])
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, msg_id);

        let pending = bus
            .list_pending("s", "g", Duration::ZERO, 100)
            .await
            .unwrap();
        assert_eq!(pending[0].consumer, "rescuer");
        assert_eq!(pending[0].delivery_count, 2);

        bus.ack("s", "g", &msg_id).await.unwrap();
        let pending = bus
            .list_pending("s", "g", Duration::ZERO, 100)
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_claim_respects_min_idle() {
        let bus = InMemoryBus::new();
        bus.ensure_group("s", "g", "0").await.unwrap();
        bus.append("s", &fields(&[("n", "1")]), None).await.unwrap();
        let batch = bus
            .read_group(&["s"], "g", "c1", 10, Duration::from_millis(10))
            .await
            .unwrap();

        // Just delivered, so an idle threshold keeps the entry with its owner
        let claimed = bus
            .claim("s", "g", "c2", Duration::from_secs(60), &[batch[0].id.clone()])
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_group_is_idempotent() {
        let bus = InMemoryBus::new();
        assert!(bus.ensure_group("s", "g", "0").await.unwrap());
        assert!(!bus.ensure_group("s", "g", "0").await.unwrap());
    }

    #[tokio::test]
    async fn test_dollar_group_skips_history() {
        let bus = InMemoryBus::new();
        bus.append("s", &fields(&[("n", "old")]), None)
            .await
            .unwrap();
        bus.ensure_group("s", "late", "$").await.unwrap();
        bus.append("s", &fields(&[("n", "new")]), None)
            .await
            .unwrap();

        let batch = bus
            .read_group(&["s"], "late", "c1", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].fields.get("n").map(String::as_str), Some("new"));
    }

    #[tokio::test]
    async fn test_max_len_trims_from_head() {
        let bus = InMemoryBus::new();
        for i in 0..10 {
            bus.append("s", &fields(&[("n", &i.to_string())]), Some(5))
                .await
                .unwrap();
        }
        assert_eq!(bus.len("s").await, 5);
    }

    #[tokio::test]
    async fn test_read_group_blocks_until_append() {
        let bus = std::sync::Arc::new(InMemoryBus::new());
        bus.ensure_group("s", "g", "0").await.unwrap();

        let reader = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.read_group(&["s"], "g", "c1", 10, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.append("s", &fields(&[("n", "1")]), None).await.unwrap();

        let batch = reader.await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
