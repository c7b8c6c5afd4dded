//! # Outbox Relay
//!
//! Drains committed domain events from the transactional outbox table and
//! republishes them to the stream bus, at-least-once, safely across multiple
//! relay replicas.
//!
//! Batches are selected with `FOR UPDATE SKIP LOCKED` so concurrent replicas
//! partition the work without blocking each other. A crash between the stream
//! append and the `published_at` update produces a duplicate publication;
//! downstream idempotency absorbs it.

pub mod config;
pub mod db;
pub mod outbox;
pub mod relay;
