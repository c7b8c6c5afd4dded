//! # Engines Worker
//!
//! Consumer-group worker that applies domain events to engine-owned fact and
//! projection tables: stock alerts, replenishment suggestions, and sales
//! suggestions.
//!
//! ## Guarantees
//!
//! - **Exactly-once effect** on at-least-once delivery: the processed-event
//!   key and all projection writes for an event commit in one transaction;
//!   a key conflict rolls everything back and the event is a no-op.
//! - **Data independence**: every alert and suggestion is computed from the
//!   engine facts tables only. The worker never reads vertical tables.
//! - **Stream safety**: unknown event types are logged and treated as
//!   successful no-ops so the stream is never poisoned.

pub mod config;
pub mod consumer;
pub mod db;
pub mod engines;
pub mod error;
pub mod events;
pub mod repos;
pub mod router;

pub use error::EngineError;
