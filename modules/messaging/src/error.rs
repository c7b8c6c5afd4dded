use event_bus::BusError;

use crate::crypto::CryptoError;

/// Errors surfaced by the messaging engine
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("credential error: {0}")]
    Crypto(#[from] CryptoError),
}
