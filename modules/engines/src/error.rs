use event_bus::BusError;

/// Errors surfaced by the engines worker
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("invalid payload: {0}")]
    Payload(String),
}
