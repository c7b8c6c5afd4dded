use std::env;
use std::time::Duration;

/// Relay configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub batch_size: i64,
    pub poll_interval_empty: Duration,
    pub poll_interval_busy: Duration,
    pub stream_max_len: usize,
    /// Verticals whose streams get the engines consumer group ensured at startup
    pub verticals: Vec<String>,
    /// Vertical used when an event payload carries none
    pub default_vertical: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/0".to_string());

        let batch_size: i64 = env::var("RELAY_BATCH_SIZE")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .map_err(|_| "RELAY_BATCH_SIZE must be an integer".to_string())?;

        let poll_interval_empty = env::var("RELAY_POLL_INTERVAL_EMPTY")
            .unwrap_or_else(|_| "5.0".to_string())
            .parse::<f64>()
            .map(Duration::from_secs_f64)
            .map_err(|_| "RELAY_POLL_INTERVAL_EMPTY must be a number of seconds".to_string())?;

        let poll_interval_busy = env::var("RELAY_POLL_INTERVAL_BUSY")
            .unwrap_or_else(|_| "0.1".to_string())
            .parse::<f64>()
            .map(Duration::from_secs_f64)
            .map_err(|_| "RELAY_POLL_INTERVAL_BUSY must be a number of seconds".to_string())?;

        let stream_max_len: usize = env::var("STREAM_MAX_LEN")
            .unwrap_or_else(|_| "100000".to_string())
            .parse()
            .map_err(|_| "STREAM_MAX_LEN must be an integer".to_string())?;

        let verticals: Vec<String> = env::var("RELAY_VERTICALS")
            .unwrap_or_else(|_| "materials".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let default_vertical = verticals
            .first()
            .cloned()
            .unwrap_or_else(|| "materials".to_string());

        Ok(Config {
            database_url,
            redis_url,
            batch_size,
            poll_interval_empty,
            poll_interval_busy,
            stream_max_len,
            verticals,
            default_vertical,
        })
    }
}
