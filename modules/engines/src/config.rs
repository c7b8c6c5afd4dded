use rust_decimal::Decimal;
use std::env;
use std::time::Duration;

/// Engines worker configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub stream_name: String,
    pub group_name: String,
    pub consumer_name: String,
    pub batch_size: usize,
    pub block: Duration,
    pub reclaim_interval: Duration,
    pub reclaim_idle: Duration,
    pub lead_time_days: u32,
    pub safety_percent: Decimal,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/0".to_string());

        let stream_name =
            env::var("ENGINES_STREAM_NAME").unwrap_or_else(|_| "events:materials".to_string());

        let group_name = env::var("ENGINES_GROUP_NAME").unwrap_or_else(|_| "engines".to_string());

        let consumer_name = env::var("ENGINES_CONSUMER_NAME").unwrap_or_else(|_| {
            let host = env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
            format!("engines-{}-{}", host, std::process::id())
        });

        let batch_size: usize = env::var("BATCH_SIZE")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| "BATCH_SIZE must be an integer".to_string())?;

        let block = env::var("BLOCK_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| "BLOCK_MS must be an integer".to_string())?;

        let reclaim_interval = env::var("RECLAIM_INTERVAL_SEC")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| "RECLAIM_INTERVAL_SEC must be an integer".to_string())?;

        let reclaim_idle = env::var("RECLAIM_IDLE_MS")
            .unwrap_or_else(|_| "60000".to_string())
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| "RECLAIM_IDLE_MS must be an integer".to_string())?;

        let lead_time_days: u32 = env::var("ENGINES_LEAD_TIME_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .map_err(|_| "ENGINES_LEAD_TIME_DAYS must be an integer".to_string())?;

        let safety_percent: Decimal = env::var("ENGINES_SAFETY_PERCENT")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .map_err(|_| "ENGINES_SAFETY_PERCENT must be a decimal".to_string())?;

        Ok(Config {
            database_url,
            redis_url,
            stream_name,
            group_name,
            consumer_name,
            batch_size,
            block,
            reclaim_interval,
            reclaim_idle,
            lead_time_days,
            safety_percent,
        })
    }
}
