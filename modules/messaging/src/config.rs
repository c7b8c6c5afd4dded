use std::env;
use std::time::Duration;

/// Messaging engine configuration parsed from environment variables
///
/// Shared by the webhook and worker binaries; each uses the subset it needs.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    /// Vertical whose domain stream carries notifications and messaging events
    pub vertical: String,
    pub consumer_name: String,
    pub batch_size: usize,
    pub block: Duration,
    pub reclaim_interval: Duration,
    pub reclaim_idle: Duration,
    pub max_retries: u64,
    pub stream_max_len: usize,
    /// Default provider tag for tenants without an explicit binding provider
    pub provider: String,
    pub app_secret: Option<String>,
    pub verify_token: String,
    /// Shared key validating connector-style webhooks (stub adapter)
    pub webhook_api_key: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/0".to_string());

        let vertical = env::var("MESSAGING_VERTICAL").unwrap_or_else(|_| "materials".to_string());

        let consumer_name = env::var("WHATSAPP_CONSUMER_NAME").unwrap_or_else(|_| {
            let host = env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
            format!("whatsapp-worker-{}-{}", host, std::process::id())
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

        let max_retries: u64 = env::var("MAX_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| "MAX_RETRIES must be an integer".to_string())?;

        let stream_max_len: usize = env::var("STREAM_MAX_LEN")
            .unwrap_or_else(|_| "100000".to_string())
            .parse()
            .map_err(|_| "STREAM_MAX_LEN must be an integer".to_string())?;

        let provider = env::var("WHATSAPP_PROVIDER").unwrap_or_else(|_| "stub".to_string());

        let app_secret = env::var("WHATSAPP_APP_SECRET").ok().filter(|s| !s.is_empty());

        let verify_token =
            env::var("WHATSAPP_VERIFY_TOKEN").unwrap_or_else(|_| "verify_token".to_string());

        let webhook_api_key = env::var("WHATSAPP_WEBHOOK_API_KEY")
            .ok()
            .filter(|s| !s.is_empty());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8090".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        Ok(Config {
            database_url,
            redis_url,
            vertical,
            consumer_name,
            batch_size,
            block,
            reclaim_interval,
            reclaim_idle,
            max_retries,
            stream_max_len,
            provider,
            app_secret,
            verify_token,
            webhook_api_key,
            host,
            port,
        })
    }
}
