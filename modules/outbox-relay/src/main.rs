use event_bus::{RedisBus, StreamBus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use outbox_relay_rs::{config::Config, db, relay};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        std::process::exit(1);
    });

    tracing::info!(
        batch_size = config.batch_size,
        poll_empty_secs = config.poll_interval_empty.as_secs_f64(),
        poll_busy_secs = config.poll_interval_busy.as_secs_f64(),
        "Starting outbox relay"
    );

    let pool = match db::init_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };

    if let Err(e) = sqlx::migrate!("./db/migrations").run(&pool).await {
        tracing::error!(error = %e, "Failed to run migrations");
        std::process::exit(1);
    }

    let bus: Arc<dyn StreamBus> = match RedisBus::connect(&config.redis_url).await {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to the stream bus");
            std::process::exit(1);
        }
    };

    if let Err(e) = relay::ensure_stream_groups(bus.as_ref(), &config).await {
        tracing::error!(error = %e, "Failed to ensure consumer groups");
        std::process::exit(1);
    }

    // Cooperative shutdown: finish the in-flight batch, then exit 0
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_notify = Arc::new(Notify::new());
    {
        let shutdown = shutdown.clone();
        let shutdown_notify = shutdown_notify.clone();
        tokio::spawn(async move {
            let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            tracing::info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
            shutdown_notify.notify_waiters();
        });
    }

    relay::run(pool, bus, config, shutdown, shutdown_notify).await;
}
