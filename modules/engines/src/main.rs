use event_bus::{RedisBus, StreamBus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use engines_rs::config::Config;
use engines_rs::consumer::{consume_from_stream, reclaim_pending_messages, router_from_config};
use engines_rs::db;

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
        stream = %config.stream_name,
        group = %config.group_name,
        consumer = %config.consumer_name,
        batch_size = config.batch_size,
        "Starting engines worker"
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

    if let Err(e) = bus
        .ensure_group(&config.stream_name, &config.group_name, "0")
        .await
    {
        tracing::error!(error = %e, "Failed to initialize consumer group, exiting");
        std::process::exit(1);
    }

    let router = router_from_config(&config);

    // Pick up messages orphaned by a previous crash before consuming new ones
    match reclaim_pending_messages(&pool, bus.as_ref(), &router, &config).await {
        Ok(0) => {}
        Ok(count) => tracing::info!(count = count, "Initial reclaim processed orphaned messages"),
        Err(e) => tracing::warn!(error = %e, "Initial reclaim failed"),
    }

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

    // Background reclaim loop
    {
        let pool = pool.clone();
        let bus = bus.clone();
        let config = config.clone();
        let router = router_from_config(&config);
        let shutdown = shutdown.clone();
        let shutdown_notify = shutdown_notify.clone();
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = config.reclaim_interval.as_secs(),
                idle_ms = config.reclaim_idle.as_millis() as u64,
                "Starting pending-entry reclaim loop"
            );
            while !shutdown.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = tokio::time::sleep(config.reclaim_interval) => {}
                    _ = shutdown_notify.notified() => break,
                }
                match reclaim_pending_messages(&pool, bus.as_ref(), &router, &config).await {
                    Ok(0) => {}
                    Ok(count) => {
                        tracing::info!(count = count, "Reclaimed and processed pending messages")
                    }
                    Err(e) => tracing::error!(error = %e, "Error in reclaim loop"),
                }
            }
        });
    }

    // Main consume loop
    while !shutdown.load(Ordering::SeqCst) {
        match consume_from_stream(&pool, bus.as_ref(), &router, &config).await {
            Ok(0) => {}
            Ok(count) => tracing::info!(count = count, "Processed events from stream"),
            Err(e) => {
                tracing::error!(error = %e, "Error in consume loop");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    _ = shutdown_notify.notified() => {}
                }
            }
        }
    }

    tracing::info!("Engines worker shutting down gracefully");
}
