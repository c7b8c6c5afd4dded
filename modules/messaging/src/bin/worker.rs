use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use event_bus::{RedisBus, StreamBus};
use messaging_rs::config::Config;
use messaging_rs::crypto::CredentialCipher;
use messaging_rs::db;
use messaging_rs::providers::{MetaCloudProvider, ProviderRegistry, StubProvider};
use messaging_rs::streams::{ensure_messaging_streams, MessagingProducer};
use messaging_rs::worker;
use messaging_rs::worker::inbound::InboundHandler;
use messaging_rs::worker::notifications::NotificationHandler;
use messaging_rs::worker::outbound::OutboundHandler;

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
        consumer = %config.consumer_name,
        batch_size = config.batch_size,
        provider = %config.provider,
        "Starting messaging worker"
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

    if let Err(e) = ensure_messaging_streams(bus.as_ref(), &config.vertical).await {
        tracing::error!(error = %e, "Failed to ensure messaging streams");
        std::process::exit(1);
    }

    let cipher = match CredentialCipher::from_env() {
        Ok(cipher) => cipher.map(Arc::new),
        Err(e) => {
            tracing::error!(error = %e, "Invalid credential encryption key");
            std::process::exit(1);
        }
    };
    if cipher.is_none() {
        tracing::warn!("No credential encryption key configured; tokens are read as stored");
    }

    let producer = Arc::new(MessagingProducer::new(
        bus.clone(),
        config.vertical.clone(),
        config.stream_max_len,
    ));
    // One long-lived provider set per worker process
    let providers = Arc::new(ProviderRegistry::new(
        Arc::new(MetaCloudProvider::new()),
        Arc::new(StubProvider::new()),
    ));

    let config = Arc::new(config);
    let inbound = Arc::new(InboundHandler::new(pool.clone(), producer.clone()));
    let outbound = Arc::new(OutboundHandler::new(
        pool.clone(),
        producer.clone(),
        providers,
        cipher,
        &config,
    ));
    let notifications = Arc::new(NotificationHandler::new(producer));

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

    worker::run(
        bus,
        inbound,
        outbound,
        notifications,
        config,
        shutdown,
        shutdown_notify,
    )
    .await;
}
