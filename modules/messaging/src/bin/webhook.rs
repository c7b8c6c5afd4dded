use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use event_bus::{RedisBus, StreamBus};
use messaging_rs::config::Config;
use messaging_rs::providers::{MetaCloudProvider, ProviderRegistry, StubProvider};
use messaging_rs::streams::{ensure_messaging_streams, MessagingProducer};
use messaging_rs::webhook::{router, AppState};
use messaging_rs::db;

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
        host = %config.host,
        port = config.port,
        provider = %config.provider,
        "Starting messaging webhook"
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

    let producer = Arc::new(MessagingProducer::new(
        bus,
        config.vertical.clone(),
        config.stream_max_len,
    ));
    let providers = Arc::new(ProviderRegistry::new(
        Arc::new(MetaCloudProvider::new()),
        Arc::new(StubProvider::new()),
    ));

    let config = Arc::new(config);
    let state = AppState {
        pool,
        producer,
        providers,
        config: config.clone(),
    };

    let app = router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(addr = %addr, "Messaging webhook listening");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
