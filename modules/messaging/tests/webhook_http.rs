//! Webhook ingress HTTP contract
//!
//! Exercises the handler paths that do not reach the database: verification
//! challenge, malformed JSON, and signature rejection. The pool is lazy, so
//! no PostgreSQL is needed for these paths.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use event_bus::InMemoryBus;
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use sha2::Sha256;
use std::sync::Arc;
use tower::ServiceExt;

use messaging_rs::config::Config;
use messaging_rs::providers::{MetaCloudProvider, ProviderRegistry, StubProvider};
use messaging_rs::streams::MessagingProducer;
use messaging_rs::webhook::{router, AppState};

fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/unused".to_string(),
        redis_url: "redis://localhost:6379/0".to_string(),
        vertical: "materials".to_string(),
        consumer_name: "test".to_string(),
        batch_size: 10,
        block: std::time::Duration::from_millis(100),
        reclaim_interval: std::time::Duration::from_secs(60),
        reclaim_idle: std::time::Duration::from_millis(60_000),
        max_retries: 3,
        stream_max_len: 1000,
        provider: "meta".to_string(),
        app_secret: Some("app-secret".to_string()),
        verify_token: "verify-me".to_string(),
        webhook_api_key: None,
        host: "127.0.0.1".to_string(),
        port: 0,
    }
}

fn test_app() -> axum::Router {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/unused")
        .expect("lazy pool");
    let bus = Arc::new(InMemoryBus::new());
    let producer = Arc::new(MessagingProducer::new(bus, "materials", 1000));
    let providers = Arc::new(ProviderRegistry::new(
        Arc::new(MetaCloudProvider::new()),
        Arc::new(StubProvider::new()),
    ));
    router(AppState {
        pool,
        producer,
        providers,
        config: Arc::new(test_config()),
    })
}

#[tokio::test]
async fn verification_challenge_is_echoed_on_token_match() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=12345")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"12345");
}

#[tokio::test]
async fn verification_challenge_rejects_bad_token() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=12345")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_json_is_a_client_error() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_signature_is_rejected_when_secret_configured() {
    let app = test_app();
    let body = r#"{"object":"whatsapp_business_account","entry":[]}"#;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn valid_signature_without_routing_id_is_acknowledged() {
    let app = test_app();
    let body = r#"{"object":"whatsapp_business_account","entry":[]}"#;

    let mut mac = Hmac::<Sha256>::new_from_slice(b"app-secret").unwrap();
    mac.update(body.as_bytes());
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .header("X-Hub-Signature-256", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    // No routing identifier resolves: still 200 so the provider stops retrying
    assert_eq!(response.status(), StatusCode::OK);
    let payload: serde_json::Value = serde_json::from_slice(
        &response.into_body().collect().await.unwrap().to_bytes(),
    )
    .unwrap();
    assert_eq!(payload["status"], "ignored");
    assert_eq!(payload["reason"], "no_routing_id");
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let app = test_app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
