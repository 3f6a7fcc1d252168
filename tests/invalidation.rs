use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
};
use bytes::Bytes;
use storefront_cache::cache::{
    CacheBackend, CacheConfig, FileBackend, InvalidationScope, PolicyEngine, StoreDriver,
};
use storefront_cache::infra::http::{
    AdminState, HealthResponse, InvalidateResponse, build_admin_router,
};
use storefront_cache::infra::services::{CacheServices, open_backend};
use storefront_cache::instrumentation::{Instrumentation, MemorySink, MonitoringConfig};
use tempfile::TempDir;
use tower::ServiceExt;

const TTL: Duration = Duration::from_secs(60);

fn file_services(dir: &TempDir, scope: InvalidationScope) -> CacheServices {
    let config = CacheConfig {
        driver: StoreDriver::File,
        file_directory: dir.path().join("cache"),
        invalidation_scope: scope,
        ..Default::default()
    };
    let backend = open_backend(&config).expect("file backend opens");
    let instrumentation = Arc::new(Instrumentation::new(
        MonitoringConfig {
            log_memory_usage: false,
            ..Default::default()
        },
        Arc::new(MemorySink::new()),
    ));
    CacheServices::assemble(config, PolicyEngine::default(), backend, instrumentation)
}

async fn seed(services: &CacheServices) {
    for (entity, id) in [("product", "5"), ("product", "9"), ("category", "1")] {
        services
            .store
            .put(
                &services.keys.model(entity, id),
                Bytes::from_static(b"{}"),
                TTL,
            )
            .await;
    }
    services
        .store
        .put(
            &services
                .keys
                .response("storefront_response_cache", "shop.home.index", "/", None),
            Bytes::from_static(b"{}"),
            TTL,
        )
        .await;
}

async fn present(services: &CacheServices, entity: &str, id: &str) -> bool {
    services
        .store
        .get(&services.keys.model(entity, id))
        .await
        .is_some()
}

fn admin(services: &CacheServices) -> Router {
    build_admin_router(AdminState {
        store: services.store.clone(),
        invalidator: services.invalidator.clone(),
    })
}

async fn post_json(app: &Router, uri: &str, body: &str) -> (StatusCode, Bytes) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should buffer");
    (status, body)
}

#[tokio::test]
async fn pattern_eviction_spares_other_entities() {
    let dir = tempfile::tempdir().expect("tempdir");
    let services = file_services(&dir, InvalidationScope::Exact);
    seed(&services).await;

    let removed = services
        .invalidator
        .invalidate("model:product:*")
        .await
        .expect("valid pattern");

    assert_eq!(removed, 2);
    assert!(!present(&services, "product", "5").await);
    assert!(!present(&services, "product", "9").await);
    assert!(present(&services, "category", "1").await);
}

#[tokio::test]
async fn repeated_invalidation_is_harmless() {
    let dir = tempfile::tempdir().expect("tempdir");
    let services = file_services(&dir, InvalidationScope::Exact);
    seed(&services).await;

    let first = services
        .invalidator
        .on_entity_mutated("Product", "5")
        .await
        .expect("valid pattern");
    let second = services
        .invalidator
        .on_entity_mutated("Product", "5")
        .await
        .expect("valid pattern");

    assert_eq!(first, 1);
    assert_eq!(second, 0);
    assert!(present(&services, "product", "9").await);
}

#[tokio::test]
async fn admin_routes_invalidate_by_pattern_and_entity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let services = file_services(&dir, InvalidationScope::EntityAndResponses);
    seed(&services).await;
    let app = admin(&services);

    let (status, body) = post_json(&app, "/cache/invalidate", r#"{"pattern":"model:category:*"}"#).await;
    assert_eq!(status, StatusCode::OK);
    let evicted: InvalidateResponse = serde_json::from_slice(&body).expect("json body");
    assert_eq!(evicted, InvalidateResponse { evicted: 1 });

    let (status, body) = post_json(&app, "/cache/entities/product/5", "").await;
    assert_eq!(status, StatusCode::OK);
    let evicted: InvalidateResponse = serde_json::from_slice(&body).expect("json body");
    // model:product:5, then model:product:9 via the entity pattern, then the home response.
    assert_eq!(evicted.evicted, 3);
    assert!(!present(&services, "product", "9").await);
}

#[tokio::test]
async fn malformed_pattern_is_a_client_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let services = file_services(&dir, InvalidationScope::Exact);
    let app = admin(&services);

    let (status, _) = post_json(&app, "/cache/invalidate", r#"{"pattern":"model:[product"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(services.invalidator.invalidate("model:{a,b").await.is_err());
}

#[tokio::test]
async fn health_reports_backend_and_latency() {
    let dir = tempfile::tempdir().expect("tempdir");
    let services = file_services(&dir, InvalidationScope::Exact);
    let app = admin(&services);

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request should build");
    let response = app.oneshot(request).await.expect("router is infallible");
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should buffer");
    let health: HealthResponse = serde_json::from_slice(&body).expect("json body");
    assert_eq!(health.store, "file");
}

#[tokio::test]
async fn file_entries_survive_a_new_backend_instance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let services = file_services(&dir, InvalidationScope::Exact);
    seed(&services).await;

    let reopened = FileBackend::new(dir.path().join("cache"));
    let key = services.keys.model("category", "1");
    let value = reopened.get(&key).await.expect("readable");
    assert_eq!(value, Some(Bytes::from_static(b"{}")));
}
