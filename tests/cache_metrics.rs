use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::Path,
    http::{Method, Request, StatusCode, header::IF_NONE_MATCH},
    middleware,
    routing::get,
};
use metrics_util::debugging::DebuggingRecorder;
use storefront_cache::cache::{
    CacheConfig, MemoryBackend, PolicyEngine, RouteTable, response_cache_layer,
};
use storefront_cache::infra::services::CacheServices;
use storefront_cache::instrumentation::{
    GradeThresholds, Instrumentation, MonitoringConfig, TracingSink,
};
use tower::ServiceExt;

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let instrumentation = Arc::new(Instrumentation::new(
        MonitoringConfig {
            log_execution_time: true,
            log_memory_usage: false,
            slow_threshold: Duration::from_millis(1),
            grades: GradeThresholds::default(),
        },
        Arc::new(TracingSink),
    ));
    let backend = Arc::new(MemoryBackend::new(NonZeroUsize::new(16).expect("capacity")));
    let services = CacheServices::assemble(
        CacheConfig::default(),
        PolicyEngine::default(),
        backend,
        instrumentation,
    );

    let routes = RouteTable::new().with("/category/{slug}", "shop.category.index");
    let app = Router::new()
        .route(
            "/category/{slug}",
            get(|Path(slug): Path<String>| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                format!("<ul>{slug}</ul>")
            }),
        )
        .layer(middleware::from_fn_with_state(
            services.response_state(routes),
            response_cache_layer,
        ));

    // miss, hit, then a conditional hit.
    let mut etag = String::new();
    for attempt in 0..3 {
        let mut request = Request::builder()
            .method(Method::GET)
            .uri("/category/lamps")
            .body(Body::empty())
            .expect("request should build");
        if attempt == 2 {
            request
                .headers_mut()
                .insert(IF_NONE_MATCH, etag.parse().expect("header value"));
        }
        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        if let Some(value) = response.headers().get("etag") {
            etag = value.to_str().expect("ascii etag").to_string();
        }
        assert!(matches!(
            response.status(),
            StatusCode::OK | StatusCode::NOT_MODIFIED
        ));
    }

    services
        .invalidator
        .invalidate("model:category:*")
        .await
        .expect("valid pattern");

    // Swallowed store failure: a value that does not decode as the requested type.
    let key = services.keys.build(["broken"]);
    services
        .store
        .put(&key, bytes::Bytes::from_static(b"not json"), Duration::from_secs(5))
        .await;
    assert!(services.store.get_json::<Vec<u32>>(&key).await.is_none());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "storefront_cache_hit_total",
        "storefront_cache_miss_total",
        "storefront_cache_not_modified_total",
        "storefront_cache_invalidated_keys_total",
        "storefront_cache_store_error_total",
        "storefront_operation_ms",
        "storefront_slow_operation_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
