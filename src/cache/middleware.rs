//! Response cache middleware.
//!
//! Decides cacheability for every request, serves stored bodies for cacheable routes and
//! negotiates `ETag` validators on everything it lets through. Event streams, responses
//! that set cookies and non-2xx responses pass through untouched.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, Request, StatusCode,
        header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, SET_COOKIE},
        response::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::counter;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::{
    CacheConfig,
    headers::if_none_match,
    keys::{CacheKey, KeyBuilder},
    orchestrator::{self, CacheOutcome},
    policy::{CachePolicyDecision, PolicyEngine, RequestDescriptor},
    store::CacheStore,
};
use crate::instrumentation::Instrumentation;

pub(crate) const METRIC_HIT_TOTAL: &str = "storefront_cache_hit_total";
pub(crate) const METRIC_MISS_TOTAL: &str = "storefront_cache_miss_total";
pub(crate) const METRIC_NOT_MODIFIED_TOTAL: &str = "storefront_cache_not_modified_total";

const EVENT_STREAM: &str = "text/event-stream";

/// Explicit route name, set by the handler stack ahead of this middleware.
#[derive(Debug, Clone)]
pub struct RouteName(pub String);

/// Explicit authentication state; overrides header and cookie sniffing.
#[derive(Debug, Clone, Copy)]
pub struct Authenticated(pub bool);

/// Maps axum route templates to logical route names.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    names: HashMap<String, String>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, template: &str, name: &str) -> Self {
        self.insert(template, name);
        self
    }

    pub fn insert(&mut self, template: &str, name: &str) {
        self.names.insert(template.to_string(), name.to_string());
    }

    pub fn resolve(&self, template: &str) -> Option<&str> {
        self.names.get(template).map(String::as_str)
    }
}

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub config: Arc<CacheConfig>,
    pub policy: Arc<PolicyEngine>,
    pub store: CacheStore,
    pub keys: KeyBuilder,
    pub instrumentation: Arc<Instrumentation>,
    pub routes: Arc<RouteTable>,
}

impl CacheState {
    pub fn new(
        config: CacheConfig,
        policy: PolicyEngine,
        store: CacheStore,
        instrumentation: Arc<Instrumentation>,
        routes: RouteTable,
    ) -> Self {
        let keys = KeyBuilder::new(&config.namespace);
        Self {
            config: Arc::new(config),
            policy: Arc::new(policy),
            store,
            keys,
            instrumentation,
            routes: Arc::new(routes),
        }
    }

    /// Build the policy input for `request`.
    pub fn describe(&self, request: &Request<Body>) -> RequestDescriptor {
        RequestDescriptor {
            method: request.method().clone(),
            route_name: self.route_name(request),
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            is_authenticated: self.is_authenticated(request),
            incoming_validators: if_none_match(request.headers()),
        }
    }

    fn route_name(&self, request: &Request<Body>) -> String {
        if let Some(RouteName(name)) = request.extensions().get::<RouteName>() {
            return name.clone();
        }
        match request.extensions().get::<MatchedPath>() {
            Some(matched) => self
                .routes
                .resolve(matched.as_str())
                .unwrap_or(matched.as_str())
                .to_string(),
            None => String::new(),
        }
    }

    fn is_authenticated(&self, request: &Request<Body>) -> bool {
        if let Some(Authenticated(authenticated)) = request.extensions().get::<Authenticated>() {
            return *authenticated;
        }
        let headers = request.headers();
        headers.contains_key(AUTHORIZATION) || has_cookie(headers, &self.config.session_cookie)
    }

    fn response_key(&self, descriptor: &RequestDescriptor) -> CacheKey {
        self.keys.response(
            &self.config.response_tag,
            &descriptor.route_name,
            &descriptor.path,
            descriptor.query.as_deref(),
        )
    }
}

fn has_cookie(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.split_once('='))
        .any(|(cookie, _)| cookie.trim() == name)
}

/// A rendered response as kept in the backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "super::backend::payload")]
    pub body: Bytes,
}

impl CachedResponse {
    fn new(parts: &Parts, body: Bytes) -> Self {
        Self {
            status: parts.status.as_u16(),
            headers: parts
                .headers
                .iter()
                .filter(|(name, _)| **name != CONTENT_LENGTH)
                .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
                .collect(),
            body,
        }
    }

    fn into_response(self) -> (Response, Bytes) {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.append(name, value);
            }
        }

        (response, self.body)
    }
}

/// Middleware for response caching and validator negotiation.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled {
        return next.run(request).await;
    }

    let descriptor = cache.describe(&request);
    let decision = cache.policy.decide(&descriptor);
    let label = render_label(&descriptor);

    if !decision.is_cacheable() {
        let response = cache
            .instrumentation
            .measure_async(&label, next.run(request))
            .await;
        return orchestrator::apply(&CacheOutcome::Uncached, &decision, response);
    }

    let class = decision.class.as_str();
    let key = decision
        .store_lifetime()
        .map(|_| cache.response_key(&descriptor));

    if let Some(key) = &key {
        if let Some(cached) = cache.store.get_json::<CachedResponse>(key).await {
            debug!(cache = "response", outcome = "hit", class, "serving cached response");
            counter!(METRIC_HIT_TOTAL, "class" => class).increment(1);
            let (response, body) = cached.into_response();
            return negotiate(&decision, &descriptor, &body, response);
        }
        debug!(cache = "response", outcome = "miss", class, "cache miss, executing handler");
        counter!(METRIC_MISS_TOTAL, "class" => class).increment(1);
    }

    let response = cache
        .instrumentation
        .measure_async(&label, next.run(request))
        .await;

    if !response.status().is_success() || !is_storable(&response) {
        return response;
    }
    if declared_length(&response).is_some_and(|len| len > cache.config.response_body_limit_bytes)
    {
        debug!(cache = "response", "body above limit, passing through");
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, cache.config.response_body_limit_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let (Some(key), Some(ttl)) = (&key, decision.store_lifetime())
        && parts.status == StatusCode::OK
    {
        debug!(cache = "response", class, "caching response");
        cache
            .store
            .put_json(key, &CachedResponse::new(&parts, bytes.clone()), ttl)
            .await;
    }

    let response = Response::from_parts(parts, Body::from(bytes.clone()));
    negotiate(&decision, &descriptor, &bytes, response)
}

fn negotiate(
    decision: &CachePolicyDecision,
    descriptor: &RequestDescriptor,
    body: &[u8],
    response: Response,
) -> Response {
    let outcome = orchestrator::evaluate(decision, descriptor, body, OffsetDateTime::now_utc());
    if matches!(outcome, CacheOutcome::NotModified { .. }) {
        counter!(METRIC_NOT_MODIFIED_TOTAL, "class" => decision.class.as_str()).increment(1);
    }
    orchestrator::apply(&outcome, decision, response)
}

fn is_storable(response: &Response) -> bool {
    let headers = response.headers();
    if headers.contains_key(SET_COOKIE) {
        return false;
    }
    !headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(EVENT_STREAM))
}

fn declared_length(response: &Response) -> Option<usize> {
    response
        .headers()
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn render_label(descriptor: &RequestDescriptor) -> String {
    if descriptor.route_name.is_empty() {
        format!("render {}", descriptor.path)
    } else {
        format!("render {}", descriptor.route_name)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use axum::http::Method;

    use super::*;
    use crate::cache::backend::MemoryBackend;
    use crate::instrumentation::{MemorySink, MonitoringConfig};

    fn state(routes: RouteTable) -> CacheState {
        let sink = Arc::new(MemorySink::new());
        let backend = Arc::new(MemoryBackend::new(NonZeroUsize::new(8).expect("capacity")));
        CacheState::new(
            CacheConfig::default(),
            PolicyEngine::default(),
            CacheStore::new(backend, Duration::from_millis(250), sink.clone()),
            Arc::new(Instrumentation::new(
                MonitoringConfig {
                    log_memory_usage: false,
                    ..Default::default()
                },
                sink,
            )),
            routes,
        )
    }

    fn request(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request should build")
    }

    #[test]
    fn route_name_extension_wins() {
        let mut req = request("/product/lamp");
        req.extensions_mut()
            .insert(RouteName("shop.product.index".into()));
        let descriptor = state(RouteTable::new()).describe(&req);
        assert_eq!(descriptor.route_name, "shop.product.index");
        assert_eq!(descriptor.path, "/product/lamp");
    }

    #[test]
    fn missing_route_information_yields_empty_name() {
        let descriptor = state(RouteTable::new()).describe(&request("/?page=2"));
        assert_eq!(descriptor.route_name, "");
        assert_eq!(descriptor.query.as_deref(), Some("page=2"));
    }

    #[test]
    fn authorization_header_or_session_cookie_authenticates() {
        let state = state(RouteTable::new());

        let mut bearer = request("/");
        bearer
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        assert!(state.describe(&bearer).is_authenticated);

        let mut cookie = request("/");
        cookie.headers_mut().insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; storefront_session=abc"),
        );
        assert!(state.describe(&cookie).is_authenticated);

        let mut other_cookie = request("/");
        other_cookie
            .headers_mut()
            .insert(COOKIE, HeaderValue::from_static("storefront_session_hint=1"));
        assert!(!state.describe(&other_cookie).is_authenticated);
    }

    #[test]
    fn authenticated_extension_overrides_headers() {
        let mut req = request("/");
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        req.extensions_mut().insert(Authenticated(false));
        assert!(!state(RouteTable::new()).describe(&req).is_authenticated);
    }

    #[test]
    fn route_table_resolves_templates() {
        let routes = RouteTable::new().with("/product/{slug}", "shop.product.index");
        assert_eq!(
            routes.resolve("/product/{slug}"),
            Some("shop.product.index")
        );
        assert_eq!(routes.resolve("/other"), None);
    }

    #[test]
    fn event_streams_and_cookies_are_not_storable() {
        let mut stream = Response::new(Body::empty());
        stream
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
        assert!(!is_storable(&stream));

        let mut cookie = Response::new(Body::empty());
        cookie
            .headers_mut()
            .insert(SET_COOKIE, HeaderValue::from_static("a=b"));
        assert!(!is_storable(&cookie));

        assert!(is_storable(&Response::new(Body::empty())));
    }

    #[test]
    fn cached_response_restores_status_and_headers() {
        let mut response = Response::new(Body::empty());
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        response
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("5"));
        let (parts, _) = response.into_parts();

        let cached = CachedResponse::new(&parts, Bytes::from_static(b"hello"));
        assert!(cached.headers.iter().all(|(name, _)| name != "content-length"));

        let (restored, body) = cached.into_response();
        assert_eq!(restored.status(), StatusCode::OK);
        assert_eq!(
            restored.headers()[CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        assert_eq!(body, Bytes::from_static(b"hello"));
    }
}
