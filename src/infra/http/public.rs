use std::{
    io::ErrorKind,
    path::{Component, Path as FsPath, PathBuf},
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error};

use crate::{
    cache::{CacheState, ModelCache, RouteTable, response_cache_layer},
    error::HttpError,
};

use super::middleware::{log_responses, set_request_context};

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("invalid content path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ContentError {
    fn is_not_found(&self) -> bool {
        match self {
            ContentError::InvalidPath => true,
            ContentError::Io(err) => err.kind() == ErrorKind::NotFound,
        }
    }
}

/// Directory of pre-rendered storefront pages and assets.
#[derive(Debug)]
pub struct ContentRoot {
    root: PathBuf,
}

impl ContentRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &FsPath {
        &self.root
    }

    pub async fn read(&self, relative: &str) -> Result<Bytes, ContentError> {
        let absolute = self.resolve(relative)?;
        Ok(Bytes::from(fs::read(absolute).await?))
    }

    async fn read_page(&self, relative: &str) -> Result<Option<String>, ContentError> {
        match self.read(relative).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, ContentError> {
        let relative = FsPath::new(relative);
        if relative.as_os_str().is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(ContentError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }
}

#[derive(Clone)]
pub struct HttpState {
    pub content: Arc<ContentRoot>,
    pub models: ModelCache,
    /// Lifetime of cached catalogue documents.
    pub model_lifetime: Duration,
}

/// Route templates and the names the cache policy classifies them by.
pub fn storefront_routes() -> RouteTable {
    RouteTable::new()
        .with("/", "shop.home.index")
        .with("/product/{slug}", "shop.product.index")
        .with("/category/{slug}", "shop.category.index")
        .with("/assets/{*path}", "shop.assets")
}

pub fn build_router(state: HttpState, cache: Option<CacheState>) -> Router {
    let routes = Router::new()
        .route("/", get(home))
        .route("/product/{slug}", get(product))
        .route("/category/{slug}", get(category))
        .route("/assets/{*path}", get(asset))
        .with_state(state);

    let routes = match cache {
        Some(cache) => routes.layer(middleware::from_fn_with_state(cache, response_cache_layer)),
        None => routes,
    };

    routes
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn home(State(state): State<HttpState>) -> Response {
    const SOURCE: &str = "infra::http::public::home";

    match state.content.read_page("index.html").await {
        Ok(Some(html)) => html_response(html),
        Ok(None) => not_found(SOURCE, "index.html is missing from the content root"),
        Err(err) => content_failure(SOURCE, "index.html", &err),
    }
}

async fn product(State(state): State<HttpState>, Path(slug): Path<String>) -> Response {
    catalog_page(&state, "product", &slug).await
}

async fn category(State(state): State<HttpState>, Path(slug): Path<String>) -> Response {
    catalog_page(&state, "category", &slug).await
}

async fn catalog_page(state: &HttpState, entity: &'static str, slug: &str) -> Response {
    const SOURCE: &str = "infra::http::public::catalog_page";

    let relative = format!("{entity}/{slug}.html");
    let content = state.content.clone();
    let page = state
        .models
        .find(entity, slug, state.model_lifetime, |relations| {
            let relative = relative.clone();
            async move {
                debug!(entity, relations = ?relations, path = %relative, "loading catalogue page");
                content.read_page(&relative).await
            }
        })
        .await;

    match page {
        Ok(Some(html)) => html_response(html),
        Ok(None) => not_found(SOURCE, format!("no {entity} page for `{slug}`")),
        Err(err) => content_failure(SOURCE, &relative, &err),
    }
}

async fn asset(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::public::asset";

    let relative = format!("assets/{path}");
    match state.content.read(&relative).await {
        Ok(bytes) => asset_response(&path, bytes),
        Err(err) if err.is_not_found() => not_found(SOURCE, format!("asset `{path}` not found")),
        Err(err) => content_failure(SOURCE, &relative, &err),
    }
}

fn html_response(html: String) -> Response {
    ([(CONTENT_TYPE, HTML_CONTENT_TYPE)], html).into_response()
}

fn asset_response(path: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));

    response
}

fn not_found(source: &'static str, detail: impl Into<String>) -> Response {
    HttpError::new(source, StatusCode::NOT_FOUND, "Not found", detail).into_response()
}

fn content_failure(source: &'static str, path: &str, err: &ContentError) -> Response {
    error!(target = source, path = %path, error = %err, "failed to read storefront content");
    HttpError::from_error(
        source,
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
        err,
    )
    .into_response()
}
