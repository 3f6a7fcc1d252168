use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    cache::{CacheStore, Invalidator},
    error::{AppError, ErrorReport},
};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct AdminState {
    pub store: CacheStore,
    pub invalidator: Invalidator,
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvalidateResponse {
    pub evicted: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub store: String,
    pub latency_ms: u128,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(admin_health))
        .route("/cache/invalidate", post(invalidate_pattern))
        .route("/cache/entities/{entity}/{id}", post(invalidate_entity))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn admin_health(State(state): State<AdminState>) -> Response {
    match state.store.probe().await {
        Ok(latency) => Json(HealthResponse {
            store: state.store.backend_name().to_string(),
            latency_ms: latency.as_millis(),
        })
        .into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::admin::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

async fn invalidate_pattern(
    State(state): State<AdminState>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>, AppError> {
    let evicted = state.invalidator.invalidate(&request.pattern).await?;
    info!(
        target = "storefront::http::admin",
        pattern = %request.pattern,
        evicted,
        "pattern invalidated"
    );
    Ok(Json(InvalidateResponse { evicted }))
}

async fn invalidate_entity(
    State(state): State<AdminState>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<Json<InvalidateResponse>, AppError> {
    let evicted = state.invalidator.on_entity_mutated(&entity, &id).await?;
    Ok(Json(InvalidateResponse { evicted }))
}
