//! API Handlers
//!
//! HTTP request handlers for each relay endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header::HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};

use crate::config::Config;
use crate::error::{FetchError, Result};
use crate::fetch::FetchRequest;
use crate::models::{
    BatchBody, BatchResponse, ClearResponse, HealthResponse, InvalidateResponse, RelayQuery,
    StatsResponse,
};
use crate::service::CacheService;

/// Response header naming the tier that answered.
pub const CACHE_SOURCE_HEADER: &str = "x-cache-source";

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CacheService>,
}

impl AppState {
    /// Creates a new AppState around a running service.
    pub fn new(service: Arc<CacheService>) -> Self {
        Self { service }
    }

    /// Creates a new AppState from configuration.
    ///
    /// Builds the cache service and starts its background tasks.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(Arc::new(CacheService::from_config(config)?)))
    }
}

fn relay_request(endpoint: String, query: HashMap<String, String>) -> Result<FetchRequest> {
    let endpoint = endpoint.trim_matches('/').to_string();
    if endpoint.is_empty() {
        return Err(FetchError::InvalidRequest("Endpoint cannot be empty".to_string()));
    }

    let relay = RelayQuery::parse(query).map_err(FetchError::InvalidRequest)?;
    let mut request = FetchRequest::new(endpoint)
        .with_params(relay.params)
        .force_refresh(relay.force_refresh);
    request.ttl = relay.ttl;
    Ok(request)
}

/// Handler for GET /v1/*endpoint
///
/// Answers with the normalized upstream envelope, from cache when possible.
pub async fn relay_handler(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response> {
    let request = relay_request(endpoint, query)?;
    let outcome = state.service.fetch(request).await?;

    let source = HeaderValue::from_static(outcome.source.as_str());
    Ok((
        [(HeaderName::from_static(CACHE_SOURCE_HEADER), source)],
        Json(outcome.envelope),
    )
        .into_response())
}

/// Handler for DELETE /v1/*endpoint
///
/// Drops one request's entry from both tiers.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<InvalidateResponse>> {
    let request = relay_request(endpoint, query)?;
    let key = request.fingerprint();
    let removed = state
        .service
        .invalidate(&request.endpoint, &request.params)
        .await;

    Ok(Json(InvalidateResponse::new(key, removed)))
}

/// Handler for POST /batch
///
/// Fans the request out over its partitions and merges the results.
pub async fn batch_handler(
    State(state): State<AppState>,
    Json(body): Json<BatchBody>,
) -> Result<Json<BatchResponse>> {
    let request = body
        .into_batch_request()
        .map_err(FetchError::InvalidRequest)?;
    let outcome = state.service.fetch_batch(&request).await?;

    Ok(Json(BatchResponse {
        response: outcome.items,
        report: outcome.report,
    }))
}

/// Handler for DELETE /cache
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    state.service.clear().await;
    Json(ClearResponse::new())
}

/// Handler for GET /stats
///
/// Returns current cache and fetch statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.service.stats().await))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
