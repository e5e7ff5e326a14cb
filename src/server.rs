//! HTTP surface for the search engine.
//!
//! Three endpoints: `/health` for readiness, `/search` for governed
//! queries (caller identity arrives in `X-User-Role` and `X-User-Context`
//! headers), and `/tables` for dataset stats. Error bodies stay generic
//! unless query logging is on, which marks a debug environment.

use crate::backends::memory::MemoryProvider;
use crate::engine::SearchEngine;
use crate::error::SearchError;
use crate::types::{SearchOptions, SecurityContext};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub engine: Arc<SearchEngine>,
    pub provider: Arc<MemoryProvider>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/search", get(search))
        .route("/tables", get(tables))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.engine.search_stats().await;
    let ready = stats.database_health.is_connected;
    Json(json!({
        "status": if ready { "ok" } else { "degraded" },
        "timestamp": Utc::now().to_rfc3339(),
        "database": stats.database_health,
        "cache": stats.cache_health,
        "strategy": stats.recommended_strategy,
    }))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default = "default_dataset")]
    dataset: String,
}

fn default_page() -> usize {
    1
}
fn default_limit() -> usize {
    20
}
fn default_dataset() -> String {
    "healthcare".to_string()
}

async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let context = context_from_headers(&headers);

    let mut options = SearchOptions {
        limit: params.limit,
        offset: params.page.saturating_sub(1) * params.limit,
        ..Default::default()
    };
    options
        .filters
        .custom
        .insert("dataset".into(), json!(params.dataset));

    match state.engine.secure_search(&params.q, &context, &options).await {
        Ok(response) => Ok(Json(json!({
            "items": response.results,
            "page": params.page,
            "total": response.performance.result_count,
            "maskedFields": response.metadata.get("masked_fields").cloned().unwrap_or(json!([])),
            "strategy": {
                "primary": response.strategy.primary,
                "fallback": response.strategy.fallback,
                "reason": response.strategy.reason,
                "cache_hit": response.performance.cache_hit,
            },
            "auditId": response.audit_id,
        }))),
        Err(error) => Err(error_response(&state, error)),
    }
}

async fn tables(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "tables": state.provider.dataset_stats() }))
}

fn context_from_headers(headers: &HeaderMap) -> SecurityContext {
    let role = headers
        .get("X-User-Role")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("business_user");
    let raw_context = headers
        .get("X-User-Context")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("{}");
    let user: Value = serde_json::from_str(raw_context).unwrap_or_else(|_| json!({}));

    let mut context = SecurityContext::new(
        user.get("id").and_then(Value::as_str).unwrap_or("anonymous"),
        role,
    );
    if let Some(regions) = user.get("allowed_regions").and_then(Value::as_array) {
        context.allowed_regions = regions
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect();
    }
    if let Some(institution) = user.get("institution_id").and_then(Value::as_str) {
        context.institution_id = Some(institution.to_string());
    }
    context
}

fn error_response(state: &AppState, error: SearchError) -> (StatusCode, Json<Value>) {
    let status = match &error {
        SearchError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        SearchError::AccessDenied { .. } => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    // Internal error context leaks only in debug environments
    let body = if state.engine.config().performance.log_queries {
        json!({ "error": error.to_string() })
    } else {
        json!({ "error": "search failed" })
    };
    (status, Json(body))
}
