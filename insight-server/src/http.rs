//! Insight HTTP API
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`. The inner functions are
//! directly testable without axum dispatch.
//!
//! Endpoints:
//! - POST    /analyze  run the analysis pipeline for one question
//! - GET     /history  the caller's most recent analyses
//! - GET     /health   health check with DB status
//! - GET     /version  server version info
//! - OPTIONS *         CORS preflight
//!
//! CORS headers are attached to every response, including errors and 404s.

use std::sync::Arc;

use anyhow::Result;
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    AUTHORIZATION,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use insight_core::models::AnalysisRequest;
use serde::Deserialize;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::subsystems::analysis::Analyzer;

pub const CORS_ALLOW_ORIGIN: &str = "*";
pub const CORS_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
pub const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub analyzer: Analyzer,
    /// `None` when the server runs without a database (tests).
    pub pool: Option<PgPool>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/analyze", post(analyze_handler).options(preflight_handler))
        .route("/history", get(history_handler).options(preflight_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .fallback(fallback_handler)
        .layer(middleware::map_response(with_cors))
        .with_state(state)
}

/// Serve until the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    addr: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Insight HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct HistoryParams {
    pub limit: Option<String>,
}

fn error_body(message: impl std::fmt::Display) -> serde_json::Value {
    serde_json::json!({ "error": message.to_string() })
}

/// A missing or malformed body is treated as a request without a question.
pub fn parse_analysis_request(body: &[u8]) -> AnalysisRequest {
    serde_json::from_slice(body).unwrap_or_default()
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn analyze_inner(
    analyzer: &Analyzer,
    authorization: Option<&str>,
    request: AnalysisRequest,
) -> (StatusCode, serde_json::Value) {
    match analyzer.analyze(authorization, request).await {
        Ok(response) => match serde_json::to_value(&response) {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e)),
        },
        Err(e) => (e.status_code(), error_body(e)),
    }
}

pub async fn history_inner(
    analyzer: &Analyzer,
    authorization: Option<&str>,
    params: HistoryParams,
) -> (StatusCode, serde_json::Value) {
    let limit = params.limit.and_then(|l| l.trim().parse::<u32>().ok());

    match analyzer.history(authorization, limit).await {
        Ok(records) => match serde_json::to_value(&records) {
            Ok(records) => (
                StatusCode::OK,
                serde_json::json!({
                    "count": records.as_array().map(Vec::len).unwrap_or(0),
                    "records": records,
                }),
            ),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e)),
        },
        Err(e) => (e.status_code(), error_body(e)),
    }
}

/// Inner health check: queries DB and returns (status_code, json_body).
pub async fn health_inner(pool: Option<&PgPool>) -> (StatusCode, serde_json::Value) {
    let Some(pool) = pool else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": "database not configured",
            }),
        );
    };

    match insight_core::db::health_check(pool).await {
        Ok(pg_ver) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "postgresql": pg_ver,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "insight/1",
    })
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn analyze_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let request = parse_analysis_request(&body);
    let (status, body) = analyze_inner(&state.analyzer, authorization(&headers), request).await;
    (status, Json(body))
}

pub async fn history_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    params: Option<Query<HistoryParams>>,
) -> impl IntoResponse {
    let params = params.map(|Query(p)| p).unwrap_or_default();
    let (status, body) = history_inner(&state.analyzer, authorization(&headers), params).await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.pool.as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn preflight_handler() -> impl IntoResponse {
    (StatusCode::OK, Body::empty())
}

pub async fn fallback_handler(method: Method) -> Response {
    if method == Method::OPTIONS {
        return (StatusCode::OK, Body::empty()).into_response();
    }
    (StatusCode::NOT_FOUND, Json(error_body("Not found"))).into_response()
}

async fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(CORS_ALLOW_ORIGIN),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    response
}
