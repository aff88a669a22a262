//! Resolution endpoints
//!
//! `POST /resolve` drives a magnet through the debrid lifecycle and reports
//! the outcome in the body: clients poll again on `processing`. The endpoint
//! is rate-limited per client address. `GET /resolve/health` checks debrid
//! connectivity and relays account standing.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::models::Resolution;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    #[serde(alias = "magnetURI", alias = "magnet")]
    pub magnet_uri: String,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<ResolveRequest>,
) -> impl IntoResponse {
    if !state.rate_limiter.allow(addr.ip()) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ResolveResponse {
                status: "error",
                stream_url: None,
                filename: None,
                size_bytes: None,
                message: Some("rate limit exceeded, slow down".to_string()),
            }),
        );
    }

    match state.resolver.resolve(&req.magnet_uri).await {
        Resolution::Ready(stream) => (
            StatusCode::OK,
            Json(ResolveResponse {
                status: "ready",
                stream_url: Some(stream.direct_url),
                filename: Some(stream.filename),
                size_bytes: Some(stream.size_bytes),
                message: None,
            }),
        ),
        Resolution::Processing { status } => (
            StatusCode::OK,
            Json(ResolveResponse {
                status: "processing",
                stream_url: None,
                filename: None,
                size_bytes: None,
                message: Some(format!("debrid job is {}, try again shortly", status)),
            }),
        ),
        Resolution::Error(message) => (
            StatusCode::OK,
            Json(ResolveResponse {
                status: "error",
                stream_url: None,
                filename: None,
                size_bytes: None,
                message: Some(message),
            }),
        ),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.resolver.client().account_status().await {
        Ok(account) => (
            StatusCode::OK,
            Json(HealthResponse {
                healthy: true,
                username: Some(account.username),
                account_type: Some(account.account_type),
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                healthy: false,
                username: None,
                account_type: None,
                message: Some(e.to_string()),
            }),
        ),
    }
}
