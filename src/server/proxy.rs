//! Range-aware streaming proxy
//!
//! Relays direct-link bytes to the player without buffering the payload:
//! the upstream response body streams straight into the HTTP response.
//! `Range` goes upstream verbatim; `Content-Range`, `Accept-Ranges`, and
//! `Content-Length` come back down verbatim, so seeking works exactly as the
//! upstream supports it. URL validation happens before any outbound call.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::server::validate::validate_upstream_url;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct RelayQuery {
    pub url: String,
}

/// GET /proxy?url= relays the upstream body, honoring ranges
pub async fn relay_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RelayQuery>,
    headers: HeaderMap,
) -> Response {
    let upstream = match validate_upstream_url(&query.url, &state.allowed_domains) {
        Ok(url) => url,
        Err(_) => return StatusCode::FORBIDDEN.into_response(),
    };

    let mut request = state.relay_client.get(upstream.clone());
    if let Some(range) = headers.get(header::RANGE) {
        request = request.header(header::RANGE, range);
    }

    let upstream_resp = match request.send().await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(host = %upstream.host_str().unwrap_or("?"), error = %e, "upstream fetch failed");
            return (StatusCode::BAD_GATEWAY, "upstream fetch failed").into_response();
        }
    };

    let status = StatusCode::from_u16(upstream_resp.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = effective_content_type(
        upstream_resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        upstream.path(),
    );

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes");

    // mirror the range bookkeeping headers verbatim
    for name in [header::CONTENT_RANGE, header::CONTENT_LENGTH] {
        if let Some(value) = upstream_resp.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }

    match builder.body(Body::from_stream(upstream_resp.bytes_stream())) {
        Ok(resp) => resp,
        Err(_) => StatusCode::BAD_GATEWAY.into_response(),
    }
}

/// HEAD /proxy?url= gives a synthetic answer so the player can probe a stream
/// without pulling bytes. No upstream call is made.
pub async fn head_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RelayQuery>,
) -> Response {
    let upstream = match validate_upstream_url(&query.url, &state.allowed_domains) {
        Ok(url) => url,
        Err(_) => return StatusCode::FORBIDDEN.into_response(),
    };

    let content_type = effective_content_type(None, upstream.path());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::OK.into_response())
}

/// Resolve the content type sent downstream: use the upstream's unless it is
/// generic or absent, in which case infer from the file extension.
fn effective_content_type(upstream: Option<&str>, path: &str) -> String {
    match upstream {
        Some(ct)
            if !ct.is_empty()
                && !ct.starts_with("application/octet-stream")
                && !ct.starts_with("binary/") =>
        {
            ct.to_string()
        }
        _ => mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_content_type_corrected() {
        assert_eq!(
            effective_content_type(Some("application/octet-stream"), "/d/movie.mp4"),
            "video/mp4"
        );
        assert_eq!(effective_content_type(None, "/d/movie.webm"), "video/webm");
    }

    #[test]
    fn test_specific_content_type_kept() {
        assert_eq!(
            effective_content_type(Some("video/x-matroska"), "/d/movie.mkv"),
            "video/x-matroska"
        );
    }

    #[test]
    fn test_unknown_extension_falls_back() {
        assert_eq!(
            effective_content_type(None, "/d/blob"),
            "application/octet-stream"
        );
    }
}
