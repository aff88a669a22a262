//! Subtitle relay endpoint
//!
//! Fetches a caption file on the client's behalf (browsers cannot fetch
//! cross-origin text tracks directly) and returns it as WebVTT. Caption hosts
//! are arbitrary, so only the pattern-safety half of URL validation applies.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::server::validate::validate_fetch_url;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct SubtitleQuery {
    pub url: String,
}

/// GET /subtitles?url=
pub async fn relay_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubtitleQuery>,
) -> Response {
    if validate_fetch_url(&query.url).is_err() {
        return StatusCode::FORBIDDEN.into_response();
    }

    match state.subtitles.fetch_as_webvtt(&query.url).await {
        Ok(vtt) => (
            [
                (header::CONTENT_TYPE, "text/vtt; charset=utf-8"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            vtt,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "subtitle fetch failed");
            (StatusCode::BAD_GATEWAY, "subtitle fetch failed").into_response()
        }
    }
}
