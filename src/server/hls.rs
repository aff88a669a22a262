//! HLS transcode endpoints
//!
//! Playlists are generated synchronously from the fixed 10-second-segment
//! assumption; segment requests hand off to the transcode manager, which
//! supervises the encoder process. `media_url` is validated exactly like the
//! proxy's `url` parameter and reaches the encoder command line only after
//! passing that boundary.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use uuid::Uuid;

use crate::server::validate::validate_upstream_url;
use crate::server::AppState;
use crate::stream::transcode::{self, PLAYLIST_CONTENT_TYPE, SEGMENT_CONTENT_TYPE};

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    #[serde(alias = "mediaURL")]
    pub media_url: String,
}

/// GET /transcode/{session_id}/master.m3u8?media_url=
pub async fn master_handler(
    State(state): State<Arc<AppState>>,
    Path(_session_id): Path<Uuid>,
    Query(query): Query<MediaQuery>,
) -> Response {
    if validate_upstream_url(&query.media_url, &state.allowed_domains).is_err() {
        return StatusCode::FORBIDDEN.into_response();
    }
    playlist_response(transcode::master_playlist(&query.media_url))
}

/// GET /transcode/{session_id}/playlist.m3u8?media_url=
pub async fn playlist_handler(
    State(state): State<Arc<AppState>>,
    Path(_session_id): Path<Uuid>,
    Query(query): Query<MediaQuery>,
) -> Response {
    if validate_upstream_url(&query.media_url, &state.allowed_domains).is_err() {
        return StatusCode::FORBIDDEN.into_response();
    }
    playlist_response(transcode::media_playlist(&query.media_url))
}

/// GET /transcode/{session_id}/segment{N}.ts?media_url=
pub async fn segment_handler(
    State(state): State<Arc<AppState>>,
    Path((session_id, segment)): Path<(Uuid, String)>,
    Query(query): Query<MediaQuery>,
) -> Response {
    let Some(segment_index) = parse_segment_name(&segment) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if validate_upstream_url(&query.media_url, &state.allowed_domains).is_err() {
        return StatusCode::FORBIDDEN.into_response();
    }

    match state
        .transcoder
        .open_segment(session_id, segment_index, &query.media_url)
        .await
    {
        Ok(stream) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE)
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => {
            tracing::error!(%session_id, segment_index, error = %e, "segment transcode failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "transcode failed").into_response()
        }
    }
}

fn playlist_response(m3u: String) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)
        .body(Body::from(m3u))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Parse `segment{N}.ts` into its index
fn parse_segment_name(name: &str) -> Option<u32> {
    name.strip_prefix("segment")?
        .strip_suffix(".ts")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_segment_name() {
        assert_eq!(parse_segment_name("segment0.ts"), Some(0));
        assert_eq!(parse_segment_name("segment42.ts"), Some(42));
        assert_eq!(parse_segment_name("segment.ts"), None);
        assert_eq!(parse_segment_name("master.m3u8"), None);
        assert_eq!(parse_segment_name("segment-1.ts"), None);
    }
}
