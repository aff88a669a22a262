//! Player settings endpoint
//!
//! Hands the browser player the server-side knobs it renders with: subtitle
//! overlay styling (including the signed cue delay) and the proactive
//! link-refresh lead time for resolved streams.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::config::SubtitleStyle;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct PlayerSettings {
    pub subtitle_style: SubtitleStyle,
    /// Seconds after resolution at which the player should proactively
    /// re-resolve its stream
    pub refresh_ahead_secs: u64,
}

/// GET /player/settings
pub async fn settings_handler(State(state): State<Arc<AppState>>) -> Json<PlayerSettings> {
    Json(PlayerSettings {
        subtitle_style: state.subtitle_style.clone(),
        refresh_ahead_secs: state.refresh_ahead_secs,
    })
}
