//! HTTP surface
//!
//! One axum router fronting the whole pipeline: resolution, the range-aware
//! proxy, the HLS transcode endpoints, and the subtitle relay. All state is
//! in-memory; a restart drops every in-flight job and session, and clients
//! re-resolve from scratch.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{Config, SubtitleStyle};
use crate::stream::{StreamResolver, SubtitleFetcher, TranscodeManager};

pub mod hls;
pub mod proxy;
pub mod resolve;
pub mod settings;
pub mod subtitles;
pub mod validate;

/// Shared state behind every handler
pub struct AppState {
    pub resolver: Arc<StreamResolver>,
    pub transcoder: Arc<TranscodeManager>,
    pub subtitles: SubtitleFetcher,
    /// Client for proxy relays: connect timeout only, bodies stream for as
    /// long as the client keeps reading
    pub relay_client: reqwest::Client,
    pub allowed_domains: Vec<String>,
    pub rate_limiter: RateLimiter,
    pub subtitle_style: SubtitleStyle,
    pub refresh_ahead_secs: u64,
}

impl AppState {
    pub fn new(config: &Config, resolver: StreamResolver) -> Self {
        let relay_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            resolver: Arc::new(resolver),
            transcoder: Arc::new(TranscodeManager::new(config.hwaccel_enabled)),
            subtitles: SubtitleFetcher::new(),
            relay_client,
            allowed_domains: config.allowed_proxy_domains.clone(),
            rate_limiter: RateLimiter::new(
                Duration::from_secs(config.rate_limit_window_secs),
                config.rate_limit_ceiling,
            ),
            subtitle_style: config.subtitle_style.clone(),
            refresh_ahead_secs: config.refresh_ahead_secs,
        }
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/resolve", post(resolve::resolve_handler))
        .route("/resolve/health", get(resolve::health_handler))
        .route(
            "/proxy",
            get(proxy::relay_handler).head(proxy::head_handler),
        )
        .route(
            "/transcode/:session_id/master.m3u8",
            get(hls::master_handler),
        )
        .route(
            "/transcode/:session_id/playlist.m3u8",
            get(hls::playlist_handler),
        )
        .route("/transcode/:session_id/:segment", get(hls::segment_handler))
        .route("/subtitles", get(subtitles::relay_handler))
        .route("/player/settings", get(settings::settings_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolves when the process receives SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

// =============================================================================
// Rate limiting
// =============================================================================

/// Fixed-window request limiter keyed by client address. Only the resolve
/// endpoint is limited; segment and proxy traffic is driven by playback and
/// self-limits.
pub struct RateLimiter {
    window: Duration,
    ceiling: u32,
    buckets: Mutex<HashMap<IpAddr, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(window: Duration, ceiling: u32) -> Self {
        Self {
            window,
            ceiling,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request; false means the caller is over its ceiling for
    /// the current window. Expired windows are evicted on the way, so the
    /// map holds only clients seen within the last window.
    pub fn allow(&self, client: IpAddr) -> bool {
        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(b) => b,
            Err(_) => return true,
        };

        buckets.retain(|_, (start, _)| now.duration_since(*start) < self.window);

        let entry = buckets.entry(client).or_insert((now, 0));
        entry.1 += 1;
        entry.1 <= self.ceiling
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.buckets.lock().map(|b| b.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        assert!(limiter.allow(ip));
        assert!(limiter.allow(ip));
        assert!(limiter.allow(ip));
        assert!(!limiter.allow(ip));

        // other clients have their own window
        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.allow(other));
    }

    #[test]
    fn test_rate_limiter_resets_after_window() {
        let limiter = RateLimiter::new(Duration::from_millis(0), 1);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.allow(ip));
        // zero-length window: every call starts a fresh one
        assert!(limiter.allow(ip));
    }

    #[test]
    fn test_rate_limiter_evicts_expired_clients() {
        let limiter = RateLimiter::new(Duration::from_millis(0), 1);
        for i in 1..=50u8 {
            let ip: IpAddr = format!("10.0.0.{}", i).parse().unwrap();
            limiter.allow(ip);
        }
        // every earlier window has expired; only the latest client remains
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
