//! Playback controller
//!
//! State machine for one playback session, driven by the embedding player
//! through explicit event calls (time updates, errors). Owns buffer-health
//! telemetry, stall detection, bounded link-refresh retries, and the
//! proactive re-resolution schedule. Retries run as cancellable waits so
//! teardown never leaves a timer acting on a stale session.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{Playability, PlaybackState, Resolution, ResolvedStream};
use crate::player::cues::{Cue, CueTable};
use crate::stream::classify::classify;
use crate::stream::resolver::StreamResolver;

/// Refresh attempts allowed per detected link expiry before the session
/// surfaces a terminal error
pub const MAX_REFRESH_ATTEMPTS: u32 = 6;

/// No position progress for this long (while the network is active) counts
/// as a genuine stall
const STALL_THRESHOLD: Duration = Duration::from_secs(10);

/// Buffer-ahead level below which telemetry logs a warning. Observability
/// only: low buffer never auto-pauses, to avoid false-positive stalls.
const BUFFER_LOW_WATER: Duration = Duration::from_secs(5);

/// Backoff before refresh attempt n (1-based): 1s, 2s, 4s, 8s, 16s, 32s
pub fn refresh_backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1).min(5)))
}

/// Where the media element should point after a `load`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadTarget {
    /// Browser plays the direct URL (through the range proxy)
    Direct(String),
    /// Browser plays the transcode master playlist for this session
    HlsMaster { session_id: Uuid, media_url: String },
}

/// Controller verdict for a time-update event
#[derive(Debug, Clone, PartialEq)]
pub enum TickAction {
    None,
    /// Genuine stall: reload the element preserving this position
    Reload { position: Duration },
}

/// Controller verdict for an expiry-class playback error
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshDecision {
    /// Attempt another resolution after the given backoff
    Retry { attempt: u32, delay: Duration },
    /// Attempt bound exhausted; surface a terminal error
    Terminal,
}

/// Per-session playback controller
pub struct PlaybackController {
    resolver: Arc<StreamResolver>,
    state: PlaybackState,
    current_stream: Option<ResolvedStream>,
    original_magnet: Option<String>,
    refresh_attempts: u32,
    refresh_ahead: Duration,

    // stall detection
    last_position: Duration,
    last_progress_at: Instant,

    // subtitles
    cues: CueTable,
    subtitle_delay_ms: i64,

    // element mirrors
    playback_rate: f64,
    muted: bool,
    volume: f64,

    cancel: CancellationToken,
}

impl PlaybackController {
    pub fn new(resolver: Arc<StreamResolver>, refresh_ahead: Duration) -> Self {
        Self {
            resolver,
            state: PlaybackState::Idle,
            current_stream: None,
            original_magnet: None,
            refresh_attempts: 0,
            refresh_ahead,
            last_position: Duration::ZERO,
            last_progress_at: Instant::now(),
            cues: CueTable::default(),
            subtitle_delay_ms: 0,
            playback_rate: 1.0,
            muted: false,
            volume: 1.0,
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn refresh_attempts(&self) -> u32 {
        self.refresh_attempts
    }

    pub fn current_stream(&self) -> Option<&ResolvedStream> {
        self.current_stream.as_ref()
    }

    /// Cancellation token for in-flight retries and timers of this session.
    /// Replaced on every `load`, cancelled on teardown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Load a freshly resolved stream: tear down the previous session,
    /// classify the source, and return where the media element should point.
    pub fn load(&mut self, stream: ResolvedStream) -> LoadTarget {
        self.teardown();
        self.cancel = CancellationToken::new();

        let verdict = classify(&stream.direct_url, None);
        tracing::info!(filename = %stream.filename, verdict = %verdict, "loading stream");

        self.original_magnet = Some(stream.source_magnet.clone());
        self.refresh_attempts = 0;
        self.last_position = Duration::ZERO;
        self.last_progress_at = Instant::now();
        self.set_state(PlaybackState::Loading);

        let target = match verdict.decision {
            Playability::Native => LoadTarget::Direct(stream.direct_url.clone()),
            Playability::Transcode => LoadTarget::HlsMaster {
                session_id: Uuid::new_v4(),
                media_url: stream.direct_url.clone(),
            },
        };
        self.current_stream = Some(stream);
        target
    }

    /// Cancel every timer and retry belonging to this session
    pub fn teardown(&mut self) {
        self.cancel.cancel();
        self.current_stream = None;
        self.set_state(PlaybackState::Idle);
    }

    pub fn on_ready(&mut self) {
        self.set_state(PlaybackState::Ready);
    }

    pub fn on_play(&mut self) {
        self.set_state(PlaybackState::Playing);
    }

    pub fn on_pause(&mut self) {
        self.set_state(PlaybackState::Paused);
    }

    pub fn on_buffering(&mut self) {
        self.set_state(PlaybackState::Buffering);
    }

    pub fn set_playback_rate(&mut self, rate: f64) {
        self.playback_rate = rate.clamp(0.25, 4.0);
    }

    pub fn set_volume(&mut self, volume: f64, muted: bool) {
        self.volume = volume.clamp(0.0, 1.0);
        self.muted = muted;
    }

    /// Time-update event from the media element. Records buffer-ahead
    /// telemetry (log only) and checks for a genuine stall: no position
    /// progress for ~10s while the network is active.
    pub fn on_time_update(
        &mut self,
        position: Duration,
        buffered_end: Duration,
        network_active: bool,
    ) -> TickAction {
        let buffer_ahead = buffered_end.saturating_sub(position);
        if buffer_ahead < BUFFER_LOW_WATER && self.state == PlaybackState::Playing {
            tracing::warn!(
                position_secs = position.as_secs_f64(),
                buffer_ahead_secs = buffer_ahead.as_secs_f64(),
                "buffer running low"
            );
        } else {
            tracing::trace!(
                position_secs = position.as_secs_f64(),
                buffer_ahead_secs = buffer_ahead.as_secs_f64(),
                "buffer telemetry"
            );
        }

        if position > self.last_position {
            self.last_position = position;
            self.last_progress_at = Instant::now();
            return TickAction::None;
        }

        if self.state == PlaybackState::Playing
            && network_active
            && self.last_progress_at.elapsed() >= STALL_THRESHOLD
        {
            tracing::warn!(
                position_secs = self.last_position.as_secs_f64(),
                "playback stalled, forcing reload"
            );
            self.last_progress_at = Instant::now();
            return TickAction::Reload {
                position: self.last_position,
            };
        }

        TickAction::None
    }

    /// Whether a playback error looks like link expiry: a 404 or network
    /// failure on a previously-ready stream. Generic playback errors (codec,
    /// decode) never count and never consume refresh attempts.
    pub fn is_expiry_signature(&self, http_status: Option<u16>, network_failure: bool) -> bool {
        self.current_stream.is_some() && (http_status == Some(404) || network_failure)
    }

    /// Account for one expiry-class failure. Attempts only ever increase on
    /// this path; the seventh would-be attempt is refused.
    pub fn on_expiry_detected(&mut self) -> RefreshDecision {
        if self.original_magnet.is_none() || self.refresh_attempts >= MAX_REFRESH_ATTEMPTS {
            self.set_state(PlaybackState::Error(
                "stream link expired and could not be refreshed".to_string(),
            ));
            return RefreshDecision::Terminal;
        }
        self.refresh_attempts += 1;
        RefreshDecision::Retry {
            attempt: self.refresh_attempts,
            delay: refresh_backoff(self.refresh_attempts),
        }
    }

    /// Drive one refresh cycle: wait out the backoff (abandoning on session
    /// teardown), then re-resolve from the original magnet. On success the
    /// attempt counter resets and the new stream replaces the current one.
    pub async fn recover_from_expiry(&mut self) -> Result<LoadTarget, String> {
        loop {
            let decision = self.on_expiry_detected();
            let delay = match decision {
                RefreshDecision::Retry { attempt, delay } => {
                    tracing::info!(attempt, delay_secs = delay.as_secs(), "refreshing expired link");
                    delay
                }
                RefreshDecision::Terminal => {
                    return Err("refresh attempts exhausted".to_string());
                }
            };

            let cancel = self.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => return Err("session torn down".to_string()),
                _ = tokio::time::sleep(delay) => {}
            }

            let magnet = match &self.original_magnet {
                Some(m) => m.clone(),
                None => return Err("no magnet to re-resolve".to_string()),
            };

            match self.resolver.resolve(&magnet).await {
                Resolution::Ready(stream) => {
                    tracing::info!(filename = %stream.filename, "link refreshed");
                    let target = self.load(stream);
                    return Ok(target);
                }
                Resolution::Processing { status } => {
                    tracing::debug!(%status, "refresh still processing, retrying");
                }
                Resolution::Error(e) => {
                    self.set_state(PlaybackState::Error(e.clone()));
                    return Err(e);
                }
            }
        }
    }

    /// Proactive refresh deadline: re-resolve this long after the current
    /// stream was resolved, ahead of the upstream's unobservable expiry.
    pub fn proactive_refresh_at(&self) -> Option<SystemTime> {
        self.current_stream
            .as_ref()
            .map(|s| s.resolved_at + self.refresh_ahead)
    }

    /// Whether the proactive window has been reached
    pub fn proactive_refresh_due(&self, now: SystemTime) -> bool {
        self.proactive_refresh_at().is_some_and(|at| now >= at)
    }

    // -------------------------------------------------------------------------
    // Subtitles
    // -------------------------------------------------------------------------

    /// Parse and attach a caption payload; replaces any previous track
    pub fn set_subtitle_track(&mut self, payload: &str) {
        self.cues = CueTable::parse(payload);
        tracing::debug!(cues = self.cues.len(), "subtitle track loaded");
    }

    pub fn clear_subtitle_track(&mut self) {
        self.cues = CueTable::default();
    }

    /// User-configurable delay in milliseconds, signed, applied additively
    /// at every lookup
    pub fn set_subtitle_delay(&mut self, delay_ms: i64) {
        self.subtitle_delay_ms = delay_ms;
    }

    /// Cues to render at the given playback position
    pub fn active_cues(&self, position: Duration) -> Vec<&Cue> {
        self.cues.active_at(position, self.subtitle_delay_ms)
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "playback state");
            self.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DebridClient;

    fn controller() -> PlaybackController {
        let client = DebridClient::with_base_url("http://127.0.0.1:1", "test-token");
        let resolver = Arc::new(StreamResolver::new(client));
        PlaybackController::new(resolver, Duration::from_secs(10800))
    }

    fn stream(url: &str) -> ResolvedStream {
        ResolvedStream {
            source_magnet: "magnet:?xt=urn:btih:abc".to_string(),
            direct_url: url.to_string(),
            filename: "movie.mkv".to_string(),
            size_bytes: 1_000_000,
            resolved_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_load_routes_by_verdict() {
        let mut c = controller();
        match c.load(stream("https://cdn.example.com/movie.mkv")) {
            LoadTarget::HlsMaster { media_url, .. } => {
                assert_eq!(media_url, "https://cdn.example.com/movie.mkv");
            }
            other => panic!("expected HLS target, got {:?}", other),
        }
        match c.load(stream("https://cdn.example.com/movie.mp4")) {
            LoadTarget::Direct(url) => assert_eq!(url, "https://cdn.example.com/movie.mp4"),
            other => panic!("expected direct target, got {:?}", other),
        }
    }

    #[test]
    fn test_refresh_bound_is_six() {
        let mut c = controller();
        c.load(stream("https://cdn.example.com/movie.mp4"));

        for expected in 1..=MAX_REFRESH_ATTEMPTS {
            match c.on_expiry_detected() {
                RefreshDecision::Retry { attempt, delay } => {
                    assert_eq!(attempt, expected);
                    assert_eq!(delay, Duration::from_secs(1 << (expected - 1)));
                }
                RefreshDecision::Terminal => panic!("terminal too early at {}", expected),
            }
        }
        // the seventh would-be attempt is refused
        assert_eq!(c.on_expiry_detected(), RefreshDecision::Terminal);
        assert!(matches!(c.state(), PlaybackState::Error(_)));
    }

    #[test]
    fn test_expiry_signature_classification() {
        let mut c = controller();
        assert!(!c.is_expiry_signature(Some(404), false)); // no stream yet
        c.load(stream("https://cdn.example.com/movie.mp4"));
        assert!(c.is_expiry_signature(Some(404), false));
        assert!(c.is_expiry_signature(None, true));
        assert!(!c.is_expiry_signature(Some(500), false));
    }

    #[test]
    fn test_load_resets_refresh_attempts() {
        let mut c = controller();
        c.load(stream("https://cdn.example.com/movie.mp4"));
        c.on_expiry_detected();
        c.on_expiry_detected();
        assert_eq!(c.refresh_attempts(), 2);
        c.load(stream("https://cdn.example.com/movie.mp4"));
        assert_eq!(c.refresh_attempts(), 0);
    }

    #[test]
    fn test_stall_detection_requires_active_network() {
        let mut c = controller();
        c.load(stream("https://cdn.example.com/movie.mp4"));
        c.on_play();

        let pos = Duration::from_secs(30);
        assert_eq!(
            c.on_time_update(pos, pos + Duration::from_secs(20), true),
            TickAction::None
        );
        // simulate ten seconds without progress
        c.last_progress_at = Instant::now() - Duration::from_secs(11);
        assert_eq!(
            c.on_time_update(pos, pos + Duration::from_secs(20), false),
            TickAction::None
        );
        assert_eq!(
            c.on_time_update(pos, pos + Duration::from_secs(20), true),
            TickAction::Reload { position: pos }
        );
    }

    #[test]
    fn test_teardown_cancels_session_token() {
        let mut c = controller();
        c.load(stream("https://cdn.example.com/movie.mp4"));
        let token = c.cancellation_token();
        assert!(!token.is_cancelled());
        c.teardown();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_proactive_refresh_schedule() {
        let mut c = controller();
        assert!(c.proactive_refresh_at().is_none());
        c.load(stream("https://cdn.example.com/movie.mp4"));
        let at = c.proactive_refresh_at().unwrap();
        assert!(!c.proactive_refresh_due(SystemTime::now()));
        assert!(c.proactive_refresh_due(at + Duration::from_secs(1)));
    }

    #[test]
    fn test_subtitle_delay_is_signed() {
        let mut c = controller();
        c.set_subtitle_track("WEBVTT\n\n00:00:10.000 --> 00:00:12.000\nLine\n");
        assert_eq!(c.active_cues(Duration::from_secs(11)).len(), 1);

        c.set_subtitle_delay(-1_500);
        assert!(c.active_cues(Duration::from_secs(11)).is_empty());

        c.set_subtitle_delay(1_000);
        assert_eq!(c.active_cues(Duration::from_secs(9)).len(), 1);
    }

    #[test]
    fn test_backoff_sequence() {
        let secs: Vec<u64> = (1..=6).map(|a| refresh_backoff(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32]);
    }
}
