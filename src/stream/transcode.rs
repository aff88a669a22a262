//! Transcode session manager
//!
//! Owns one ffmpeg process per active playback session. Segments are fixed
//! 10-second windows computed from the segment index; the encoder's stdout is
//! piped straight out as the HTTP response body. Hardware encoding is
//! attempted first (when enabled and the local ffmpeg advertises an
//! acceleration method); a hardware-signature failure before the first byte
//! reaches the client triggers a transparent software relaunch of the same
//! segment. Once bytes are flowing, an encoder death is fatal for that
//! request.
//!
//! Cleanup is exactly-once per process: a closed-flag guards the kill path
//! because client disconnect, process exit, and shutdown can all race to
//! trigger it.

use std::collections::HashMap;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::models::{EncoderMode, SessionState, TranscodeSession};

/// Fixed segment length; playlists and start offsets both assume it
pub const SEGMENT_DURATION_SECS: u64 = 10;
/// MIME type for a transport-stream segment
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
/// MIME type for HLS playlists
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Playlist generation does no probing; segments past the real end of the
/// media simply come back empty.
const ASSUMED_MEDIA_DURATION_SECS: u64 = 4 * 60 * 60;

/// How long the encoder gets to produce its first byte
const FIRST_BYTE_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace period between closing the pipe and force-killing the process
const KILL_GRACE: Duration = Duration::from_secs(5);
/// Diagnostic lines retained from the encoder's stderr
const DIAG_LINE_CAP: usize = 64;

/// Substrings in encoder stderr that mark a hardware-acceleration failure
/// (as opposed to bad input or a codec bug)
const HW_ERROR_SIGNATURES: &[&str] = &[
    "cuda",
    "nvenc",
    "nvdec",
    "cuvid",
    "vaapi",
    "qsv",
    "videotoolbox",
    "d3d11",
    "hwaccel",
    "no capable devices",
    "device creation failed",
];

/// Errors from segment transcoding
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to spawn encoder: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{mode} encoder failed: {detail}")]
    EncoderFailed { mode: EncoderMode, detail: String },
}

// =============================================================================
// Process guard (exactly-once cleanup)
// =============================================================================

/// Owns the encoder process handle for one segment request. `close` may be
/// invoked from any number of triggers (stream drop, natural EOF, session
/// replacement, shutdown) and runs its release logic exactly once.
struct ProcessGuard {
    closed: AtomicBool,
    child: Mutex<Option<Child>>,
}

impl ProcessGuard {
    fn new(child: Child) -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
            child: Mutex::new(Some(child)),
        })
    }

    /// Idempotent teardown: closing the stdout pipe is the graceful signal
    /// (the encoder exits on EOF/EPIPE); the force kill fires only if it
    /// lingers past the grace period.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let child = self.child.lock().ok().and_then(|mut c| c.take());
        if let Some(mut child) = child {
            tokio::spawn(async move {
                match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                    Ok(Ok(status)) => {
                        tracing::debug!(%status, "encoder exited");
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "failed waiting for encoder");
                    }
                    Err(_) => {
                        tracing::warn!("encoder ignored pipe close, killing");
                        let _ = child.kill().await;
                    }
                }
            });
        }
    }

    /// Teardown variant for the no-output path: the caller needs the exit
    /// status to classify the failure, so the wait happens inline instead of
    /// on a detached task. Returns `None` if another trigger closed first.
    async fn close_and_wait(&self) -> Option<std::process::ExitStatus> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return None;
        }
        let mut child = self.child.lock().ok().and_then(|mut c| c.take())?;
        match tokio::time::timeout(KILL_GRACE, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "failed waiting for encoder");
                None
            }
            Err(_) => {
                tracing::warn!("encoder ignored pipe close, killing");
                let _ = child.kill().await;
                child.wait().await.ok()
            }
        }
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Segment stream
// =============================================================================

/// Byte stream for one segment. Holds the first chunk read during launch
/// verification, then drains the encoder's stdout. Dropping the stream (client
/// disconnect) or reaching EOF both trigger the guard's exactly-once cleanup.
pub struct SegmentStream {
    first: Option<Bytes>,
    inner: ReaderStream<ChildStdout>,
    guard: Arc<ProcessGuard>,
}

impl Stream for SegmentStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(first) = self.first.take() {
            return Poll::Ready(Some(Ok(first)));
        }
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        if matches!(poll, Poll::Ready(None)) {
            self.guard.close();
        }
        poll
    }
}

impl Drop for SegmentStream {
    fn drop(&mut self) {
        self.guard.close();
    }
}

// =============================================================================
// Manager
// =============================================================================

struct SessionHandle {
    meta: TranscodeSession,
    guard: Arc<ProcessGuard>,
}

/// Process-wide transcode session registry
pub struct TranscodeManager {
    ffmpeg_path: String,
    hwaccel_enabled: bool,
    sessions: Mutex<HashMap<Uuid, SessionHandle>>,
}

impl TranscodeManager {
    pub fn new(hwaccel_enabled: bool) -> Self {
        Self::with_ffmpeg_path("ffmpeg", hwaccel_enabled)
    }

    /// Create with a custom encoder binary (for testing)
    pub fn with_ffmpeg_path(path: impl Into<String>, hwaccel_enabled: bool) -> Self {
        Self {
            ffmpeg_path: path.into(),
            hwaccel_enabled,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot one session's metadata
    pub fn session(&self, session_id: Uuid) -> Option<TranscodeSession> {
        self.sessions
            .lock()
            .ok()
            .and_then(|s| s.get(&session_id).map(|h| h.meta.clone()))
    }

    /// Open a segment byte stream, launching (or replacing) the session's
    /// encoder process. A session never has two live processes: any existing
    /// process is torn down before the new one is spawned.
    pub async fn open_segment(
        &self,
        session_id: Uuid,
        segment_index: u32,
        source_url: &str,
    ) -> Result<SegmentStream, TranscodeError> {
        let mut mode = self.initial_mode(session_id).await;
        self.close_existing(session_id);

        let start_secs = u64::from(segment_index) * SEGMENT_DURATION_SECS;

        loop {
            match self
                .launch(session_id, mode, start_secs, source_url)
                .await
            {
                Ok(stream) => return Ok(stream),
                Err(LaunchFailure::Hardware(detail)) if mode == EncoderMode::Hardware => {
                    tracing::warn!(
                        %session_id,
                        segment_index,
                        detail,
                        "hardware encoder failed before first byte, falling back to software"
                    );
                    // the failed process's cleanup was initiated inside launch
                    mode = EncoderMode::Software;
                }
                Err(LaunchFailure::Hardware(detail)) => {
                    self.mark_failed(session_id);
                    return Err(TranscodeError::EncoderFailed { mode, detail });
                }
                Err(LaunchFailure::Fatal(e)) => {
                    self.mark_failed(session_id);
                    return Err(e);
                }
            }
        }
    }

    /// Tear down one session (client navigated away)
    pub fn close_session(&self, session_id: Uuid) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if let Some(mut handle) = sessions.remove(&session_id) {
                handle.meta.state = SessionState::Closed;
                handle.guard.close();
            }
        }
    }

    /// Tear down every session (process shutdown)
    pub fn shutdown(&self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            for (_, handle) in sessions.drain() {
                handle.guard.close();
            }
        }
    }

    /// Starting encoder mode for a segment request. A session that already
    /// fell back to software stays there for subsequent segments.
    async fn initial_mode(&self, session_id: Uuid) -> EncoderMode {
        if !self.hwaccel_enabled {
            return EncoderMode::Software;
        }
        if let Ok(sessions) = self.sessions.lock() {
            if let Some(handle) = sessions.get(&session_id) {
                if handle.meta.encoder_mode == EncoderMode::Software {
                    return EncoderMode::Software;
                }
            }
        }
        match probe_hw_accel(&self.ffmpeg_path).await {
            Some(_) => EncoderMode::Hardware,
            None => EncoderMode::Software,
        }
    }

    fn close_existing(&self, session_id: Uuid) {
        if let Ok(sessions) = self.sessions.lock() {
            if let Some(handle) = sessions.get(&session_id) {
                handle.guard.close();
            }
        }
    }

    fn register(&self, session_id: Uuid, meta: TranscodeSession, guard: Arc<ProcessGuard>) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(session_id, SessionHandle { meta, guard });
        }
    }

    fn mark_failed(&self, session_id: Uuid) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if let Some(handle) = sessions.get_mut(&session_id) {
                handle.meta.state = SessionState::Failed;
            }
        }
    }

    /// Spawn an encoder for one segment and verify it produces output. Only
    /// returns once the first chunk is in hand (or the process has already
    /// died), so the caller can still fall back to software with nothing
    /// flushed to the client.
    async fn launch(
        &self,
        session_id: Uuid,
        mode: EncoderMode,
        start_secs: u64,
        source_url: &str,
    ) -> Result<SegmentStream, LaunchFailure> {
        let mut cmd = self.build_command(mode, start_secs, source_url).await;

        let mut child = cmd.spawn().map_err(|e| LaunchFailure::Fatal(e.into()))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            LaunchFailure::Fatal(TranscodeError::EncoderFailed {
                mode,
                detail: "encoder stdout not captured".to_string(),
            })
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            LaunchFailure::Fatal(TranscodeError::EncoderFailed {
                mode,
                detail: "encoder stderr not captured".to_string(),
            })
        })?;

        // Drain stderr continuously (the encoder blocks if the pipe fills),
        // keeping a bounded tail for failure classification.
        let diag: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let diag_writer = Arc::clone(&diag);
        let drain = tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!(target: "encoder", "{}", line);
                if let Ok(mut tail) = diag_writer.lock() {
                    if tail.len() == DIAG_LINE_CAP {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
            }
        });

        let guard = ProcessGuard::new(child);
        self.register(
            session_id,
            TranscodeSession {
                session_id,
                source_url: source_url.to_string(),
                encoder_mode: mode,
                state: SessionState::Starting,
            },
            Arc::clone(&guard),
        );

        let mut reader = ReaderStream::new(stdout);
        let first = tokio::time::timeout(FIRST_BYTE_TIMEOUT, reader.next()).await;

        match first {
            Ok(Some(Ok(chunk))) => {
                tracing::debug!(%session_id, %mode, start_secs, "segment streaming");
                self.set_state(session_id, SessionState::Streaming);
                Ok(SegmentStream {
                    first: Some(chunk),
                    inner: reader,
                    guard,
                })
            }
            Ok(Some(Err(e))) => {
                guard.close();
                Err(LaunchFailure::Fatal(TranscodeError::EncoderFailed {
                    mode,
                    detail: format!("reading encoder output: {}", e),
                }))
            }
            Ok(None) => {
                // Stdout closed without a single byte; the exit status says
                // whether this is a crash or just a segment past end of media.
                let status = guard.close_and_wait().await;
                let _ = drain.await;

                if status.map(|s| s.success()).unwrap_or(false) {
                    tracing::debug!(%session_id, %mode, start_secs, "clean exit with no output, empty segment");
                    self.set_state(session_id, SessionState::Streaming);
                    return Ok(SegmentStream {
                        first: None,
                        inner: reader,
                        guard,
                    });
                }

                let stderr_text = diag
                    .lock()
                    .map(|tail| tail.join("\n"))
                    .unwrap_or_default();
                if mode == EncoderMode::Hardware && is_hardware_error(&stderr_text) {
                    Err(LaunchFailure::Hardware(summarize(&stderr_text)))
                } else {
                    Err(LaunchFailure::Fatal(TranscodeError::EncoderFailed {
                        mode,
                        detail: summarize(&stderr_text),
                    }))
                }
            }
            Err(_) => {
                guard.close();
                Err(LaunchFailure::Fatal(TranscodeError::EncoderFailed {
                    mode,
                    detail: "no output within first-byte timeout".to_string(),
                }))
            }
        }
    }

    async fn build_command(&self, mode: EncoderMode, start_secs: u64, source_url: &str) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        cmd.args(["-ss", &start_secs.to_string()]);

        match mode {
            EncoderMode::Hardware => {
                let hw = probe_hw_accel(&self.ffmpeg_path)
                    .await
                    .unwrap_or(HwAccel::default());
                cmd.args(["-hwaccel", hw.accel]);
                cmd.args(["-i", source_url]);
                cmd.args(["-t", &SEGMENT_DURATION_SECS.to_string()]);
                cmd.args(["-c:v", hw.encoder]);
            }
            EncoderMode::Software => {
                cmd.args(["-i", source_url]);
                cmd.args(["-t", &SEGMENT_DURATION_SECS.to_string()]);
                cmd.args(["-c:v", "libx264", "-preset", "veryfast"]);
            }
        }

        cmd.args(["-c:a", "aac", "-ac", "2", "-b:a", "192k"]);
        cmd.args([
            "-f",
            "mpegts",
            "-muxdelay",
            "0",
            "-muxpreload",
            "0",
            "-copyts",
            "-output_ts_offset",
            &start_secs.to_string(),
            "-avoid_negative_ts",
            "make_zero",
            "pipe:1",
        ]);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn set_state(&self, session_id: Uuid, state: SessionState) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if let Some(handle) = sessions.get_mut(&session_id) {
                handle.meta.state = state;
            }
        }
    }
}

enum LaunchFailure {
    /// Hardware-signature failure before any output: fall back to software
    Hardware(String),
    Fatal(TranscodeError),
}

// =============================================================================
// Hardware probing
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct HwAccel {
    accel: &'static str,
    encoder: &'static str,
}

impl Default for HwAccel {
    fn default() -> Self {
        Self {
            accel: "auto",
            encoder: "h264_nvenc",
        }
    }
}

/// Ask the local ffmpeg which acceleration methods it supports, once per
/// process, and pick an H.264 encoder accordingly.
async fn probe_hw_accel(ffmpeg_path: &str) -> Option<HwAccel> {
    static HW_ACCEL: tokio::sync::OnceCell<Option<HwAccel>> = tokio::sync::OnceCell::const_new();

    *HW_ACCEL
        .get_or_init(|| async {
            let output = Command::new(ffmpeg_path)
                .arg("-hwaccels")
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .output()
                .await
                .ok()?;
            let listed = String::from_utf8_lossy(&output.stdout);
            let methods: Vec<&str> = listed.lines().map(|l| l.trim()).collect();

            if methods.contains(&"cuda") {
                return Some(HwAccel {
                    accel: "cuda",
                    encoder: "h264_nvenc",
                });
            }
            if methods.contains(&"qsv") {
                return Some(HwAccel {
                    accel: "qsv",
                    encoder: "h264_qsv",
                });
            }
            if methods.contains(&"videotoolbox") {
                return Some(HwAccel {
                    accel: "videotoolbox",
                    encoder: "h264_videotoolbox",
                });
            }
            if methods.contains(&"vaapi") {
                return Some(HwAccel {
                    accel: "vaapi",
                    encoder: "h264_vaapi",
                });
            }
            None
        })
        .await
}

/// Classify encoder stderr: does it point at the acceleration layer?
fn is_hardware_error(stderr_text: &str) -> bool {
    let lower = stderr_text.to_lowercase();
    HW_ERROR_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Last non-empty stderr line, for error messages
fn summarize(stderr_text: &str) -> String {
    stderr_text
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("encoder produced no diagnostics")
        .to_string()
}

// =============================================================================
// Playlist generation
// =============================================================================

/// Master playlist pointing at the single media playlist. No probing: one
/// variant, fixed nominal bandwidth.
pub fn master_playlist(media_url: &str) -> String {
    let encoded = urlencoding::encode(media_url);
    let mut m3u = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    m3u.push_str("#EXT-X-STREAM-INF:BANDWIDTH=20000000,CODECS=\"avc1.640029,mp4a.40.2\"\n");
    m3u.push_str(&format!("playlist.m3u8?media_url={}\n", encoded));
    m3u
}

/// Media playlist over fixed 10-second segments. Duration is assumed, not
/// probed; segments past the real end of the media come back empty and the
/// player stops on its own.
pub fn media_playlist(media_url: &str) -> String {
    let encoded = urlencoding::encode(media_url);
    let count = ASSUMED_MEDIA_DURATION_SECS / SEGMENT_DURATION_SECS;

    let mut m3u = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    m3u.push_str(&format!(
        "#EXT-X-TARGETDURATION:{}\n",
        SEGMENT_DURATION_SECS
    ));
    m3u.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    m3u.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
    for i in 0..count {
        m3u.push_str(&format!("#EXTINF:{}.0,\n", SEGMENT_DURATION_SECS));
        m3u.push_str(&format!("segment{}.ts?media_url={}\n", i, encoded));
    }
    m3u.push_str("#EXT-X-ENDLIST\n");
    m3u
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_error_signatures() {
        assert!(is_hardware_error(
            "Cannot load libcuda.so.1\nError initializing CUDA"
        ));
        assert!(is_hardware_error("No capable devices found"));
        assert!(is_hardware_error("[h264_nvenc] encoder setup failed"));
        assert!(!is_hardware_error(
            "movie.mkv: Invalid data found when processing input"
        ));
    }

    #[test]
    fn test_segment_offset_maths() {
        assert_eq!(0 * SEGMENT_DURATION_SECS, 0);
        assert_eq!(7 * SEGMENT_DURATION_SECS, 70);
    }

    #[test]
    fn test_master_playlist_shape() {
        let m3u = master_playlist("https://cdn.example.com/movie.mkv");
        assert!(m3u.starts_with("#EXTM3U\n"));
        assert!(m3u.contains("#EXT-X-STREAM-INF:"));
        assert!(m3u.contains("playlist.m3u8?media_url=https%3A%2F%2Fcdn.example.com%2Fmovie.mkv"));
    }

    #[test]
    fn test_media_playlist_fixed_segments() {
        let m3u = media_playlist("https://cdn.example.com/movie.mkv");
        assert!(m3u.contains("#EXT-X-TARGETDURATION:10\n"));
        assert!(m3u.contains("#EXTINF:10.0,\nsegment0.ts?media_url="));
        assert!(m3u.contains("segment1.ts?media_url="));
        assert!(m3u.ends_with("#EXT-X-ENDLIST\n"));
    }

    #[tokio::test]
    async fn test_process_guard_closes_once() {
        let child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let guard = ProcessGuard::new(child);

        // concurrent triggers race to the closed flag
        let g1 = Arc::clone(&guard);
        let g2 = Arc::clone(&guard);
        let (a, b) = tokio::join!(
            tokio::spawn(async move { g1.close() }),
            tokio::spawn(async move { g2.close() })
        );
        a.unwrap();
        b.unwrap();

        assert!(guard.is_closed());
        // the child handle was taken exactly once; a third close is a no-op
        guard.close();
        assert!(guard.child.lock().unwrap().is_none());
    }

    #[test]
    fn test_summarize_picks_last_line() {
        assert_eq!(summarize("first\nsecond\n\n"), "second");
        assert_eq!(summarize(""), "encoder produced no diagnostics");
    }
}
