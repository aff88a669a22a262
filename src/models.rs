//! Data structures and types for Streamgate
//!
//! Contains all shared models used across the gateway organized by domain:
//! - **Resolution**: debrid torrent jobs and resolved streams
//! - **Playability**: container/codec verdicts for browser playback
//! - **Transcode**: encoder session state
//! - **Playback**: client-side session bookkeeping

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

// =============================================================================
// Resolution Models (debrid)
// =============================================================================

/// Video file extensions the resolver considers playable content
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v"];

/// Lifecycle of a torrent job inside the debrid service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Accepted, waiting in the debrid queue
    Queued,
    /// Debrid service is fetching/converting the payload
    Converting,
    /// Metadata arrived; the service wants a file selection
    AwaitingFileSelection,
    /// Direct links are available
    Ready,
    /// Terminal failure reported by the service
    Error(String),
}

impl JobStatus {
    /// Map a Real-Debrid style status string onto the job lifecycle.
    /// Unknown statuses are treated as still-converting so polling continues.
    pub fn from_api_status(s: &str) -> Self {
        match s {
            "magnet_conversion" | "queued" => JobStatus::Queued,
            "downloading" | "compressing" | "uploading" => JobStatus::Converting,
            "waiting_files_selection" => JobStatus::AwaitingFileSelection,
            "downloaded" => JobStatus::Ready,
            "magnet_error" | "error" | "virus" | "dead" => JobStatus::Error(s.to_string()),
            _ => JobStatus::Converting,
        }
    }

    /// Whether the job can still make progress
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Converting | JobStatus::AwaitingFileSelection
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Converting => write!(f, "converting"),
            JobStatus::AwaitingFileSelection => write!(f, "awaiting file selection"),
            JobStatus::Ready => write!(f, "ready"),
            JobStatus::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// One file inside a torrent, as reported by the debrid service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub index: u32,
    pub path: String,
    pub size_bytes: u64,
}

impl FileEntry {
    /// Check the file path against the known video extensions
    pub fn is_video(&self) -> bool {
        let lower = self.path.to_lowercase();
        VIDEO_EXTENSIONS
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext)))
    }

    /// File name without leading directories
    pub fn filename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A torrent job tracked through the debrid lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentJob {
    pub id: String,
    pub magnet: String,
    pub status: JobStatus,
    pub files: Vec<FileEntry>,
    pub selected_file: Option<FileEntry>,
    pub direct_links: Vec<String>,
}

impl TorrentJob {
    /// Create a job in `Queued` state from a submission response
    pub fn new(id: String, magnet: String) -> Self {
        Self {
            id,
            magnet,
            status: JobStatus::Queued,
            files: Vec::new(),
            selected_file: None,
            direct_links: Vec::new(),
        }
    }

    /// Pick the largest video file; ties keep the first encountered.
    pub fn largest_video_file(&self) -> Option<&FileEntry> {
        self.files
            .iter()
            .filter(|f| f.is_video())
            .fold(None, |best: Option<&FileEntry>, f| match best {
                Some(b) if b.size_bytes >= f.size_bytes => Some(b),
                _ => Some(f),
            })
    }
}

/// A magnet resolved to a direct, time-limited download URL.
///
/// The upstream expiry is never reported; any later 4xx/transport failure on
/// `direct_url` must be treated as a possible expiry signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedStream {
    pub source_magnet: String,
    pub direct_url: String,
    pub filename: String,
    pub size_bytes: u64,
    pub resolved_at: SystemTime,
}

impl fmt::Display for ResolvedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.filename, format_size(self.size_bytes))
    }
}

/// Outcome of a resolution pass, surfaced verbatim on the HTTP API
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Stream is playable now
    Ready(ResolvedStream),
    /// Valid magnet, debrid still working; caller should re-poll
    Processing { status: JobStatus },
    /// Unrecoverable (bad magnet, no video files, upstream rejection)
    Error(String),
}

// =============================================================================
// Playability Models
// =============================================================================

/// Whether a browser can play the stream without server-side re-encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Playability {
    Native,
    Transcode,
}

/// Classifier output: the decision plus how it was reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayabilityVerdict {
    pub container_ext: Option<String>,
    pub mime_type: Option<String>,
    pub decision: Playability,
    pub reason: &'static str,
}

impl fmt::Display for PlayabilityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decision {
            Playability::Native => write!(f, "native ({})", self.reason),
            Playability::Transcode => write!(f, "transcode ({})", self.reason),
        }
    }
}

// =============================================================================
// Transcode Models
// =============================================================================

/// Which encoder path a transcode session runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderMode {
    Hardware,
    Software,
}

impl fmt::Display for EncoderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderMode::Hardware => write!(f, "hardware"),
            EncoderMode::Software => write!(f, "software"),
        }
    }
}

/// State of a transcode session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Encoder process launching
    Starting,
    /// Bytes flowing to the client
    Streaming,
    /// Encoder died before the segment completed
    Failed,
    /// Torn down (client gone or segment done)
    Closed,
}

/// Metadata describing a live transcode session (the process handle itself
/// lives in the session manager's registry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeSession {
    pub session_id: Uuid,
    pub source_url: String,
    pub encoder_mode: EncoderMode,
    pub state: SessionState,
}

// =============================================================================
// Playback Models (client)
// =============================================================================

/// Client playback state machine states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Loading,
    Ready,
    Buffering,
    Playing,
    Paused,
    Error(String),
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Loading => write!(f, "loading"),
            PlaybackState::Ready => write!(f, "ready"),
            PlaybackState::Buffering => write!(f, "buffering"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Format a byte count for display
pub fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.0} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{} KB", bytes / 1024)
    }
}
