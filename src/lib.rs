//! Streamgate - debrid streaming gateway
//!
//! Turns a magnet link into a browser-playable HTTP stream: resolve through
//! a debrid service, classify the container, transcode when the browser
//! can't play it natively, and relay the bytes with correct range semantics.
//!
//! # Modules
//!
//! - `models` - Shared data structures for jobs, streams, and sessions
//! - `api` - Debrid service client with transport-level retry
//! - `stream` - Resolver, playability classifier, transcode supervision
//! - `player` - Playback session state machine and subtitle cue tables
//! - `server` - The HTTP surface (axum)
//! - `config` - File + environment configuration

pub mod api;
pub mod cli;
pub mod config;
pub mod models;
pub mod player;
pub mod server;
pub mod stream;

// Re-export commonly used types
pub use api::{AccountStatus, DebridClient, DebridError};
pub use config::Config;
pub use models::{
    EncoderMode, FileEntry, JobStatus, Playability, PlayabilityVerdict, PlaybackState, Resolution,
    ResolvedStream, SessionState, TorrentJob, TranscodeSession,
};
pub use player::{PlaybackController, RefreshDecision};
pub use server::AppState;
pub use stream::{classify, StreamResolver, SubtitleFetcher, TranscodeManager};
