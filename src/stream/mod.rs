//! Streaming pipeline
//!
//! - Resolver: magnet URI → direct URL via the debrid service
//! - Classify: native playback vs. transcode verdicts
//! - Transcode: ffmpeg session supervision and HLS playlist generation
//! - Subtitles: caption fetching and SRT→WebVTT conversion

pub mod classify;
pub mod resolver;
pub mod subtitles;
pub mod transcode;

pub use classify::classify;
pub use resolver::StreamResolver;
pub use subtitles::SubtitleFetcher;
pub use transcode::{TranscodeManager, SEGMENT_DURATION_SECS};
