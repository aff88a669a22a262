//! Client playback session logic
//!
//! - Controller: the per-session state machine (stall recovery, link refresh)
//! - Cues: time-indexed subtitle tables with O(log n) lookups

pub mod controller;
pub mod cues;

pub use controller::{LoadTarget, PlaybackController, RefreshDecision, MAX_REFRESH_ATTEMPTS};
pub use cues::{Cue, CueTable};
