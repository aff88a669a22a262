//! Subtitle cue table
//!
//! Parses a WebVTT/SRT-style payload into a time-indexed table once per
//! track, then answers "which cues are active at time t" lookups on every
//! playback time update. Lookups run on the render path, so they are a
//! binary search plus a bounded backward scan, never a full pass.

use std::time::Duration;

/// One parsed subtitle cue. `end` is exclusive: a cue is active for
/// `start <= t < end`.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

/// Time-indexed cue table, sorted by start time
#[derive(Debug, Clone, Default)]
pub struct CueTable {
    cues: Vec<Cue>,
    /// Longest cue duration, bounds the backward scan during lookup
    max_len: Duration,
}

impl CueTable {
    /// Parse a caption payload. Lines that do not form a valid cue block are
    /// skipped rather than failing the whole track.
    pub fn parse(payload: &str) -> Self {
        let mut cues = Vec::new();
        let mut max_len = Duration::ZERO;

        let mut lines = payload.lines();
        while let Some(line) = lines.next() {
            let Some((start, end)) = parse_timing_line(line) else {
                continue;
            };
            if end <= start {
                continue;
            }

            let mut text = String::new();
            for text_line in lines.by_ref() {
                if text_line.trim().is_empty() {
                    break;
                }
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(text_line);
            }
            if text.is_empty() {
                continue;
            }

            max_len = max_len.max(end - start);
            cues.push(Cue { start, end, text });
        }

        cues.sort_by_key(|c| c.start);
        Self { cues, max_len }
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    /// All cues active at `time + delay_ms`, using the `[start, end)` rule.
    /// The delay is signed: positive shows cues earlier, negative later, and
    /// a shift past zero clamps there. Binary search finds the insertion
    /// point; only cues starting within `max_len` before the lookup time can
    /// still be active, which bounds the backward scan.
    pub fn active_at(&self, time: Duration, delay_ms: i64) -> Vec<&Cue> {
        let t = shift(time, delay_ms);
        let idx = self.cues.partition_point(|c| c.start <= t);
        let floor = t.checked_sub(self.max_len).unwrap_or(Duration::ZERO);

        let mut active: Vec<&Cue> = self.cues[..idx]
            .iter()
            .rev()
            .take_while(|c| c.start >= floor)
            .filter(|c| c.end > t)
            .collect();
        active.reverse();
        active
    }
}

/// Apply a signed millisecond offset to a playback position, clamping at zero
fn shift(time: Duration, delay_ms: i64) -> Duration {
    if delay_ms >= 0 {
        time + Duration::from_millis(delay_ms as u64)
    } else {
        time.saturating_sub(Duration::from_millis(delay_ms.unsigned_abs()))
    }
}

/// Parse a cue timing line: `HH:MM:SS,mmm --> HH:MM:SS,mmm` (SRT) or
/// `[HH:]MM:SS.mmm --> [HH:]MM:SS.mmm` (WebVTT, possibly with settings after
/// the end timestamp).
fn parse_timing_line(line: &str) -> Option<(Duration, Duration)> {
    let (start_raw, rest) = line.split_once("-->")?;
    let end_raw = rest.trim().split_whitespace().next()?;
    let start = parse_timestamp(start_raw.trim())?;
    let end = parse_timestamp(end_raw)?;
    Some((start, end))
}

/// Parse `HH:MM:SS.mmm`, `HH:MM:SS,mmm`, or `MM:SS.mmm` into a duration
fn parse_timestamp(raw: &str) -> Option<Duration> {
    let normalized = raw.replace(',', ".");
    let parts: Vec<&str> = normalized.split(':').collect();

    let (h, m, s_frac) = match parts.as_slice() {
        [h, m, s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, *s),
        [m, s] => (0, m.parse::<u64>().ok()?, *s),
        _ => return None,
    };

    let (secs, millis) = match s_frac.split_once('.') {
        Some((s, frac)) => {
            let s = s.parse::<u64>().ok()?;
            // pad/truncate the fraction to milliseconds
            let frac: String = format!("{:0<3}", frac).chars().take(3).collect();
            (s, frac.parse::<u64>().ok()?)
        }
        None => (s_frac.parse::<u64>().ok()?, 0),
    };

    Some(Duration::from_millis(
        ((h * 60 + m) * 60 + secs) * 1000 + millis,
    ))
}
