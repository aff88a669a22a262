//! Subtitle fetching and format conversion
//!
//! Fetches a caption payload on the client's behalf (the relay exists to
//! sidestep cross-origin restrictions) and normalizes it to WebVTT, which is
//! what browser text tracks want. SRT input is detected and converted;
//! payloads that already carry a WEBVTT header pass through untouched.

use anyhow::{anyhow, Result};

/// Fetches caption files and converts them for browser consumption
pub struct SubtitleFetcher {
    client: reqwest::Client,
}

impl SubtitleFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Fetch a caption file and return it as WebVTT
    pub async fn fetch_as_webvtt(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("subtitle fetch failed: {}", response.status()));
        }
        let body = response.text().await?;
        Ok(to_webvtt(&body))
    }
}

impl Default for SubtitleFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize a caption payload to WebVTT. SRT timestamps use commas for the
/// millisecond separator; WebVTT uses dots and requires a header line.
pub fn to_webvtt(content: &str) -> String {
    let trimmed = content.trim_start_matches('\u{feff}');
    if trimmed.trim_start().starts_with("WEBVTT") {
        return trimmed.to_string();
    }
    srt_to_webvtt(trimmed)
}

/// Convert SRT content to WebVTT format.
///
/// Converts timestamp lines (00:00:00,000) to WebVTT form (00:00:00.000) and
/// prepends the required header; dialogue and cue-number lines pass as-is.
pub fn srt_to_webvtt(srt: &str) -> String {
    let mut webvtt = String::from("WEBVTT\n\n");

    for line in srt.lines() {
        if line.contains(" --> ") {
            // timestamp line: commas to dots
            webvtt.push_str(&line.replace(',', "."));
        } else {
            webvtt.push_str(line);
        }
        webvtt.push('\n');
    }

    webvtt
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRT: &str = "1\n00:00:01,000 --> 00:00:04,000\nHello there.\n\n2\n00:00:05,500 --> 00:00:07,250\nGeneral greeting, fine day.\n";

    #[test]
    fn test_srt_timestamps_converted() {
        let vtt = srt_to_webvtt(SRT);
        assert!(vtt.starts_with("WEBVTT\n\n"));
        assert!(vtt.contains("00:00:01.000 --> 00:00:04.000"));
        assert!(vtt.contains("00:00:05.500 --> 00:00:07.250"));
    }

    #[test]
    fn test_dialogue_commas_preserved() {
        let vtt = srt_to_webvtt(SRT);
        assert!(vtt.contains("General greeting, fine day."));
    }

    #[test]
    fn test_existing_webvtt_passes_through() {
        let input = "WEBVTT\n\n00:00:01.000 --> 00:00:04.000\nHello\n";
        assert_eq!(to_webvtt(input), input);
    }

    #[test]
    fn test_bom_stripped() {
        let input = "\u{feff}WEBVTT\n\ncue\n";
        assert!(to_webvtt(input).starts_with("WEBVTT"));
    }
}
