//! Error taxonomy for debrid API calls
//!
//! The retry wrapper only retries `Transport` errors; everything else fails
//! immediately. `LinkExpired` is a heuristic classification applied by
//! callers when a previously-ready direct URL starts failing.

use thiserror::Error;

/// Errors from the debrid service boundary
#[derive(Debug, Error)]
pub enum DebridError {
    /// Timeout, connection refused, DNS failure - retryable with backoff
    #[error("transport error talking to debrid service: {0}")]
    Transport(String),

    /// Malformed magnet, no video files, 4xx from the service - not retryable
    #[error("debrid service rejected the request: {0}")]
    UpstreamInvalid(String),

    /// Missing or rejected API token
    #[error("debrid authentication failed: {0}")]
    Auth(String),

    /// A previously-ready direct link stopped working; re-resolve instead of failing hard
    #[error("direct link appears to have expired")]
    LinkExpired,

    /// Response body did not match the expected shape
    #[error("unexpected debrid response: {0}")]
    BadResponse(String),
}

impl DebridError {
    /// Retry boundary: only transport-class failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, DebridError::Transport(_))
    }

    /// Classify a reqwest failure. Timeouts and connect errors are transport;
    /// anything that produced a response is the caller's problem.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() && e.status().is_none() {
            DebridError::Transport(e.to_string())
        } else {
            DebridError::UpstreamInvalid(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_boundary() {
        assert!(DebridError::Transport("timeout".into()).is_transient());
        assert!(!DebridError::UpstreamInvalid("bad magnet".into()).is_transient());
        assert!(!DebridError::Auth("bad token".into()).is_transient());
        assert!(!DebridError::LinkExpired.is_transient());
        assert!(!DebridError::BadResponse("truncated".into()).is_transient());
    }
}
