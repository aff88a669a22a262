//! Upstream URL validation
//!
//! Security boundary for every URL the gateway is asked to fetch on a
//! client's behalf. Rejections are terminal (403, never retried) and the
//! offending URL is never logged in full: direct links carry bearer-style
//! tokens in their query strings.

use thiserror::Error;

/// Characters that must never appear in an upstream URL. The URL reaches an
/// encoder command line, so shell metacharacters are rejected outright even
/// though the spawn path never goes through a shell.
const FORBIDDEN_CHARS: &[char] = &[
    ';', '|', '&', '$', '`', '<', '>', '"', '\'', '{', '}', '\\', ' ', '\t', '\n', '\r',
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported URL scheme")]
    Scheme,
    #[error("URL contains forbidden characters")]
    ForbiddenCharacters,
    #[error("URL contains a traversal pattern")]
    Traversal,
    #[error("URL carries userinfo")]
    Userinfo,
    #[error("host not on the allow-list")]
    HostNotAllowed,
    #[error("URL failed to parse")]
    Malformed,
}

/// Validate an upstream URL against the domain allow-list and pattern safety
/// checks. Returns the parsed URL so callers never re-parse the raw string.
pub fn validate_upstream_url(
    raw: &str,
    allowed_domains: &[String],
) -> Result<reqwest::Url, ValidationError> {
    if raw.chars().any(|c| FORBIDDEN_CHARS.contains(&c) || c.is_control()) {
        return Err(ValidationError::ForbiddenCharacters);
    }

    // Traversal, both literal and percent-encoded
    let lower = raw.to_ascii_lowercase();
    if lower.contains("../") || lower.contains("..\\") || lower.contains("%2e%2e") {
        return Err(ValidationError::Traversal);
    }
    // Encoded separators are only ever used to smuggle a path past a check
    if lower.contains("%2f%2f") || lower.contains("%5c") {
        return Err(ValidationError::Traversal);
    }

    let url = reqwest::Url::parse(raw).map_err(|_| ValidationError::Malformed)?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ValidationError::Scheme);
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(ValidationError::Userinfo);
    }

    let host = url
        .host_str()
        .ok_or(ValidationError::Malformed)?
        .to_ascii_lowercase();

    let allowed = allowed_domains.iter().any(|domain| {
        let domain = domain.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{}", domain))
    });
    if !allowed {
        // host only; the full URL may carry tokens
        tracing::warn!(%host, "rejected proxy request for non-allow-listed host");
        return Err(ValidationError::HostNotAllowed);
    }

    Ok(url)
}

/// Pattern-safety checks without the domain allow-list, for fetch targets
/// that legitimately live on arbitrary hosts (caption files).
pub fn validate_fetch_url(raw: &str) -> Result<reqwest::Url, ValidationError> {
    if raw.chars().any(|c| FORBIDDEN_CHARS.contains(&c) || c.is_control()) {
        return Err(ValidationError::ForbiddenCharacters);
    }
    let lower = raw.to_ascii_lowercase();
    if lower.contains("../") || lower.contains("%2e%2e") {
        return Err(ValidationError::Traversal);
    }
    let url = reqwest::Url::parse(raw).map_err(|_| ValidationError::Malformed)?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ValidationError::Scheme);
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(ValidationError::Userinfo);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains() -> Vec<String> {
        vec!["real-debrid.com".to_string()]
    }

    #[test]
    fn test_allowed_host_and_subdomain() {
        assert!(validate_upstream_url("https://real-debrid.com/d/abc", &domains()).is_ok());
        assert!(
            validate_upstream_url("https://download.real-debrid.com/d/abc", &domains()).is_ok()
        );
    }

    #[test]
    fn test_lookalike_host_rejected() {
        assert_eq!(
            validate_upstream_url("https://evilreal-debrid.com/d/abc", &domains()),
            Err(ValidationError::HostNotAllowed)
        );
        assert_eq!(
            validate_upstream_url("https://real-debrid.com.evil.net/d/abc", &domains()),
            Err(ValidationError::HostNotAllowed)
        );
    }

    #[test]
    fn test_shell_metacharacters_rejected() {
        for url in [
            "https://real-debrid.com/d/a;rm -rf /",
            "https://real-debrid.com/d/a|cat",
            "https://real-debrid.com/d/a`id`",
            "https://real-debrid.com/d/a$(id)",
        ] {
            assert!(
                validate_upstream_url(url, &domains()).is_err(),
                "accepted {}",
                url
            );
        }
    }

    #[test]
    fn test_traversal_rejected() {
        assert_eq!(
            validate_upstream_url("https://real-debrid.com/d/../../etc/passwd", &domains()),
            Err(ValidationError::Traversal)
        );
        assert_eq!(
            validate_upstream_url("https://real-debrid.com/d/%2e%2e/secret", &domains()),
            Err(ValidationError::Traversal)
        );
    }

    #[test]
    fn test_scheme_and_userinfo_rejected() {
        assert_eq!(
            validate_upstream_url("file:///etc/passwd", &domains()),
            Err(ValidationError::Scheme)
        );
        assert_eq!(
            validate_upstream_url("ftp://real-debrid.com/d/abc", &domains()),
            Err(ValidationError::Scheme)
        );
        assert_eq!(
            validate_upstream_url("https://user@real-debrid.com/d/abc", &domains()),
            Err(ValidationError::Userinfo)
        );
    }

    #[test]
    fn test_fetch_url_skips_allow_list() {
        assert!(validate_fetch_url("https://opensubtitles.example.org/sub.srt").is_ok());
        assert!(validate_fetch_url("file:///etc/passwd").is_err());
        assert!(validate_fetch_url("https://host/a;b").is_err());
    }
}
