//! Debrid service client
//!
//! Talks to a Real-Debrid-style API: submit a magnet, poll torrent status,
//! select files, exchange the internal link for an unrestricted direct URL.
//! Every outbound call goes through a transport-only retry policy:
//! exponential backoff doubling from 1s, capped at 3 attempts.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

use crate::api::error::DebridError;
use crate::models::{FileEntry, JobStatus, TorrentJob};

/// Base delay for the transport retry backoff (doubles per attempt)
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
/// Maximum attempts per outbound call (1 initial + 2 retries)
const RETRY_MAX_ATTEMPTS: u32 = 3;

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct AddMagnetResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TorrentInfoResponse {
    id: String,
    status: String,
    #[serde(default)]
    files: Vec<TorrentInfoFile>,
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TorrentInfoFile {
    id: u32,
    path: String,
    bytes: u64,
}

#[derive(Debug, Deserialize)]
struct UnrestrictResponse {
    download: String,
    filename: String,
    #[serde(default)]
    filesize: u64,
}

/// Account details returned by the health endpoint
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct AccountStatus {
    pub username: String,
    #[serde(rename = "type")]
    pub account_type: String,
    #[serde(default)]
    pub premium: u64,
}

// =============================================================================
// Client
// =============================================================================

/// Client for the debrid HTTP API
pub struct DebridClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl DebridClient {
    /// Create a client against the production endpoint
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url("https://api.real-debrid.com/rest/1.0", token)
    }

    /// Create a client with a custom base URL (for testing)
    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Submit a magnet URI; returns the torrent job in `Queued` state
    pub async fn add_magnet(&self, magnet: &str) -> Result<TorrentJob, DebridError> {
        if !magnet_regex().is_match(magnet) {
            return Err(DebridError::UpstreamInvalid(
                "not a magnet URI (expected magnet:?xt=urn:btih:...)".to_string(),
            ));
        }

        let url = format!("{}/torrents/addMagnet", self.base_url);
        let magnet_owned = magnet.to_string();
        let resp: AddMagnetResponse = self
            .request_with_retry(|| {
                self.client
                    .post(&url)
                    .bearer_auth(&self.token)
                    .form(&[("magnet", magnet_owned.as_str())])
            })
            .await?;

        tracing::info!(job_id = %resp.id, "magnet submitted");
        Ok(TorrentJob::new(resp.id, magnet.to_string()))
    }

    /// Fetch current status, file list and links for a job
    pub async fn torrent_info(&self, job_id: &str) -> Result<TorrentJob, DebridError> {
        let url = format!("{}/torrents/info/{}", self.base_url, job_id);
        let info: TorrentInfoResponse = self
            .request_with_retry(|| self.client.get(&url).bearer_auth(&self.token))
            .await?;

        let files = info
            .files
            .into_iter()
            .map(|f| FileEntry {
                index: f.id,
                path: f.path.trim_start_matches('/').to_string(),
                size_bytes: f.bytes,
            })
            .collect();

        Ok(TorrentJob {
            id: info.id,
            magnet: String::new(),
            status: JobStatus::from_api_status(&info.status),
            files,
            selected_file: None,
            direct_links: info.links,
        })
    }

    /// Submit the file selection for a job awaiting it
    pub async fn select_files(&self, job_id: &str, file_index: u32) -> Result<(), DebridError> {
        let url = format!("{}/torrents/selectFiles/{}", self.base_url, job_id);
        let files = file_index.to_string();
        self.send_with_retry(|| {
            self.client
                .post(&url)
                .bearer_auth(&self.token)
                .form(&[("files", files.as_str())])
        })
        .await?;
        tracing::debug!(job_id, file_index, "file selection submitted");
        Ok(())
    }

    /// Exchange a torrent-internal link for an unrestricted direct URL
    pub async fn unrestrict_link(
        &self,
        link: &str,
    ) -> Result<(String, String, u64), DebridError> {
        let url = format!("{}/unrestrict/link", self.base_url);
        let link_owned = link.to_string();
        let resp: UnrestrictResponse = self
            .request_with_retry(|| {
                self.client
                    .post(&url)
                    .bearer_auth(&self.token)
                    .form(&[("link", link_owned.as_str())])
            })
            .await?;
        Ok((resp.download, resp.filename, resp.filesize))
    }

    /// Check connectivity and account standing (`GET /user`)
    pub async fn account_status(&self) -> Result<AccountStatus, DebridError> {
        let url = format!("{}/user", self.base_url);
        self.request_with_retry(|| self.client.get(&url).bearer_auth(&self.token))
            .await
    }

    // -------------------------------------------------------------------------
    // Retry plumbing
    // -------------------------------------------------------------------------

    /// Run a request builder through the retry policy and decode JSON
    async fn request_with_retry<T, F>(&self, build: F) -> Result<T, DebridError>
    where
        T: serde::de::DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let resp = self.send_with_retry(build).await?;
        resp.json::<T>()
            .await
            .map_err(|e| DebridError::BadResponse(e.to_string()))
    }

    /// Send a request, retrying only transport-class failures.
    /// Backoff doubles from 1s; non-transport errors fail immediately.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, DebridError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 1;

        loop {
            let result = match build().send().await {
                Ok(resp) => Self::check_status(resp),
                Err(e) => Err(DebridError::from_reqwest(e)),
            };

            match result {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    if !err.is_transient() || attempt >= RETRY_MAX_ATTEMPTS {
                        return Err(err);
                    }
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient debrid failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Map HTTP status classes onto the error taxonomy
    fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, DebridError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            Err(DebridError::Auth(format!("HTTP {}", status)))
        } else if status.is_client_error() {
            Err(DebridError::UpstreamInvalid(format!("HTTP {}", status)))
        } else {
            // 5xx: the service is having a moment; treat like transport
            Err(DebridError::Transport(format!("HTTP {}", status)))
        }
    }
}

/// A magnet must carry an `xt=urn:btih:` content hash to mean anything to
/// the debrid service
fn magnet_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^magnet:\?(?:.*&)?xt=urn:btih:[0-9a-zA-Z]+").expect("static regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_magnet_rejects_non_magnet() {
        let client = DebridClient::with_base_url("http://127.0.0.1:1", "token");
        let err = client.add_magnet("http://example.com/file.torrent").await;
        assert!(matches!(err, Err(DebridError::UpstreamInvalid(_))));
    }

    #[test]
    fn test_magnet_regex_shapes() {
        let re = magnet_regex();
        assert!(re.is_match("magnet:?xt=urn:btih:c0ffee1234"));
        assert!(re.is_match(
            "magnet:?dn=Movie.2024&xt=urn:btih:ABCDEF0123456789ABCDEF0123456789ABCDEF01"
        ));
        assert!(!re.is_match("magnet:?dn=no-hash-here"));
        assert!(!re.is_match("https://example.com/file.torrent"));
    }
}
