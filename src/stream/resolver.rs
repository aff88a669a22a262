//! Stream resolver
//!
//! Drives a magnet URI through the debrid lifecycle:
//! submit → poll status → select the largest video file → re-poll for a
//! direct link → unrestrict it. The per-call transport retry lives in
//! [`DebridClient`]; this module owns the lifecycle state machine and a
//! second, poll-level tolerance for status fetches that fail transiently.

use std::time::{Duration, SystemTime};

use crate::api::{DebridClient, DebridError};
use crate::models::{FileEntry, JobStatus, Resolution, ResolvedStream, TorrentJob};

/// Fixed delay between lifecycle polls
const POLL_DELAY: Duration = Duration::from_secs(2);
/// Polls per `resolve` call before handing back `Processing`
const MAX_POLLS: u32 = 12;
/// Transient status-fetch failures tolerated per poll (progressive backoff)
const STATUS_FETCH_MAX_ATTEMPTS: u32 = 5;

/// Resolves magnet URIs into direct, playable URLs
pub struct StreamResolver {
    client: DebridClient,
    poll_delay: Duration,
    max_polls: u32,
}

impl StreamResolver {
    /// Create a resolver over an existing debrid client
    pub fn new(client: DebridClient) -> Self {
        Self {
            client,
            poll_delay: POLL_DELAY,
            max_polls: MAX_POLLS,
        }
    }

    /// Override the poll cadence (for testing)
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Access the underlying debrid client (health checks)
    pub fn client(&self) -> &DebridClient {
        &self.client
    }

    /// Resolve a magnet URI. Never panics and never hangs: after the poll
    /// budget is spent the caller gets `Processing` and should re-invoke.
    pub async fn resolve(&self, magnet: &str) -> Resolution {
        match self.resolve_inner(magnet).await {
            Ok(resolution) => resolution,
            Err(DebridError::UpstreamInvalid(msg)) => Resolution::Error(msg),
            Err(e) => Resolution::Error(e.to_string()),
        }
    }

    async fn resolve_inner(&self, magnet: &str) -> Result<Resolution, DebridError> {
        let job = self.client.add_magnet(magnet).await?;
        self.drive(job, magnet).await
    }

    /// Advance the lifecycle until `Ready`, a terminal error, or the poll
    /// budget runs out.
    async fn drive(&self, mut job: TorrentJob, magnet: &str) -> Result<Resolution, DebridError> {
        let mut selected: Option<FileEntry> = None;

        for poll in 0..self.max_polls {
            let info = self.poll_status(&job.id).await?;
            job.status = info.status;
            job.files = info.files;
            job.direct_links = info.direct_links;

            tracing::debug!(job_id = %job.id, poll, status = %job.status, "resolver poll");

            match &job.status {
                JobStatus::AwaitingFileSelection if selected.is_none() => {
                    let file = job.largest_video_file().cloned().ok_or_else(|| {
                        DebridError::UpstreamInvalid("torrent contains no video files".to_string())
                    })?;
                    tracing::info!(
                        job_id = %job.id,
                        file = %file.filename(),
                        size_bytes = file.size_bytes,
                        "selecting largest video file"
                    );
                    self.client.select_files(&job.id, file.index).await?;
                    job.selected_file = Some(file.clone());
                    selected = Some(file);
                }
                JobStatus::Ready => {
                    // Status can flip to ready a beat before links appear
                    if let Some(link) = job.direct_links.first() {
                        return self.unrestrict(magnet, link).await.map(Resolution::Ready);
                    }
                }
                JobStatus::Error(e) => {
                    return Ok(Resolution::Error(format!("debrid job failed: {}", e)));
                }
                _ => {}
            }

            tokio::time::sleep(self.poll_delay).await;
        }

        Ok(Resolution::Processing { status: job.status })
    }

    /// Fetch job status, tolerating transient failures with a backoff that
    /// starts from the poll delay and doubles per attempt.
    async fn poll_status(&self, job_id: &str) -> Result<TorrentJob, DebridError> {
        let mut delay = self.poll_delay;
        let mut attempt = 1;

        loop {
            match self.client.torrent_info(job_id).await {
                Ok(job) => return Ok(job),
                Err(e) if e.is_transient() && attempt < STATUS_FETCH_MAX_ATTEMPTS => {
                    tracing::warn!(job_id, attempt, error = %e, "status fetch failed, backing off");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn unrestrict(&self, magnet: &str, link: &str) -> Result<ResolvedStream, DebridError> {
        let (direct_url, filename, size_bytes) = self.client.unrestrict_link(link).await?;
        tracing::info!(filename = %filename, size_bytes, "stream resolved");
        Ok(ResolvedStream {
            source_magnet: magnet.to_string(),
            direct_url,
            filename,
            size_bytes,
            resolved_at: SystemTime::now(),
        })
    }
}
