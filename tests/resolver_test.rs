//! Stream resolver tests
//!
//! Drives the debrid lifecycle against a mock server: submission, polling,
//! file selection, link unrestriction, and the transport retry boundary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server};

use streamgate::api::{DebridClient, DebridError};
use streamgate::models::Resolution;
use streamgate::stream::StreamResolver;

const MAGNET: &str = "magnet:?xt=urn:btih:c0ffee";

fn resolver(server: &Server) -> StreamResolver {
    let client = DebridClient::with_base_url(server.url(), "test-token");
    StreamResolver::new(client).with_poll_delay(Duration::from_millis(1))
}

const INFO_WAITING: &str = r#"{
    "id": "JOB1",
    "status": "waiting_files_selection",
    "files": [
        {"id": 1, "path": "/release/release.nfo", "bytes": 524288000},
        {"id": 2, "path": "/release/movie.mkv", "bytes": 4718592000}
    ],
    "links": []
}"#;

const INFO_DOWNLOADED: &str = r#"{
    "id": "JOB1",
    "status": "downloaded",
    "files": [
        {"id": 1, "path": "/release/release.nfo", "bytes": 524288000},
        {"id": 2, "path": "/release/movie.mkv", "bytes": 4718592000}
    ],
    "links": ["https://real-debrid.com/d/internal1"]
}"#;

// =============================================================================
// Lifecycle
// =============================================================================

/// Full happy path: submit, await selection, select the largest video file,
/// re-poll, unrestrict.
#[tokio::test]
async fn test_resolve_selects_largest_video_and_returns_ready() {
    let mut server = Server::new_async().await;

    let _add = server
        .mock("POST", "/torrents/addMagnet")
        .with_status(201)
        .with_body(r#"{"id": "JOB1"}"#)
        .create_async()
        .await;

    // downloaded is the fallback; the waiting response matches only the
    // first poll (earlier mocks with unmet hit counts are served first)
    let polls = Arc::new(AtomicUsize::new(0));
    let polls_in_matcher = Arc::clone(&polls);
    let _waiting = server
        .mock("GET", "/torrents/info/JOB1")
        .match_request(move |_| polls_in_matcher.fetch_add(1, Ordering::SeqCst) == 0)
        .with_body(INFO_WAITING)
        .create_async()
        .await;
    let _downloaded = server
        .mock("GET", "/torrents/info/JOB1")
        .with_body(INFO_DOWNLOADED)
        .create_async()
        .await;

    // the .mkv (index 2) must be the selection, not the larger-by-count .nfo
    let select = server
        .mock("POST", "/torrents/selectFiles/JOB1")
        .match_body(Matcher::UrlEncoded("files".into(), "2".into()))
        .with_status(204)
        .create_async()
        .await;

    let _unrestrict = server
        .mock("POST", "/unrestrict/link")
        .match_body(Matcher::UrlEncoded(
            "link".into(),
            "https://real-debrid.com/d/internal1".into(),
        ))
        .with_body(
            r#"{"download": "https://download.real-debrid.com/d/direct1/movie.mkv",
                "filename": "movie.mkv", "filesize": 4718592000}"#,
        )
        .create_async()
        .await;

    match resolver(&server).resolve(MAGNET).await {
        Resolution::Ready(stream) => {
            assert_eq!(stream.filename, "movie.mkv");
            assert_eq!(stream.size_bytes, 4_718_592_000);
            assert_eq!(stream.source_magnet, MAGNET);
            assert!(stream.direct_url.contains("download.real-debrid.com"));
        }
        other => panic!("expected Ready, got {:?}", other),
    }
    select.assert_async().await;
}

/// Transport failures on the status fetch are retried; two 5xx responses
/// followed by success still produce `Ready` with the correct file.
#[tokio::test]
async fn test_resolve_survives_two_transport_failures() {
    let mut server = Server::new_async().await;

    let _add = server
        .mock("POST", "/torrents/addMagnet")
        .with_body(r#"{"id": "JOB1"}"#)
        .create_async()
        .await;

    let failures = Arc::new(AtomicUsize::new(0));
    let failures_in_matcher = Arc::clone(&failures);
    let flaky = server
        .mock("GET", "/torrents/info/JOB1")
        .match_request(move |_| failures_in_matcher.fetch_add(1, Ordering::SeqCst) < 2)
        .with_status(503)
        .expect(2)
        .create_async()
        .await;
    let _downloaded = server
        .mock("GET", "/torrents/info/JOB1")
        .with_body(INFO_DOWNLOADED)
        .create_async()
        .await;

    let _unrestrict = server
        .mock("POST", "/unrestrict/link")
        .with_body(
            r#"{"download": "https://download.real-debrid.com/d/direct1/movie.mkv",
                "filename": "movie.mkv", "filesize": 4718592000}"#,
        )
        .create_async()
        .await;

    match resolver(&server).resolve(MAGNET).await {
        Resolution::Ready(stream) => assert_eq!(stream.filename, "movie.mkv"),
        other => panic!("expected Ready, got {:?}", other),
    }
    flaky.assert_async().await;
}

// =============================================================================
// Error paths
// =============================================================================

/// A malformed magnet never reaches the network
#[tokio::test]
async fn test_invalid_magnet_fails_immediately() {
    let mut server = Server::new_async().await;
    let add = server
        .mock("POST", "/torrents/addMagnet")
        .expect(0)
        .create_async()
        .await;

    match resolver(&server).resolve("https://not-a-magnet.example").await {
        Resolution::Error(msg) => assert!(msg.contains("magnet")),
        other => panic!("expected Error, got {:?}", other),
    }
    add.assert_async().await;
}

/// A torrent with no video files is unrecoverable, not retried
#[tokio::test]
async fn test_no_video_files_is_an_error() {
    let mut server = Server::new_async().await;

    let _add = server
        .mock("POST", "/torrents/addMagnet")
        .with_body(r#"{"id": "JOB1"}"#)
        .create_async()
        .await;
    let _info = server
        .mock("GET", "/torrents/info/JOB1")
        .with_body(
            r#"{"id": "JOB1", "status": "waiting_files_selection",
                "files": [{"id": 1, "path": "/readme.txt", "bytes": 100}], "links": []}"#,
        )
        .create_async()
        .await;

    match resolver(&server).resolve(MAGNET).await {
        Resolution::Error(msg) => assert!(msg.contains("no video files")),
        other => panic!("expected Error, got {:?}", other),
    }
}

/// A terminal upstream status surfaces as an error
#[tokio::test]
async fn test_dead_torrent_is_an_error() {
    let mut server = Server::new_async().await;

    let _add = server
        .mock("POST", "/torrents/addMagnet")
        .with_body(r#"{"id": "JOB1"}"#)
        .create_async()
        .await;
    let _info = server
        .mock("GET", "/torrents/info/JOB1")
        .with_body(r#"{"id": "JOB1", "status": "dead", "files": [], "links": []}"#)
        .create_async()
        .await;

    match resolver(&server).resolve(MAGNET).await {
        Resolution::Error(msg) => assert!(msg.contains("dead")),
        other => panic!("expected Error, got {:?}", other),
    }
}

/// A job still converting comes back as `Processing`, not an error
#[tokio::test]
async fn test_still_converting_returns_processing() {
    let mut server = Server::new_async().await;

    let _add = server
        .mock("POST", "/torrents/addMagnet")
        .with_body(r#"{"id": "JOB1"}"#)
        .create_async()
        .await;
    let _info = server
        .mock("GET", "/torrents/info/JOB1")
        .with_body(r#"{"id": "JOB1", "status": "downloading", "files": [], "links": []}"#)
        .create_async()
        .await;

    match resolver(&server).resolve(MAGNET).await {
        Resolution::Processing { status } => {
            assert_eq!(status, streamgate::models::JobStatus::Converting)
        }
        other => panic!("expected Processing, got {:?}", other),
    }
}

// =============================================================================
// Retry boundary
// =============================================================================

/// Per-call transport retry caps at three attempts
#[tokio::test]
async fn test_transport_retry_caps_at_three_attempts() {
    let mut server = Server::new_async().await;
    let add = server
        .mock("POST", "/torrents/addMagnet")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let client = DebridClient::with_base_url(server.url(), "test-token");
    let err = client.add_magnet(MAGNET).await.unwrap_err();
    assert!(matches!(err, DebridError::Transport(_)));
    add.assert_async().await;
}

/// 4xx responses never retry
#[tokio::test]
async fn test_client_errors_do_not_retry() {
    let mut server = Server::new_async().await;
    let add = server
        .mock("POST", "/torrents/addMagnet")
        .with_status(400)
        .expect(1)
        .create_async()
        .await;

    let client = DebridClient::with_base_url(server.url(), "test-token");
    let err = client.add_magnet(MAGNET).await.unwrap_err();
    assert!(matches!(err, DebridError::UpstreamInvalid(_)));
    add.assert_async().await;
}

/// Auth failures map to their own class
#[tokio::test]
async fn test_unauthorized_maps_to_auth_error() {
    let mut server = Server::new_async().await;
    let _user = server
        .mock("GET", "/user")
        .with_status(401)
        .create_async()
        .await;

    let client = DebridClient::with_base_url(server.url(), "bad-token");
    let err = client.account_status().await.unwrap_err();
    assert!(matches!(err, DebridError::Auth(_)));
}
