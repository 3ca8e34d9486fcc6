//! Integration tests for tiny task classification using wiremock
//!
//! The CDN download port is served by a mock server so the inline content
//! fetch runs over real HTTP.

mod common;

use common::{callback, cdn_server, done_seed, piece_seed, Harness};
use seedsched::cdn::TinyFileClient;
use seedsched::config::CdnServer;
use seedsched::resource::{Host, SizeScope};
use seedsched::rpc::{DirectPiece, UrlMeta};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TASK_ID: &str = "f3a9c07d21";
const DOWNLOAD_PATH: &str = "/download/f3a/f3a9c07d21";

/// Seed a single-piece task of `content_length` bytes and wait for completion
async fn seed_single_piece(server: &MockServer, content_length: i64) -> (Harness, SizeScope) {
    let port = server.address().port();
    let h = Harness::new(vec![cdn_server("cdn-1", port)], Duration::from_secs(5)).await;
    let task = h
        .tasks
        .get_or_create(TASK_ID, "http://example.com/tiny.txt", &UrlMeta::default())
        .await;

    let (cb, rx) = callback();
    h.manager.trigger_task(Arc::clone(&task), cb).await.unwrap();

    let sender = h.client.sender(TASK_ID).await;
    sender.unbounded_send(Ok(Some(piece_seed("cdn-1", 0)))).unwrap();
    sender
        .unbounded_send(Ok(Some(done_seed("cdn-1", content_length, 1))))
        .unwrap();
    assert_eq!(rx.await.unwrap(), None);

    let scope = h.wait_completed(TASK_ID).await;
    (h, scope)
}

/// Matching content makes the task TINY with inline content
#[tokio::test]
async fn test_tiny_task_holds_content() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DOWNLOAD_PATH))
        .and(query_param("peerId", "scheduler"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (h, scope) = seed_single_piece(&mock_server, 5).await;

    assert_eq!(scope, SizeScope::Tiny);
    let task = h.tasks.get(TASK_ID).await.unwrap();
    assert_eq!(task.direct_piece().as_deref(), Some(&b"hello"[..]));
    assert_eq!(
        task.register_result().direct_piece,
        Some(DirectPiece::PieceContent(b"hello".to_vec()))
    );
}

/// A body whose length differs from the reported length downgrades to SMALL
#[tokio::test]
async fn test_length_mismatch_is_small() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DOWNLOAD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hell".to_vec()))
        .mount(&mock_server)
        .await;

    let (h, scope) = seed_single_piece(&mock_server, 5).await;

    assert_eq!(scope, SizeScope::Small);
    assert!(h.tasks.get(TASK_ID).await.unwrap().direct_piece().is_none());
}

#[tokio::test]
async fn test_fetch_failure_is_small() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DOWNLOAD_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let (_h, scope) = seed_single_piece(&mock_server, 5).await;

    assert_eq!(scope, SizeScope::Small);
}

/// Single-piece tasks above the tiny limit are never fetched
#[tokio::test]
async fn test_large_single_piece_skips_fetch() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (_h, scope) = seed_single_piece(&mock_server, 4096).await;

    assert_eq!(scope, SizeScope::Small);
}

/// A download body past the tiny limit is refused rather than buffered
#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DOWNLOAD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .mount(&mock_server)
        .await;

    let host = Host::cdn(
        "cdn-uuid",
        &CdnServer {
            host_name: "cdn-1".to_string(),
            ip: "127.0.0.1".to_string(),
            port: 8003,
            download_port: mock_server.address().port(),
        },
    );
    let client = TinyFileClient::new(Duration::from_secs(5)).unwrap();

    let err = client.fetch(TASK_ID, &host).await.unwrap_err();
    assert!(matches!(err, seedsched::Error::Fetch(_)));

    let (h, scope) = seed_single_piece(&mock_server, 5).await;
    assert_eq!(scope, SizeScope::Small);
    assert!(h.tasks.get(TASK_ID).await.unwrap().direct_piece().is_none());
}
