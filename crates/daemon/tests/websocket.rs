//! Upload and retrieval over real websocket connections

mod common;

use std::collections::HashMap;
use std::time::Duration;

use axum::body::Body;
use http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use nfinite_daemon::http_server;
use nfinite_daemon::ServiceConfig;

use crate::common::{payload, TestDaemon};

#[tokio::test]
async fn test_upload_and_retrieve_across_holders() {
    let daemon = TestDaemon::in_memory().await;
    let mut alice = daemon.connect("alice").await;
    let mut bob = daemon.connect("bob").await;
    let mut carol = daemon.connect("carol").await;
    assert!(alice.listed_files.is_empty());

    let data = payload(9000);
    alice.upload("photo.png", data.clone()).await;

    let mut bob_parts = HashMap::new();
    let (address, part) = bob.receive_part().await;
    assert_eq!(part.len(), 4500);
    bob_parts.insert(address, part);

    let mut carol_parts = HashMap::new();
    let (address, part) = carol.receive_part().await;
    assert_eq!(part.len(), 4500);
    carol_parts.insert(address, part);

    alice.request("photo.png").await;
    bob.serve_request(&bob_parts).await;
    carol.serve_request(&carol_parts).await;

    let (name, file) = alice.receive_file().await;
    assert_eq!(name, "photo.png");
    assert_eq!(file, data);

    daemon.stop().await;
}

#[tokio::test]
async fn test_lone_peer_upload_is_refused() {
    let daemon = TestDaemon::in_memory().await;
    let mut alice = daemon.connect("alice").await;

    alice.upload("photo.png", payload(64)).await;
    let error = alice.expect_error().await;
    assert_eq!(error["kind"], "NoPeersAvailable");

    // nothing was recorded, so a later request does not find the file
    alice.request("photo.png").await;
    let error = alice.expect_error().await;
    assert_eq!(error["kind"], "FileNotFound");
    assert_eq!(error["fileMeta"]["name"], "photo.png");
}

#[tokio::test]
async fn test_disconnected_holder_fails_retrieval() {
    let daemon = TestDaemon::in_memory().await;
    let mut alice = daemon.connect("alice").await;
    let mut bob = daemon.connect("bob").await;
    let mut carol = daemon.connect("carol").await;

    alice.upload("photo.png", payload(9000)).await;
    let _ = bob.receive_part().await;
    let _ = carol.receive_part().await;
    carol.close().await;

    // the close is processed asynchronously; wait until the registry sees it
    let registry = daemon.state.peer().registry();
    for _ in 0..100 {
        if registry.resolve_username("carol").is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(registry.resolve_username("carol").is_none());

    alice.request("photo.png").await;
    let error = alice.expect_error().await;
    assert_eq!(error["kind"], "ShardUnavailable");
}

#[tokio::test]
async fn test_malformed_message_keeps_connection() {
    let daemon = TestDaemon::in_memory().await;
    let mut alice = daemon.connect("alice").await;
    let _bob = daemon.connect("bob").await;

    alice.send_control(json!({"type": "teleport"})).await;
    let error = alice.expect_error().await;
    assert_eq!(error["kind"], "ProtocolError");

    // still registered and serving requests
    alice.request("missing.txt").await;
    let error = alice.expect_error().await;
    assert_eq!(error["kind"], "FileNotFound");
}

#[tokio::test]
async fn test_password_mismatch_is_refused_when_verifying() {
    let daemon = TestDaemon::with_config(&ServiceConfig {
        verify_passwords: true,
        ..Default::default()
    })
    .await;
    let _alice = daemon.connect("alice").await;

    let mut imposter =
        crate::common::WsPeer::open(&daemon.ws_url(), "alice", "not-the-password").await;
    let error = imposter.expect_error().await;
    assert_eq!(error["kind"], "AuthConflict");
}

#[tokio::test]
async fn test_status_routes() {
    let daemon = TestDaemon::in_memory().await;
    let router = http_server::router(daemon.state.clone());

    for (path, status) in [
        ("/_status/healthz", StatusCode::OK),
        ("/_status/readyz", StatusCode::OK),
        ("/_status/version", StatusCode::OK),
        ("/nowhere", StatusCode::NOT_FOUND),
    ] {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), status, "{}", path);
    }
}
