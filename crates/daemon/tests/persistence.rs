//! File metadata and shard holders survive a daemon restart

mod common;

use std::collections::HashMap;

use nfinite_daemon::{ServiceConfig, ServiceState};

use crate::common::{payload, TestDaemon};

fn config_for(dir: &tempfile::TempDir) -> ServiceConfig {
    ServiceConfig {
        sqlite_path: Some(dir.path().join("db.sqlite")),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_files_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let data = payload(5000);

    let bob_parts = {
        let state = ServiceState::from_config(&config_for(&dir)).await.unwrap();
        let daemon = TestDaemon::start(state).await;
        let mut alice = daemon.connect("alice").await;
        let mut bob = daemon.connect("bob").await;

        alice.upload("notes.txt", data.clone()).await;
        let (address, part) = bob.receive_part().await;
        assert_eq!(part, data);

        alice.close().await;
        bob.close().await;
        daemon.stop().await;
        HashMap::from([(address, part)])
    };

    let state = ServiceState::from_config(&config_for(&dir)).await.unwrap();
    let daemon = TestDaemon::start(state).await;
    let mut alice = daemon.connect("alice").await;
    let mut bob = daemon.connect("bob").await;
    assert_eq!(alice.listed_files, vec!["notes.txt".to_string()]);
    assert!(bob.listed_files.is_empty());

    alice.request("notes.txt").await;
    bob.serve_request(&bob_parts).await;
    let (name, file) = alice.receive_file().await;
    assert_eq!(name, "notes.txt");
    assert_eq!(file, data);
}

#[tokio::test]
async fn test_missing_database_directory_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig {
        sqlite_path: Some(dir.path().join("absent").join("db.sqlite")),
        ..Default::default()
    };
    let err = ServiceState::from_config(&config).await.unwrap_err();
    assert!(err.to_string().contains("does not exist"), "{}", err);
}
