//! Integration tests for archive metadata

mod common;

use ::common::prelude::*;
use ::common::storage::memory::Fault;
use serde_json::json;

fn info(value: serde_json::Value) -> Info {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}

#[tokio::test]
async fn test_drive_info_defaults_and_merges() {
    let env = common::setup();
    let drive = env
        .library
        .create_archive("drive", ArchiveOptions::default(), StatePatch::new())
        .await
        .unwrap();
    let key = drive.key().to_hex();

    assert_eq!(
        drive.get_info().await,
        info(json!({ "url": format!("dat://{}", key), "key": key }))
    );

    let mut events = drive.subscribe();
    drive
        .set_info(info(json!({ "title": "field notes" })))
        .await
        .unwrap();
    common::next_event(&mut events, |event| matches!(event, ArchiveEvent::InfoSet(_))).await;

    let stored = drive.get_info().await;
    assert_eq!(stored.get("title"), Some(&json!("field notes")));
    assert_eq!(stored.get("url"), Some(&json!(format!("dat://{}", key))));
}

#[tokio::test]
async fn test_info_failures_read_as_empty() {
    let env = common::setup();
    let drive = env
        .library
        .create_archive("drive", ArchiveOptions::default(), StatePatch::new())
        .await
        .unwrap();
    env.store.inject_fault(&drive.key(), Fault::Info).unwrap();

    assert!(drive.get_info().await.is_empty());
}

#[tokio::test]
async fn test_info_of_unsynced_remote_times_out_empty() {
    let env = common::setup_with_config(LibraryConfig {
        info_timeout_ms: 50,
        ..LibraryConfig::default()
    });
    let origin = env
        .library
        .create_archive("drive", ArchiveOptions::default(), StatePatch::new())
        .await
        .unwrap();
    origin
        .set_info(info(json!({ "title": "not replicated" })))
        .await
        .unwrap();

    let peer = env.peer();
    let remote = peer
        .library
        .add_remote_archive(
            "drive",
            origin.key(),
            ArchiveOptions::default(),
            StatePatch::new().share(false),
        )
        .await
        .unwrap();

    assert!(remote.get_info().await.is_empty());
}

#[tokio::test]
async fn test_set_info_waits_for_load() {
    let env = common::setup();
    let origin = env
        .library
        .create_archive("drive", ArchiveOptions::default(), StatePatch::new())
        .await
        .unwrap();

    let peer = env.peer();
    let remote = peer
        .library
        .add_remote_archive(
            "drive",
            origin.key(),
            ArchiveOptions::default(),
            StatePatch::new().share(false),
        )
        .await
        .unwrap();

    // not loaded, so nothing reaches the unwritable instance
    remote
        .set_info(info(json!({ "title": "too early" })))
        .await
        .unwrap();
    assert!(!remote.is_loaded());
    assert!(origin.get_info().await.get("title").is_none());
}

#[tokio::test]
async fn test_basic_archives_have_no_info() {
    let env = common::setup();
    let raw = env
        .library
        .create_archive("raw", ArchiveOptions::default(), StatePatch::new())
        .await
        .unwrap();

    assert!(raw.get_info().await.is_empty());
    raw.set_info(info(json!({ "ignored": true }))).await.unwrap();
    assert!(raw.get_info().await.is_empty());
}
