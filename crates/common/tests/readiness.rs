//! Integration tests for the archive readiness sequence

mod common;

use std::sync::Arc;

use ::common::prelude::*;
use ::common::storage::memory::Fault;
use ::common::storage::{MountStore, StorageError};

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_ready_initializes_once() {
    let env = common::setup();
    let archive = env
        .library
        .create_archive("drive", ArchiveOptions::default(), StatePatch::new())
        .await
        .unwrap();

    let waiters = (0..16).map(|_| {
        let archive = archive.clone();
        tokio::spawn(async move { archive.ready().await })
    });
    for result in futures::future::join_all(waiters).await {
        result.unwrap().unwrap();
    }

    let stats = env.instance(&archive.key()).stats();
    assert_eq!(stats.ready_calls, 1);
    assert_eq!(stats.mount_loads, 1);
    assert_eq!(stats.snapshot_subscriptions, 1);
    assert_eq!(archive.try_ready(), Some(Ok(())));

    // a ready archive resolves without running anything again
    archive.ready().await.unwrap();
    assert_eq!(env.instance(&archive.key()).stats().ready_calls, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_loads_after_peer_connects() {
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
            StatePatch::new(),
        )
        .await
        .unwrap();
    let mut events = remote.subscribe();

    // ready, sharing, but nobody to replicate from yet
    remote.ready().await.unwrap();
    assert!(!remote.is_loaded());
    assert!(remote.is_sharing().await);

    origin.set_share(true).await.unwrap();

    common::next_event(&mut events, |event| *event == ArchiveEvent::Loaded).await;
    assert!(remote.is_loaded());
    assert!(!remote.state().authorized);
}

#[tokio::test]
async fn test_open_failure_is_reported_to_caller() {
    let env = common::setup();
    let key = KeyPair::generate().unwrap().public;
    env.store.inject_fault(&key, Fault::Open).unwrap();

    let result = env
        .library
        .add_remote_archive("drive", key, ArchiveOptions::default(), StatePatch::new())
        .await;
    assert!(matches!(
        result,
        Err(LibraryError::Storage(StorageError::Open(_, _)))
    ));
    assert!(env.library.get_archive(&key).is_none());
}

#[tokio::test]
async fn test_readiness_failure_is_shared() {
    let env = common::setup();
    let archive = env
        .library
        .create_archive("drive", ArchiveOptions::default(), StatePatch::new())
        .await
        .unwrap();
    archive.ready().await.unwrap();

    // persist a mount whose type nobody registered
    let child = KeyPair::generate().unwrap().public;
    let instance = env.instance(&archive.key());
    instance
        .add_mount(MountRecord::new("/broken", "hypertrie", child))
        .await
        .unwrap();

    let library = env.reopen();
    let reopened = library
        .add_archive(
            "drive",
            Some(archive.key()),
            ArchiveOptions::default(),
            StatePatch::new(),
        )
        .await
        .unwrap();

    let expected = ArchiveError::Library(LibraryError::UnregisteredType("hypertrie".to_string()));
    assert_eq!(reopened.ready().await, Err(expected.clone()));
    assert_eq!(reopened.ready().await, Err(expected.clone()));
    assert_eq!(reopened.try_ready(), Some(Err(expected)));
}

#[tokio::test]
async fn test_cached_state_does_not_wait() {
    let env = common::setup();
    let archive = env
        .library
        .create_archive(
            "kv",
            ArchiveOptions::default(),
            StatePatch::new().primary(false),
        )
        .await
        .unwrap();

    // answered from the cached state whatever readiness is doing
    assert!(!archive.is_primary());
    assert!(archive.is_loaded());
    assert_eq!(archive.state().parent, None);

    archive.ready().await.unwrap();
    let same = env.library.get_archive(&archive.key()).unwrap();
    assert!(Arc::ptr_eq(&same, &archive));
}
