//! Shared test utilities for library integration tests
#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::archive::ArchiveEvent;
use common::crypto::PublicKey;
use common::library::{ArchiveTypes, Library, LibraryConfig, LibraryEvent};
use common::network::memory::MemorySwarm;
use common::storage::memory::{ArchiveKind, MemoryArchiveType, MemoryInstance, MemoryStore};
use common::storage::ArchiveType;
use tempfile::TempDir;
use tokio::sync::broadcast;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// One library with its backing store, swarm and storage directory
pub struct TestEnv {
    pub library: Library,
    pub store: MemoryStore,
    pub swarm: MemorySwarm,
    pub dir: TempDir,
}

impl TestEnv {
    /// Another library in the same process: same datasets and swarm,
    /// its own storage directory
    pub fn peer(&self) -> TestEnv {
        with_backends(
            self.store.clone(),
            self.swarm.clone(),
            self.library.config().clone(),
        )
    }

    /// A library restarted on this one's storage directory
    pub fn reopen(&self) -> Library {
        library_at(
            &self.store,
            &self.swarm,
            self.dir.path(),
            self.library.config().clone(),
        )
    }

    /// The live instance opened for `key` by this environment's store
    pub fn instance(&self, key: &PublicKey) -> MemoryInstance {
        self.store
            .instances(key)
            .into_iter()
            .next()
            .expect("no instance opened for key")
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Archive types every test library knows
pub fn archive_types(store: &MemoryStore) -> ArchiveTypes {
    let kind = |kind: ArchiveKind| -> Arc<dyn ArchiveType> {
        Arc::new(MemoryArchiveType::new(store.clone(), kind))
    };
    ArchiveTypes::try_from_entries([
        ("drive", kind(ArchiveKind::Drive)),
        ("kv", kind(ArchiveKind::Database)),
        ("feed", kind(ArchiveKind::Feed)),
        ("raw", kind(ArchiveKind::Raw)),
    ])
    .unwrap()
}

pub fn setup() -> TestEnv {
    setup_with_config(LibraryConfig::default())
}

pub fn setup_with_config(config: LibraryConfig) -> TestEnv {
    with_backends(MemoryStore::new(), MemorySwarm::new(), config)
}

fn with_backends(store: MemoryStore, swarm: MemorySwarm, config: LibraryConfig) -> TestEnv {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let library = library_at(&store, &swarm, dir.path(), config);
    TestEnv {
        library,
        store,
        swarm,
        dir,
    }
}

fn library_at(
    store: &MemoryStore,
    swarm: &MemorySwarm,
    root: &Path,
    config: LibraryConfig,
) -> Library {
    let config = LibraryConfig {
        storage_root: root.to_path_buf(),
        ..config
    };
    Library::new(config, archive_types(store), Arc::new(swarm.clone())).unwrap()
}

/// Poll `condition` until it holds
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Receive events until one matches `filter`
pub async fn next_event<T, F>(rx: &mut broadcast::Receiver<T>, mut filter: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if filter(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("no matching event in time")
}

/// Keys of the archives that published `expected`, in publication order,
/// stopping after `count` of them
pub async fn archives_publishing(
    rx: &mut broadcast::Receiver<LibraryEvent>,
    expected: ArchiveEvent,
    count: usize,
) -> Vec<PublicKey> {
    let mut keys = Vec::with_capacity(count);
    while keys.len() < count {
        let event = next_event(rx, |event| {
            matches!(event, LibraryEvent::Archive { event, .. } if *event == expected)
        })
        .await;
        if let LibraryEvent::Archive { key, .. } = event {
            keys.push(key);
        }
    }
    keys
}
