use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;

use crate::crypto::{KeyPair, PublicKey};

use super::archive_type::{ArchiveType, OpenArgs};
use super::instance::{
    Capabilities, Info, InfoStore, MountRecord, MountStore, StorageError, StorageInstance,
};

/// Which optional stores a memory instance exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// File-tree archive: info and mounts, default info names the archive url
    Drive,
    /// Key-value archive: info and mounts, empty default info
    Database,
    /// Plain log with metadata but no mounts
    Feed,
    /// No optional stores at all
    Raw,
}

/// Failures a test can inject into one archive's dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Open,
    Query,
    Grant,
    Info,
}

/// Call counters of one memory instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceStats {
    pub ready_calls: usize,
    pub mount_loads: usize,
    pub snapshot_subscriptions: usize,
}

/// In-memory replicated storage shared by every instance opened from it
///
/// A dataset per archive key holds the state all replicas agree on
/// (writers, info, persisted mounts). A replica per storage location holds
/// what one process knows locally: its writer identity and whether it has
/// synced yet. Reopening a location therefore keeps the same local writer.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    /// archive key -> replicated dataset
    datasets: HashMap<PublicKey, Dataset>,
    /// storage location -> local replica
    replicas: HashMap<PathBuf, Replica>,
    /// every instance opened so far
    instances: Vec<Weak<MemoryInstanceInner>>,
}

#[derive(Debug, Default)]
struct Dataset {
    /// Whether some replica created the archive, i.e. there is data to sync
    origin: bool,
    writers: HashSet<PublicKey>,
    info: Option<Info>,
    mounts: Vec<MountRecord>,
    faults: HashSet<Fault>,
}

#[derive(Debug, Clone)]
struct Replica {
    key: PublicKey,
    local_key: PublicKey,
    synced: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>, StorageError> {
        self.inner.read().map_err(|e| {
            StorageError::Backend(format!("failed to acquire read lock: {}", e))
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>, StorageError> {
        self.inner.write().map_err(|e| {
            StorageError::Backend(format!("failed to acquire write lock: {}", e))
        })
    }

    fn dataset<T>(
        &self,
        key: &PublicKey,
        f: impl FnOnce(&Dataset) -> T,
    ) -> Result<T, StorageError> {
        let inner = self.read()?;
        inner
            .datasets
            .get(key)
            .map(f)
            .ok_or_else(|| StorageError::Backend(format!("unknown archive {}", key)))
    }

    fn dataset_mut<T>(
        &self,
        key: &PublicKey,
        f: impl FnOnce(&mut Dataset) -> T,
    ) -> Result<T, StorageError> {
        let mut inner = self.write()?;
        inner
            .datasets
            .get_mut(key)
            .map(f)
            .ok_or_else(|| StorageError::Backend(format!("unknown archive {}", key)))
    }

    /// Open a replica of `args.key` at `args.location`
    pub fn open(&self, args: &OpenArgs, kind: ArchiveKind) -> Result<MemoryInstance, StorageError> {
        let mut guard = self.write()?;
        let inner: &mut MemoryStoreInner = &mut guard;

        let dataset = inner.datasets.entry(args.key).or_default();
        if dataset.faults.contains(&Fault::Open) {
            return Err(StorageError::Open(
                args.location.clone(),
                "injected fault".to_string(),
            ));
        }

        let replica = match inner.replicas.get(&args.location) {
            Some(replica) if replica.key == args.key => replica.clone(),
            Some(replica) => {
                return Err(StorageError::Open(
                    args.location.clone(),
                    format!("location already holds archive {}", replica.key),
                ))
            }
            None => {
                let replica = match &args.secret_key {
                    Some(secret) => {
                        if secret.public() != args.key {
                            return Err(StorageError::Open(
                                args.location.clone(),
                                "secret key does not match archive key".to_string(),
                            ));
                        }
                        // the creator's writer key is the archive key itself
                        dataset.origin = true;
                        dataset.writers.insert(args.key);
                        Replica {
                            key: args.key,
                            local_key: args.key,
                            synced: true,
                        }
                    }
                    None => {
                        let local = KeyPair::generate()
                            .map_err(|e| StorageError::Backend(e.to_string()))?;
                        Replica {
                            key: args.key,
                            local_key: local.public,
                            synced: false,
                        }
                    }
                };
                inner.replicas.insert(args.location.clone(), replica.clone());
                replica
            }
        };

        let (snapshot, _) = watch::channel(replica.synced);
        let instance = MemoryInstance {
            inner: Arc::new(MemoryInstanceInner {
                store: self.clone(),
                key: args.key,
                local_key: replica.local_key,
                location: args.location.clone(),
                kind,
                snapshot,
                ready_calls: AtomicUsize::new(0),
                mount_loads: AtomicUsize::new(0),
                snapshot_subscriptions: AtomicUsize::new(0),
            }),
        };
        inner.instances.push(Arc::downgrade(&instance.inner));

        tracing::debug!(
            key = %args.key,
            local_key = %replica.local_key,
            location = %args.location.display(),
            synced = replica.synced,
            "opened memory replica"
        );

        Ok(instance)
    }

    fn mark_synced(&self, location: &Path) -> Result<(), StorageError> {
        let mut inner = self.write()?;
        if let Some(replica) = inner.replicas.get_mut(location) {
            replica.synced = true;
        }
        Ok(())
    }

    /// Make every later call of the matching kind on `key` fail
    pub fn inject_fault(&self, key: &PublicKey, fault: Fault) -> Result<(), StorageError> {
        let mut inner = self.write()?;
        inner.datasets.entry(*key).or_default().faults.insert(fault);
        Ok(())
    }

    pub fn clear_fault(&self, key: &PublicKey, fault: Fault) -> Result<(), StorageError> {
        self.dataset_mut(key, |dataset| {
            dataset.faults.remove(&fault);
        })
    }

    /// Live instances opened for `key`, in opening order
    pub fn instances(&self, key: &PublicKey) -> Vec<MemoryInstance> {
        let Ok(inner) = self.read() else {
            return Vec::new();
        };
        inner
            .instances
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|instance| instance.key == *key)
            .map(|inner| MemoryInstance { inner })
            .collect()
    }

    /// Mounts persisted in the dataset of `key`
    pub fn persisted_mounts(&self, key: &PublicKey) -> Result<Vec<MountRecord>, StorageError> {
        self.dataset(key, |dataset| dataset.mounts.clone())
    }

    pub fn writers(&self, key: &PublicKey) -> Result<HashSet<PublicKey>, StorageError> {
        self.dataset(key, |dataset| dataset.writers.clone())
    }
}

/// One replica of a dataset in a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryInstance {
    inner: Arc<MemoryInstanceInner>,
}

#[derive(Debug)]
struct MemoryInstanceInner {
    store: MemoryStore,
    key: PublicKey,
    local_key: PublicKey,
    location: PathBuf,
    kind: ArchiveKind,
    snapshot: watch::Sender<bool>,
    ready_calls: AtomicUsize,
    mount_loads: AtomicUsize,
    snapshot_subscriptions: AtomicUsize,
}

impl MemoryInstance {
    pub fn location(&self) -> &Path {
        &self.inner.location
    }

    pub fn kind(&self) -> ArchiveKind {
        self.inner.kind
    }

    pub fn stats(&self) -> InstanceStats {
        InstanceStats {
            ready_calls: self.inner.ready_calls.load(Ordering::SeqCst),
            mount_loads: self.inner.mount_loads.load(Ordering::SeqCst),
            snapshot_subscriptions: self.inner.snapshot_subscriptions.load(Ordering::SeqCst),
        }
    }

    fn fault(&self, fault: Fault) -> Result<bool, StorageError> {
        self.inner
            .store
            .dataset(&self.inner.key, |dataset| dataset.faults.contains(&fault))
    }

    fn ensure_writable(&self) -> Result<(), StorageError> {
        let local_key = self.inner.local_key;
        let writable = self
            .inner
            .store
            .dataset(&self.inner.key, |dataset| dataset.writers.contains(&local_key))?;
        if !writable {
            return Err(StorageError::NotWritable(local_key));
        }
        Ok(())
    }

    fn default_info(&self) -> Info {
        let key = self.inner.key.to_hex();
        match self.inner.kind {
            ArchiveKind::Drive => {
                let value = json!({
                    "url": format!("dat://{}", key),
                    "key": key,
                });
                match value {
                    serde_json::Value::Object(map) => map,
                    _ => Info::new(),
                }
            }
            ArchiveKind::Database | ArchiveKind::Feed | ArchiveKind::Raw => Info::new(),
        }
    }
}

#[async_trait]
impl StorageInstance for MemoryInstance {
    fn key(&self) -> PublicKey {
        self.inner.key
    }

    fn local_key(&self) -> PublicKey {
        self.inner.local_key
    }

    async fn ready(&self) -> Result<(), StorageError> {
        self.inner.ready_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn authorized(&self, key: &PublicKey) -> Result<bool, StorageError> {
        if self.fault(Fault::Query)? {
            return Err(StorageError::Query("injected fault".to_string()));
        }
        self.inner
            .store
            .dataset(&self.inner.key, |dataset| dataset.writers.contains(key))
    }

    async fn authorize(&self, key: &PublicKey) -> Result<bool, StorageError> {
        if self.fault(Fault::Grant)? {
            return Err(StorageError::Grant("injected fault".to_string()));
        }
        self.ensure_writable()?;
        self.inner.store.dataset_mut(&self.inner.key, |dataset| {
            dataset.writers.insert(*key);
        })?;
        tracing::debug!(key = %self.inner.key, writer = %key, "authorized writer");
        Ok(true)
    }

    fn snapshot(&self) -> watch::Receiver<bool> {
        self.inner
            .snapshot_subscriptions
            .fetch_add(1, Ordering::SeqCst);
        self.inner.snapshot.subscribe()
    }

    async fn replicate(&self, peer: &PublicKey) -> Result<(), StorageError> {
        let origin = self
            .inner
            .store
            .dataset(&self.inner.key, |dataset| dataset.origin)?;
        if !origin {
            // nobody has created this archive yet, nothing to sync
            return Ok(());
        }
        self.inner.store.mark_synced(&self.inner.location)?;
        if !*self.inner.snapshot.borrow() {
            tracing::debug!(key = %self.inner.key, peer = %peer, "first snapshot replicated");
            self.inner.snapshot.send_replace(true);
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        match self.inner.kind {
            ArchiveKind::Drive | ArchiveKind::Database => Capabilities::Full {
                info: Arc::new(self.clone()),
                mounts: Arc::new(self.clone()),
            },
            ArchiveKind::Feed => Capabilities::WithInfo(Arc::new(self.clone())),
            ArchiveKind::Raw => Capabilities::Basic,
        }
    }
}

#[async_trait]
impl InfoStore for MemoryInstance {
    async fn get_info(&self) -> Result<Info, StorageError> {
        if self.fault(Fault::Info)? {
            return Err(StorageError::Info("injected fault".to_string()));
        }
        // a remote replica has no info before its first snapshot
        let mut snapshot = self.inner.snapshot.subscribe();
        snapshot
            .wait_for(|available| *available)
            .await
            .map_err(|_| StorageError::Info("snapshot channel closed".to_string()))?;
        let info = self
            .inner
            .store
            .dataset(&self.inner.key, |dataset| dataset.info.clone())?;
        Ok(info.unwrap_or_else(|| self.default_info()))
    }

    async fn set_info(&self, info: Info) -> Result<(), StorageError> {
        if self.fault(Fault::Info)? {
            return Err(StorageError::Info("injected fault".to_string()));
        }
        self.ensure_writable()?;
        let default_info = self.default_info();
        self.inner.store.dataset_mut(&self.inner.key, |dataset| {
            let current = dataset.info.get_or_insert(default_info);
            for (name, value) in info {
                current.insert(name, value);
            }
        })
    }
}

#[async_trait]
impl MountStore for MemoryInstance {
    async fn get_mounts(&self) -> Result<Vec<MountRecord>, StorageError> {
        self.inner.mount_loads.fetch_add(1, Ordering::SeqCst);
        self.inner
            .store
            .dataset(&self.inner.key, |dataset| dataset.mounts.clone())
    }

    async fn add_mount(&self, record: MountRecord) -> Result<(), StorageError> {
        self.ensure_writable()?;
        self.inner.store.dataset_mut(&self.inner.key, |dataset| {
            match dataset.mounts.iter_mut().find(|m| m.key == record.key) {
                Some(existing) => *existing = record,
                None => dataset.mounts.push(record),
            }
        })
    }
}

/// Archive type producing [`MemoryInstance`]s of one kind
#[derive(Debug, Clone)]
pub struct MemoryArchiveType {
    store: MemoryStore,
    kind: ArchiveKind,
}

impl MemoryArchiveType {
    pub fn new(store: MemoryStore, kind: ArchiveKind) -> Self {
        Self { store, kind }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl ArchiveType for MemoryArchiveType {
    async fn open(&self, args: OpenArgs) -> Result<Arc<dyn StorageInstance>, StorageError> {
        let instance = self.store.open(&args, self.kind)?;
        Ok(Arc::new(instance))
    }
}
