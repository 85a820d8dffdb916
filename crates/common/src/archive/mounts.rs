use std::collections::HashSet;
use std::sync::Arc;

use crate::crypto::PublicKey;
use crate::storage::{ArchiveOptions, MountRecord, StorageInstance};

use super::archive::{Archive, ArchiveError};
use super::event::ArchiveEvent;
use super::state::StatePatch;

/// Describes a child archive to attach at a prefix
#[derive(Debug, Clone)]
pub struct MountSpec {
    /// Registered archive type of the child
    pub archive_type: String,
    /// Path prefix inside the parent
    pub prefix: String,
    /// Child key; a fresh archive is created when absent
    pub key: Option<PublicKey>,
    pub options: ArchiveOptions,
}

impl MountSpec {
    pub fn new(archive_type: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            archive_type: archive_type.into(),
            prefix: prefix.into(),
            key: None,
            options: ArchiveOptions::default(),
        }
    }

    pub fn with_key(mut self, key: PublicKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_options(mut self, options: ArchiveOptions) -> Self {
        self.options = options;
        self
    }
}

impl From<&MountRecord> for MountSpec {
    fn from(record: &MountRecord) -> Self {
        MountSpec::new(record.archive_type.clone(), record.prefix.clone()).with_key(record.key)
    }
}

impl Archive {
    /// Attach a child archive at `spec.prefix` for this session only
    pub async fn add_mount(self: &Arc<Self>, spec: MountSpec) -> Result<Arc<Archive>, ArchiveError> {
        self.ready().await?;
        self.attach_mount(spec).await
    }

    /// Attach a child archive and record the mount in the archive itself
    ///
    /// The record survives restarts: the next session re-attaches it while
    /// becoming ready.
    pub async fn make_persistent_mount(
        self: &Arc<Self>,
        spec: MountSpec,
    ) -> Result<Arc<Archive>, ArchiveError> {
        self.ready().await?;
        if !self.is_authorized().await? {
            return Err(ArchiveError::NotWritable(self.key()));
        }
        let Some(store) = self.capabilities.mounts().cloned() else {
            return Err(ArchiveError::Unsupported {
                key: self.key(),
                capability: "mounts",
            });
        };

        let archive_type = spec.archive_type.clone();
        let prefix = spec.prefix.clone();
        let child = self.attach_mount(spec).await?;
        store
            .add_mount(MountRecord::new(prefix, archive_type, child.key()))
            .await?;

        tracing::info!(parent = %self.key(), child = %child.key(), "persisted mount");
        Ok(child)
    }

    /// Child archives in the order they were attached
    pub async fn get_mounts(self: &Arc<Self>) -> Result<Vec<Arc<Archive>>, ArchiveError> {
        self.ready().await?;
        Ok(self.children())
    }

    /// Child archive mounted at `prefix`; the latest attachment wins
    pub async fn get_mount(
        self: &Arc<Self>,
        prefix: &str,
    ) -> Result<Option<Arc<Archive>>, ArchiveError> {
        self.ready().await?;
        let key = self
            .mounts
            .lock()
            .iter()
            .rev()
            .find(|record| record.prefix == prefix)
            .map(|record| record.key);
        let Some(key) = key else {
            return Ok(None);
        };
        Ok(self.library()?.get_archive(&key))
    }

    pub async fn get_mount_instance(
        self: &Arc<Self>,
        prefix: &str,
    ) -> Result<Option<Arc<dyn StorageInstance>>, ArchiveError> {
        Ok(self.get_mount(prefix).await?.map(|child| child.instance()))
    }

    /// Mount records attached so far, without waiting for readiness
    pub fn mount_records(&self) -> Vec<MountRecord> {
        self.mounts.lock().clone()
    }

    /// Resolve attached records to archives, without waiting for readiness
    pub(super) fn children(&self) -> Vec<Arc<Archive>> {
        let keys: Vec<PublicKey> = self.mounts.lock().iter().map(|record| record.key).collect();
        let Some(library) = self.library().ok() else {
            return Vec::new();
        };
        keys.iter()
            .filter_map(|key| library.get_archive(key))
            .collect()
    }

    /// Re-attach every mount recorded in the instance
    pub(super) async fn load_mounts(self: &Arc<Self>) -> Result<(), ArchiveError> {
        let Some(store) = self.capabilities.mounts().cloned() else {
            return Ok(());
        };
        for record in store.get_mounts().await? {
            match self.attach_mount(MountSpec::from(&record)).await {
                Ok(_) => {}
                Err(ArchiveError::MountCycle(key)) => {
                    tracing::warn!(parent = %self.key(), child = %key, "skipping cyclic mount");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Register the child with the library and record it, without
    /// waiting for this archive to be ready
    pub(super) async fn attach_mount(
        self: &Arc<Self>,
        spec: MountSpec,
    ) -> Result<Arc<Archive>, ArchiveError> {
        if let Some(key) = spec.key {
            if self.has_ancestor(&key) || self.is_mounted_below(&key) {
                return Err(ArchiveError::MountCycle(key));
            }
        }

        let library = self.library()?;
        let child = library
            .add_archive(
                &spec.archive_type,
                spec.key,
                spec.options,
                StatePatch::new().primary(false).parent(Some(self.key())),
            )
            .await?;

        let record = MountRecord::new(spec.prefix, spec.archive_type, child.key());
        tracing::debug!(
            parent = %self.key(),
            child = %record.key,
            prefix = %record.prefix,
            "mount added"
        );
        self.mounts.lock().push(record.clone());
        self.emit(ArchiveEvent::MountAdded(record));
        Ok(child)
    }

    /// Whether `key` is this archive or one of the archives it is mounted in
    fn has_ancestor(&self, key: &PublicKey) -> bool {
        if *key == self.key() {
            return true;
        }
        let Ok(library) = self.library() else {
            return false;
        };

        let mut seen = HashSet::new();
        let mut current = self.state().parent;
        while let Some(parent) = current {
            if parent == *key {
                return true;
            }
            if !seen.insert(parent) {
                break;
            }
            current = library
                .get_archive(&parent)
                .and_then(|archive| archive.state().parent);
        }
        false
    }

    /// Whether this archive is reachable through the mounts of the
    /// already registered archive `key`
    fn is_mounted_below(&self, key: &PublicKey) -> bool {
        let Ok(library) = self.library() else {
            return false;
        };
        let Some(root) = library.get_archive(key) else {
            return false;
        };

        let target = self.key();
        let mut seen = HashSet::from([root.key()]);
        let mut stack = vec![root];
        while let Some(archive) = stack.pop() {
            for record in archive.mount_records() {
                if record.key == target {
                    return true;
                }
                if !seen.insert(record.key) {
                    continue;
                }
                if let Some(child) = library.get_archive(&record.key) {
                    stack.push(child);
                }
            }
        }
        false
    }
}
