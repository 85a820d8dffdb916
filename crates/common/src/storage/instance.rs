use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::crypto::PublicKey;

/// Free-form archive metadata, stored by backends that support it
pub type Info = serde_json::Map<String, serde_json::Value>;

/// Embedding of one archive inside another at a path prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MountRecord {
    /// Path inside the parent archive the child is mounted at
    pub prefix: String,
    /// Registered archive type of the child
    #[serde(rename = "type")]
    pub archive_type: String,
    /// Public key of the child archive
    pub key: PublicKey,
}

impl MountRecord {
    pub fn new(prefix: impl Into<String>, archive_type: impl Into<String>, key: PublicKey) -> Self {
        Self {
            prefix: prefix.into(),
            archive_type: archive_type.into(),
            key,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The instance could not be opened at its location
    #[error("failed to open storage at {0}: {1}")]
    Open(PathBuf, String),
    /// A write was attempted by a writer the instance does not accept
    #[error("local writer {0} is not authorized to write")]
    NotWritable(PublicKey),
    /// An authorization lookup failed
    #[error("authorization query failed: {0}")]
    Query(String),
    /// Granting write access failed
    #[error("authorization grant failed: {0}")]
    Grant(String),
    /// Reading or writing archive metadata failed
    #[error("info unavailable: {0}")]
    Info(String),
    #[error("unhandled storage backend error: {0}")]
    Backend(String),
}

/// Handle to one replicated append-only database
///
/// Every archive owns exactly one instance. The archive never talks to
/// the database engine directly: readiness, authorization, replication
/// and the optional info/mount stores all go through this trait.
#[async_trait]
pub trait StorageInstance: Send + Sync + Debug {
    /// Public key of the archive this instance replicates
    fn key(&self) -> PublicKey;

    /// Topic the instance is announced under on the network
    fn discovery_key(&self) -> String {
        self.key().discovery_key()
    }

    /// Identity of this process's writer within the archive
    fn local_key(&self) -> PublicKey;

    /// Wait until the instance has opened its underlying storage
    async fn ready(&self) -> Result<(), StorageError>;

    /// Whether `key` may append to the archive
    async fn authorized(&self, key: &PublicKey) -> Result<bool, StorageError>;

    /// Grant `key` write access to the archive
    ///
    /// Only succeeds when issued by an already authorized writer.
    async fn authorize(&self, key: &PublicKey) -> Result<bool, StorageError>;

    /// Watch that flips to `true` once the first usable snapshot exists
    ///
    /// For a freshly created archive this is `true` from the start; for a
    /// remote one it flips after the first successful replication.
    fn snapshot(&self) -> watch::Receiver<bool>;

    /// Called by the network when `peer` replicated with this instance
    async fn replicate(&self, peer: &PublicKey) -> Result<(), StorageError>;

    /// Optional stores this instance exposes
    fn capabilities(&self) -> Capabilities;
}

/// Archive metadata store
#[async_trait]
pub trait InfoStore: Send + Sync {
    async fn get_info(&self) -> Result<Info, StorageError>;

    /// Merge `info` into the stored metadata
    async fn set_info(&self, info: Info) -> Result<(), StorageError>;
}

/// Persisted mount list
#[async_trait]
pub trait MountStore: Send + Sync {
    /// All persisted mounts, empty if none
    async fn get_mounts(&self) -> Result<Vec<MountRecord>, StorageError>;

    async fn add_mount(&self, record: MountRecord) -> Result<(), StorageError>;
}

/// Optional stores of a storage instance
///
/// Resolved once when the archive is constructed, so the archive never
/// probes its instance for a capability on a per-call basis.
#[derive(Clone)]
pub enum Capabilities {
    Basic,
    WithInfo(Arc<dyn InfoStore>),
    WithMounts(Arc<dyn MountStore>),
    Full {
        info: Arc<dyn InfoStore>,
        mounts: Arc<dyn MountStore>,
    },
}

impl Capabilities {
    pub fn info(&self) -> Option<&Arc<dyn InfoStore>> {
        match self {
            Capabilities::WithInfo(info) | Capabilities::Full { info, .. } => Some(info),
            Capabilities::Basic | Capabilities::WithMounts(_) => None,
        }
    }

    pub fn mounts(&self) -> Option<&Arc<dyn MountStore>> {
        match self {
            Capabilities::WithMounts(mounts) | Capabilities::Full { mounts, .. } => Some(mounts),
            Capabilities::Basic | Capabilities::WithInfo(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Capabilities::Basic => "basic",
            Capabilities::WithInfo(_) => "info",
            Capabilities::WithMounts(_) => "mounts",
            Capabilities::Full { .. } => "full",
        }
    }
}

impl Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Capabilities::{}", self.name())
    }
}
