//! Registry of archives
//!
//! A [`Library`] is the single owner of every [`Archive`] in a process:
//! primary archives created or attached by callers, and the archives
//! reached through their mounts. It knows which [`ArchiveType`]s exist,
//! where their storage lives and which [`Network`] shares them.
//!
//! The handle is cheap to clone. Archives keep a weak reference back to
//! it, so dropping the last handle lets the whole tree go.
//!
//! ```ignore
//! let types = ArchiveTypes::new().with("kv", Arc::new(kv_type))?;
//! let library = Library::new(LibraryConfig::default(), types, Arc::new(swarm))?;
//!
//! let archive = library.create_archive("kv", ArchiveOptions::default(), StatePatch::new()).await?;
//! assert!(library.get_archive(&archive.key()).is_some());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::archive::{Archive, ArchiveEvent, StatePatch};
use crate::crypto::{KeyPair, PublicKey};
use crate::network::Network;
use crate::storage::{ArchiveOptions, ArchiveType, OpenArgs, StorageError, StorageInstance, StorageRoot};

mod config;
mod types;

pub use config::{ConfigError, LibraryConfig, CONFIG_FILE_NAME};
pub use types::ArchiveTypes;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LibraryError {
    #[error("no archive type registered as {0}")]
    UnregisteredType(String),
    #[error("invalid archive types: {0}")]
    InvalidArchiveTypes(String),
    #[error("failed to generate archive key: {0}")]
    KeyGeneration(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// The library was dropped while one of its archives was still in use
    #[error("library dropped")]
    Dropped,
}

/// Library-wide notifications
#[derive(Debug, Clone, PartialEq)]
pub enum LibraryEvent {
    /// A new archive joined the registry
    ArchiveRegistered { key: PublicKey, archive_type: String },
    /// An event published by one of the registered archives
    Archive { key: PublicKey, event: ArchiveEvent },
}

#[derive(Debug, Clone)]
pub struct Library {
    inner: Arc<LibraryInner>,
}

#[derive(Debug)]
pub struct LibraryInner {
    config: LibraryConfig,
    root: StorageRoot,
    types: ArchiveTypes,
    network: Arc<dyn Network>,
    registry: RwLock<Registry>,
    events: broadcast::Sender<LibraryEvent>,
}

#[derive(Debug, Default)]
struct Registry {
    by_key: HashMap<PublicKey, Arc<Archive>>,
    /// registration order
    order: Vec<PublicKey>,
}

impl LibraryInner {
    pub(crate) fn emit(&self, event: LibraryEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Library {
    pub fn new(
        config: LibraryConfig,
        types: ArchiveTypes,
        network: Arc<dyn Network>,
    ) -> Result<Self, LibraryError> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        tracing::debug!(
            storage_root = %config.storage_root.display(),
            types = ?types.names().collect::<Vec<_>>(),
            "library created"
        );
        Ok(Self {
            inner: Arc::new(LibraryInner {
                root: StorageRoot::new(config.storage_root.clone()),
                config,
                types,
                network,
                registry: RwLock::new(Registry::default()),
                events,
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<LibraryInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.inner.config
    }

    pub fn storage_root(&self) -> &StorageRoot {
        &self.inner.root
    }

    pub(crate) fn network(&self) -> Arc<dyn Network> {
        self.inner.network.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.inner.events.subscribe()
    }

    /// The archive type registered as `name`
    pub fn archive_type(&self, name: &str) -> Result<&Arc<dyn ArchiveType>, LibraryError> {
        self.inner
            .types
            .get(name)
            .ok_or_else(|| LibraryError::UnregisteredType(name.to_string()))
    }

    // ========================================
    // Registration
    // ========================================

    /// Create a new archive owned by this process
    ///
    /// The archive starts out loaded and writable; `overrides` win over
    /// those defaults.
    pub async fn create_archive(
        &self,
        archive_type: &str,
        options: ArchiveOptions,
        overrides: StatePatch,
    ) -> Result<Arc<Archive>, LibraryError> {
        let status = StatePatch::new().loaded(true).authorized(true).merge(overrides);
        self.add_archive(archive_type, None, options, status).await
    }

    /// Attach an archive created elsewhere; it is shared by default so
    /// it can replicate from its peers
    pub async fn add_remote_archive(
        &self,
        archive_type: &str,
        key: PublicKey,
        options: ArchiveOptions,
        overrides: StatePatch,
    ) -> Result<Arc<Archive>, LibraryError> {
        let status = StatePatch::new().share(true).merge(overrides);
        self.add_archive(archive_type, Some(key), options, status)
            .await
    }

    /// Register an archive, or return the one already registered for `key`
    ///
    /// Without a key a fresh key pair is generated and the archive is
    /// created locally. Readiness starts in the background; callers that
    /// need it await [`Archive::ready`].
    pub async fn add_archive(
        &self,
        archive_type: &str,
        key: Option<PublicKey>,
        options: ArchiveOptions,
        status: StatePatch,
    ) -> Result<Arc<Archive>, LibraryError> {
        let constructor = self.archive_type(archive_type)?.clone();

        if let Some(existing) = key.as_ref().and_then(|key| self.get_archive(key)) {
            tracing::debug!(key = %existing.key(), "archive already registered");
            return Ok(existing);
        }

        let (key, secret_key) = match key {
            Some(key) => (key, None),
            None => {
                let pair =
                    KeyPair::generate().map_err(|e| LibraryError::KeyGeneration(e.to_string()))?;
                (pair.public, Some(pair.secret))
            }
        };

        let location = options.storage.clone().unwrap_or_else(|| {
            self.inner.root.location(&format!(
                "{}/{}",
                archive_type,
                constructor.discovery_key(&key)
            ))
        });
        let instance = constructor
            .open(OpenArgs {
                location,
                key,
                secret_key,
                options,
            })
            .await?;

        let archive = Archive::new(
            Arc::downgrade(&self.inner),
            archive_type.to_string(),
            instance,
            status.resolve(),
            &self.inner.config,
        );

        {
            let mut registry = self.inner.registry.write();
            if let Some(existing) = registry.by_key.get(&archive.key()) {
                return Ok(existing.clone());
            }
            registry.by_key.insert(archive.key(), archive.clone());
            registry.order.push(archive.key());
        }

        tracing::info!(
            key = %archive.key(),
            archive_type = %archive_type,
            primary = archive.is_primary(),
            "registered archive"
        );
        self.inner.emit(LibraryEvent::ArchiveRegistered {
            key: archive.key(),
            archive_type: archive_type.to_string(),
        });

        let ready = archive.ready();
        let key = archive.key();
        tokio::spawn(async move {
            if let Err(e) = ready.await {
                tracing::warn!(key = %key, "archive failed to become ready: {}", e);
            }
        });

        Ok(archive)
    }

    // ========================================
    // Lookups
    // ========================================

    pub fn get_archive(&self, key: &PublicKey) -> Option<Arc<Archive>> {
        self.inner.registry.read().by_key.get(key).cloned()
    }

    /// Every registered archive, in registration order
    pub fn get_archives(&self) -> Vec<Arc<Archive>> {
        let registry = self.inner.registry.read();
        registry
            .order
            .iter()
            .filter_map(|key| registry.by_key.get(key).cloned())
            .collect()
    }

    /// Archives that were not reached through a mount
    pub fn get_primary_archives(&self) -> Vec<Arc<Archive>> {
        self.get_archives()
            .into_iter()
            .filter(|archive| archive.is_primary())
            .collect()
    }

    pub fn get_archive_instance(&self, key: &PublicKey) -> Option<Arc<dyn StorageInstance>> {
        self.get_archive(key).map(|archive| archive.instance())
    }
}
