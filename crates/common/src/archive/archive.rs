use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::crypto::PublicKey;
use crate::library::{Library, LibraryConfig, LibraryError, LibraryEvent, LibraryInner};
use crate::network::{NetworkError, NetworkHandle};
use crate::storage::{Capabilities, Info, MountRecord, StorageError, StorageInstance};
use crate::sync::AsyncInit;

use super::event::ArchiveEvent;
use super::state::ArchiveState;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("archive {0} is not writable")]
    NotWritable(PublicKey),
    #[error("archive {key} does not support {capability}")]
    Unsupported {
        key: PublicKey,
        capability: &'static str,
    },
    /// A mount would make an archive its own ancestor
    #[error("mount cycle through archive {0}")]
    MountCycle(PublicKey),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    #[error("library error: {0}")]
    Library(#[from] LibraryError),
}

/// One replicated archive and its orchestration state
///
/// An archive owns its storage instance exclusively. Everything that
/// touches the instance, the mount list or the local writer key first
/// waits for [`Archive::ready`], which runs the initialization sequence
/// exactly once:
///
/// 1. wait for the instance to open
/// 2. load persisted mounts, attaching each child through the library
/// 3. record the local writer key
/// 4. start sharing if it was requested
/// 5. hook the first snapshot, which settles `authorized` and `loaded`
///
/// Accessors of the cached state ([`Archive::state`], [`Archive::is_primary`],
/// [`Archive::is_loaded`]) never wait.
pub struct Archive {
    key: PublicKey,
    archive_type: String,
    pub(super) instance: Arc<dyn StorageInstance>,
    pub(super) capabilities: Capabilities,
    library: Weak<LibraryInner>,
    state: Mutex<ArchiveState>,
    pub(super) mounts: Mutex<Vec<MountRecord>>,
    pub(super) network: tokio::sync::Mutex<Option<Box<dyn NetworkHandle>>>,
    events: broadcast::Sender<ArchiveEvent>,
    info_timeout: Duration,
    init: AsyncInit<ArchiveError>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("key", &self.key)
            .field("archive_type", &self.archive_type)
            .field("capabilities", &self.capabilities)
            .field("state", &*self.state.lock())
            .field("mounts", &self.mounts.lock().len())
            .finish()
    }
}

impl Archive {
    pub(crate) fn new(
        library: Weak<LibraryInner>,
        archive_type: String,
        instance: Arc<dyn StorageInstance>,
        state: ArchiveState,
        config: &LibraryConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let capabilities = instance.capabilities();
        Arc::new(Self {
            key: instance.key(),
            archive_type,
            instance,
            capabilities,
            library,
            state: Mutex::new(state),
            mounts: Mutex::new(Vec::new()),
            network: tokio::sync::Mutex::new(None),
            events,
            info_timeout: config.info_timeout(),
            init: AsyncInit::new(),
        })
    }

    pub fn key(&self) -> PublicKey {
        self.key
    }

    pub fn archive_type(&self) -> &str {
        &self.archive_type
    }

    pub fn instance(&self) -> Arc<dyn StorageInstance> {
        self.instance.clone()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn state(&self) -> ArchiveState {
        self.state.lock().clone()
    }

    pub fn is_primary(&self) -> bool {
        self.state.lock().primary
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArchiveEvent> {
        self.events.subscribe()
    }

    pub(super) fn library(&self) -> Result<Library, ArchiveError> {
        self.library
            .upgrade()
            .map(Library::from_inner)
            .ok_or(ArchiveError::Library(LibraryError::Dropped))
    }

    pub(super) fn emit(&self, event: ArchiveEvent) {
        // no subscribers is fine
        let _ = self.events.send(event.clone());
        if let Some(library) = self.library.upgrade() {
            library.emit(LibraryEvent::Archive {
                key: self.key,
                event,
            });
        }
    }

    pub(super) fn update_state(&self, f: impl FnOnce(&mut ArchiveState)) {
        let (changed, state) = {
            let mut state = self.state.lock();
            let before = state.clone();
            f(&mut state);
            (*state != before, state.clone())
        };
        if changed {
            self.emit(ArchiveEvent::StateChanged(state));
        }
    }

    /// Record an authorization result; a seen `true` is never taken back
    fn mark_authorized(&self, authorized: bool) {
        if authorized {
            self.update_state(|state| state.authorized = true);
        }
    }

    // ========================================
    // Readiness
    // ========================================

    /// Run the initialization sequence, or wait for the run in progress
    // Boxed so the mount loader, which opens child archives that become
    // ready in turn, does not make this future's type recursive.
    pub fn ready(self: &Arc<Self>) -> BoxFuture<'static, Result<(), ArchiveError>> {
        let archive = self.clone();
        Box::pin(async move {
            let init = archive.clone();
            archive
                .init
                .run(move || async move { init.initialize().await })
                .await
        })
    }

    /// Outcome of initialization if it already finished, without waiting
    pub fn try_ready(&self) -> Option<Result<(), ArchiveError>> {
        self.init.peek()
    }

    async fn initialize(self: Arc<Self>) -> Result<(), ArchiveError> {
        tracing::debug!(key = %self.key, archive_type = %self.archive_type, "initializing archive");
        self.instance.ready().await?;

        self.load_mounts().await?;
        tracing::debug!(
            key = %self.key,
            mounts = self.mounts.lock().len(),
            "mounts loaded"
        );

        let local_key = self.instance.local_key();
        self.update_state(|state| state.local_key = Some(local_key));

        let share = self.state.lock().share;
        if share {
            self.share_tree(&mut Vec::new()).await?;
        }

        let mut snapshot = self.instance.snapshot();
        if *snapshot.borrow_and_update() {
            self.on_first_snapshot().await;
        } else {
            tracing::debug!(key = %self.key, "waiting for first snapshot");
            let archive = Arc::downgrade(&self);
            tokio::spawn(async move {
                if snapshot.wait_for(|available| *available).await.is_err() {
                    return;
                }
                if let Some(archive) = archive.upgrade() {
                    archive.on_first_snapshot().await;
                }
            });
        }

        tracing::debug!(key = %self.key, "archive ready");
        Ok(())
    }

    async fn on_first_snapshot(&self) {
        let local_key = self.instance.local_key();
        match self.instance.authorized(&local_key).await {
            Ok(authorized) => self.mark_authorized(authorized),
            Err(e) => {
                tracing::warn!(key = %self.key, "authorization query after first snapshot failed: {}", e)
            }
        }
        self.update_state(|state| state.loaded = true);
        tracing::info!(key = %self.key, "archive loaded");
        self.emit(ArchiveEvent::Loaded);
    }

    // ========================================
    // Authorization
    // ========================================

    /// Ask the instance whether the local writer may append
    ///
    /// Always re-queries: remote writes can grant access at any time.
    pub async fn is_authorized(self: &Arc<Self>) -> Result<bool, ArchiveError> {
        self.ready().await?;
        let local_key = self.instance.local_key();
        let authorized = self.instance.authorized(&local_key).await?;
        self.mark_authorized(authorized);
        Ok(authorized)
    }

    /// Grant the writer `remote_key` (hex) access to this archive
    pub async fn authorize_writer(self: &Arc<Self>, remote_key: &str) -> Result<bool, ArchiveError> {
        self.ready().await?;
        let remote_key =
            PublicKey::from_hex(remote_key).map_err(|e| ArchiveError::InvalidKey(e.to_string()))?;

        if self.instance.authorized(&remote_key).await? {
            return Ok(true);
        }

        let granted = self.instance.authorize(&remote_key).await?;
        if granted {
            tracing::info!(key = %self.key, writer = %remote_key, "authorized writer");
            // the root metadata of a newly authorized writer only
            // materializes after one more write following the grant
            self.set_info(Info::new()).await?;
        }
        Ok(granted)
    }

    // ========================================
    // Info
    // ========================================

    /// Archive metadata, or an empty map if none is available in time
    pub async fn get_info(self: &Arc<Self>) -> Info {
        let Some(store) = self.capabilities.info().cloned() else {
            return Info::new();
        };
        let read = async {
            self.ready().await?;
            store.get_info().await.map_err(ArchiveError::from)
        };
        match tokio::time::timeout(self.info_timeout, read).await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                tracing::warn!(key = %self.key, "failed to read info: {}", e);
                Info::new()
            }
            Err(_) => {
                tracing::debug!(key = %self.key, "info not available yet");
                Info::new()
            }
        }
    }

    /// Write metadata; does nothing until the archive is loaded
    pub async fn set_info(self: &Arc<Self>, info: Info) -> Result<(), ArchiveError> {
        self.ready().await?;
        if !self.is_loaded() {
            tracing::debug!(key = %self.key, "skipping info write, archive not loaded");
            return Ok(());
        }
        if let Some(store) = self.capabilities.info() {
            store.set_info(info.clone()).await?;
        }
        self.emit(ArchiveEvent::InfoSet(info));
        Ok(())
    }
}
