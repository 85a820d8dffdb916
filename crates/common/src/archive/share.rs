use std::collections::HashSet;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use tokio::sync::broadcast;

use crate::crypto::PublicKey;

use super::archive::{Archive, ArchiveError};
use super::event::ArchiveEvent;

impl Archive {
    /// Request or withdraw network sharing for this archive and its mounts
    pub async fn set_share(self: &Arc<Self>, share: bool) -> Result<(), ArchiveError> {
        self.update_state(|state| state.share = share);
        if share {
            self.start_share().await
        } else {
            self.stop_share().await
        }
    }

    /// Open a sharing session, then cascade to every mounted child
    ///
    /// Does nothing if a session is already open.
    pub async fn start_share(self: &Arc<Self>) -> Result<(), ArchiveError> {
        self.ready().await?;
        self.share_tree(&mut Vec::new()).await
    }

    /// Close the sharing session of every mounted child, then this one
    pub async fn stop_share(self: &Arc<Self>) -> Result<(), ArchiveError> {
        self.ready().await?;
        self.unshare_tree(&mut HashSet::new()).await
    }

    /// Whether a sharing session is currently open
    pub async fn is_sharing(&self) -> bool {
        self.network.lock().await.is_some()
    }

    pub(super) fn share_tree<'a>(
        self: &'a Arc<Self>,
        ancestors: &'a mut Vec<PublicKey>,
    ) -> BoxFuture<'a, Result<(), ArchiveError>> {
        Box::pin(async move {
            let key = self.key();
            if ancestors.contains(&key) {
                return Err(ArchiveError::MountCycle(key));
            }

            {
                let mut network = self.network.lock().await;
                if network.is_some() {
                    return Ok(());
                }
                let handle = self.library()?.network().open(self.instance()).await?;
                spawn_peer_forwarder(Arc::downgrade(self), handle.subscribe());
                *network = Some(handle);
                tracing::info!(key = %key, discovery_key = %self.instance.discovery_key(), "sharing archive");
                self.emit(ArchiveEvent::NetworkOpened);
            }

            ancestors.push(key);
            for child in self.children() {
                child.ready().await?;
                child.share_tree(ancestors).await?;
            }
            ancestors.pop();
            Ok(())
        })
    }

    /// Visits each archive at most once
    fn unshare_tree<'a>(
        self: &'a Arc<Self>,
        visited: &'a mut HashSet<PublicKey>,
    ) -> BoxFuture<'a, Result<(), ArchiveError>> {
        Box::pin(async move {
            let key = self.key();
            if !visited.insert(key) {
                return Ok(());
            }

            let mut network = self.network.lock().await;
            if network.is_none() {
                return Ok(());
            }

            for child in self.children() {
                child.unshare_tree(visited).await?;
            }

            if let Some(handle) = network.take() {
                handle.close().await?;
                tracing::info!(key = %key, "stopped sharing archive");
                self.emit(ArchiveEvent::NetworkClosed);
            }
            Ok(())
        })
    }
}

/// Re-publish peer connections of a session as archive events
fn spawn_peer_forwarder(archive: Weak<Archive>, mut peers: broadcast::Receiver<PublicKey>) {
    tokio::spawn(async move {
        loop {
            match peers.recv().await {
                Ok(peer) => {
                    let Some(archive) = archive.upgrade() else {
                        break;
                    };
                    tracing::debug!(key = %archive.key(), peer = %peer, "peer connected");
                    archive.emit(ArchiveEvent::PeerConnected(peer));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("peer forwarder lagged by {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
