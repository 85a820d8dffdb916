//! Network collaborator interfaces
//!
//! Sharing an archive means handing its storage instance to a [`Network`],
//! which announces it under the instance's discovery key and replicates
//! with whichever peers show up. The returned [`NetworkHandle`] reports
//! connected peers and tears the session down again on [`NetworkHandle::close`].
//!
//! [`memory::MemorySwarm`] connects sessions within one process.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::crypto::PublicKey;
use crate::storage::StorageInstance;

pub mod memory;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Announcing the archive failed
    #[error("failed to join swarm for {0}: {1}")]
    Join(String, String),
    #[error("failed to close session: {0}")]
    Close(String),
    #[error("unhandled network error: {0}")]
    Backend(String),
}

/// Brings archives online
#[async_trait]
pub trait Network: Send + Sync + Debug {
    /// Start announcing and replicating `instance`
    async fn open(
        &self,
        instance: Arc<dyn StorageInstance>,
    ) -> Result<Box<dyn NetworkHandle>, NetworkError>;
}

/// An active sharing session for one archive
#[async_trait]
pub trait NetworkHandle: Send + Sync + Debug {
    /// Stream of local writer keys of connected peers
    ///
    /// The first subscriber also receives peers that connected before it
    /// subscribed.
    fn subscribe(&self) -> broadcast::Receiver<PublicKey>;

    /// Leave the swarm; resolves once the session is fully closed
    async fn close(&self) -> Result<(), NetworkError>;
}
