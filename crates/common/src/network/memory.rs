use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::crypto::PublicKey;
use crate::storage::StorageInstance;

use super::{Network, NetworkError, NetworkHandle};

/// Default capacity of a session's peer channel
const PEER_CHANNEL_CAPACITY: usize = 64;

/// In-process swarm
///
/// Sessions meet on a topic named by the archive's discovery key. Every
/// new session connects to all sessions already on its topic: both sides
/// get a peer notification and both instances replicate.
#[derive(Debug, Clone, Default)]
pub struct MemorySwarm {
    inner: Arc<Mutex<SwarmInner>>,
}

#[derive(Debug, Default)]
struct SwarmInner {
    /// discovery key -> sessions announcing it
    topics: HashMap<String, Vec<Member>>,
    next_id: u64,
    opened: usize,
    closed: usize,
}

#[derive(Debug, Clone)]
struct Member {
    id: u64,
    instance: Arc<dyn StorageInstance>,
    peers: broadcast::Sender<PublicKey>,
}

impl MemorySwarm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently announcing `discovery_key`
    pub fn sessions(&self, discovery_key: &str) -> usize {
        self.inner
            .lock()
            .topics
            .get(discovery_key)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of sessions currently open across all topics
    pub fn open_sessions(&self) -> usize {
        self.inner.lock().topics.values().map(Vec::len).sum()
    }

    /// Total sessions ever opened and closed
    pub fn totals(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.opened, inner.closed)
    }

    fn leave(&self, topic: &str, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(members) = inner.topics.get_mut(topic) {
            members.retain(|member| member.id != id);
            if members.is_empty() {
                inner.topics.remove(topic);
            }
        }
        inner.closed += 1;
    }
}

#[async_trait]
impl Network for MemorySwarm {
    async fn open(
        &self,
        instance: Arc<dyn StorageInstance>,
    ) -> Result<Box<dyn NetworkHandle>, NetworkError> {
        let topic = instance.discovery_key();
        let (peers, initial) = broadcast::channel(PEER_CHANNEL_CAPACITY);

        let (id, existing) = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.opened += 1;
            let members = inner.topics.entry(topic.clone()).or_default();
            let existing = members.clone();
            members.push(Member {
                id,
                instance: instance.clone(),
                peers: peers.clone(),
            });
            (id, existing)
        };

        let local_key = instance.local_key();
        tracing::debug!(
            topic = %topic,
            local_key = %local_key,
            peers = existing.len(),
            "joined swarm topic"
        );

        for member in existing {
            let remote_key = member.instance.local_key();
            // a send only fails when nobody listens anymore
            let _ = member.peers.send(local_key);
            let _ = peers.send(remote_key);

            if let Err(e) = instance.replicate(&remote_key).await {
                tracing::warn!(topic = %topic, peer = %remote_key, "replication failed: {}", e);
            }
            if let Err(e) = member.instance.replicate(&local_key).await {
                tracing::warn!(topic = %topic, peer = %local_key, "replication failed: {}", e);
            }
        }

        Ok(Box::new(MemorySession {
            swarm: self.clone(),
            topic,
            id,
            peers,
            initial: Mutex::new(Some(initial)),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Session handle returned by [`MemorySwarm`]
#[derive(Debug)]
pub struct MemorySession {
    swarm: MemorySwarm,
    topic: String,
    id: u64,
    peers: broadcast::Sender<PublicKey>,
    /// receiver created with the channel, so early peers are not lost
    initial: Mutex<Option<broadcast::Receiver<PublicKey>>>,
    closed: AtomicBool,
}

#[async_trait]
impl NetworkHandle for MemorySession {
    fn subscribe(&self) -> broadcast::Receiver<PublicKey> {
        self.initial
            .lock()
            .take()
            .unwrap_or_else(|| self.peers.subscribe())
    }

    async fn close(&self) -> Result<(), NetworkError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.swarm.leave(&self.topic, self.id);
        tracing::debug!(topic = %self.topic, "left swarm topic");
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.swarm.leave(&self.topic, self.id);
        }
    }
}
