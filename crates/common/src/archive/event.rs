use crate::crypto::PublicKey;
use crate::storage::{Info, MountRecord};

use super::state::ArchiveState;

/// Notifications an archive publishes to its subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveEvent {
    /// A child archive was attached at a prefix
    MountAdded(MountRecord),
    /// Any state field changed; carries the full state after the change
    StateChanged(ArchiveState),
    /// The first usable snapshot arrived
    Loaded,
    /// A sharing session was started
    NetworkOpened,
    /// A peer connected to the sharing session; carries its writer key
    PeerConnected(PublicKey),
    /// The sharing session was closed
    NetworkClosed,
    /// Metadata was written
    InfoSet(Info),
}
