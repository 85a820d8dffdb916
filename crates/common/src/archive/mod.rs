//! Archives and their mount trees
//!
//! An [`Archive`] wraps one storage instance and tracks what the rest of
//! the process needs to know about it: whether it is primary or mounted
//! inside another archive, whether the local writer may append, whether
//! its first snapshot arrived and whether it is being shared.
//!
//! # Mounts
//!
//! Archives nest. [`Archive::add_mount`] attaches a child archive at a path
//! prefix for the current session; [`Archive::make_persistent_mount`] also
//! records the mount in the parent's own storage so the next session
//! re-attaches it during [`Archive::ready`]. Children are registered with
//! the same [`crate::library::Library`] as their parent and carry the
//! parent's key in their state.
//!
//! # Sharing
//!
//! Sharing cascades down the mount tree: starting opens the parent's
//! session before its children's, stopping closes the children first.
//! Every change is published as an [`ArchiveEvent`].

#[allow(clippy::module_inception)]
mod archive;
mod event;
mod mounts;
mod share;
mod state;

pub use archive::{Archive, ArchiveError};
pub use event::ArchiveEvent;
pub use mounts::MountSpec;
pub use state::{ArchiveState, StatePatch};
