//! Storage collaborator interfaces
//!
//! The archive layer never implements replication itself. It drives a
//! [`StorageInstance`] per archive and consumes whatever optional stores
//! the instance advertises through [`Capabilities`]:
//!
//! - **[`InfoStore`]**: free-form archive metadata ([`Info`])
//! - **[`MountStore`]**: the persisted list of [`MountRecord`]s
//!
//! Instances are built by the [`ArchiveType`] registered under the
//! archive's type name, at a location handed out by a [`StorageRoot`].
//!
//! [`memory`] contains an in-process implementation where every instance
//! opened from one [`memory::MemoryStore`] replicates the same datasets.

mod archive_type;
mod instance;
pub mod memory;

pub use archive_type::{ArchiveOptions, ArchiveType, OpenArgs, StorageRoot};
pub use instance::{
    Capabilities, Info, InfoStore, MountRecord, MountStore, StorageError, StorageInstance,
};
