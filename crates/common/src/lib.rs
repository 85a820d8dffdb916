/**
 * Archives and their mount trees.
 *  Readiness, authorization, mounts and
 *  the share cascade of a single archive.
 */
pub mod archive;
/**
 * Cryptographic types and operations.
 *  - Public and Private key implementations
 *  - Discovery key derivation
 */
pub mod crypto;
/**
 * Registry of every archive in the process,
 *  keyed by public key.
 */
pub mod library;
/**
 * Interfaces for bringing archives online,
 *  plus an in-process swarm.
 */
pub mod network;
/**
 * Interfaces to the replicated storage backend,
 *  plus an in-memory implementation.
 */
pub mod storage;
/**
 * Run-once async initialization.
 */
pub mod sync;

pub mod prelude {
    pub use crate::archive::{
        Archive, ArchiveError, ArchiveEvent, ArchiveState, MountSpec, StatePatch,
    };
    pub use crate::crypto::{KeyPair, PublicKey, SecretKey};
    pub use crate::library::{ArchiveTypes, Library, LibraryConfig, LibraryError, LibraryEvent};
    pub use crate::network::{Network, NetworkHandle};
    pub use crate::storage::{ArchiveOptions, ArchiveType, Info, MountRecord, StorageInstance};
}
