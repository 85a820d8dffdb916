use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::crypto::{PublicKey, SecretKey};

use super::instance::{StorageError, StorageInstance};

/// Caller options for opening an archive
#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    /// Explicit storage location, bypassing the library's storage root
    pub storage: Option<PathBuf>,
}

impl ArchiveOptions {
    pub fn with_storage(storage: impl Into<PathBuf>) -> Self {
        Self {
            storage: Some(storage.into()),
        }
    }
}

/// Everything an [`ArchiveType`] needs to build a storage instance
#[derive(Debug, Clone)]
pub struct OpenArgs {
    /// Where the instance keeps its data
    pub location: PathBuf,
    /// Public key of the archive
    pub key: PublicKey,
    /// Present only when the archive is being created locally
    pub secret_key: Option<SecretKey>,
    pub options: ArchiveOptions,
}

/// A named kind of archive the library can construct
///
/// Registered once per library under a unique name; the library calls
/// [`ArchiveType::open`] whenever it creates, attaches or mounts an
/// archive of this type.
#[async_trait]
pub trait ArchiveType: Send + Sync + Debug {
    async fn open(&self, args: OpenArgs) -> Result<Arc<dyn StorageInstance>, StorageError>;

    /// Derivation used to name an archive's storage directory
    fn discovery_key(&self, key: &PublicKey) -> String {
        key.discovery_key()
    }
}

/// Factory for storage locations below a base directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRoot {
    base: PathBuf,
}

impl StorageRoot {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Location for `sub_path` below the root
    pub fn location(&self, sub_path: &str) -> PathBuf {
        sub_path
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.base.clone(), |path, part| path.join(part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_joins_segments() {
        let root = StorageRoot::new("/var/archives");
        assert_eq!(
            root.location("drive/abcd"),
            PathBuf::from("/var/archives/drive/abcd")
        );
        assert_eq!(
            root.location("/drive//abcd/"),
            PathBuf::from("/var/archives/drive/abcd")
        );
    }
}
