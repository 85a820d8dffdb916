use std::collections::BTreeMap;
use std::sync::Arc;

use crate::storage::ArchiveType;

use super::LibraryError;

/// Archive types a library can construct, by name
#[derive(Debug, Clone, Default)]
pub struct ArchiveTypes {
    types: BTreeMap<String, Arc<dyn ArchiveType>>,
}

impl ArchiveTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `archive_type` under `name`
    ///
    /// Names must be non-empty and unique.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        archive_type: Arc<dyn ArchiveType>,
    ) -> Result<(), LibraryError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(LibraryError::InvalidArchiveTypes(
                "archive type name is empty".to_string(),
            ));
        }
        if self.types.contains_key(&name) {
            return Err(LibraryError::InvalidArchiveTypes(format!(
                "archive type {} registered twice",
                name
            )));
        }
        self.types.insert(name, archive_type);
        Ok(())
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        archive_type: Arc<dyn ArchiveType>,
    ) -> Result<Self, LibraryError> {
        self.insert(name, archive_type)?;
        Ok(self)
    }

    pub fn try_from_entries<I, S>(entries: I) -> Result<Self, LibraryError>
    where
        I: IntoIterator<Item = (S, Arc<dyn ArchiveType>)>,
        S: Into<String>,
    {
        entries
            .into_iter()
            .try_fold(Self::new(), |types, (name, archive_type)| {
                types.with(name, archive_type)
            })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ArchiveType>> {
        self.types.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{ArchiveKind, MemoryArchiveType, MemoryStore};

    fn kv() -> Arc<dyn ArchiveType> {
        Arc::new(MemoryArchiveType::new(MemoryStore::new(), ArchiveKind::Database))
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let result = ArchiveTypes::try_from_entries([("kv", kv()), ("kv", kv())]);
        assert!(matches!(result, Err(LibraryError::InvalidArchiveTypes(_))));
    }

    #[test]
    fn test_rejects_empty_name() {
        let result = ArchiveTypes::new().with("", kv());
        assert!(matches!(result, Err(LibraryError::InvalidArchiveTypes(_))));
    }

    #[test]
    fn test_names_are_sorted() {
        let types = ArchiveTypes::try_from_entries([("kv", kv()), ("drive", kv())]).unwrap();
        assert_eq!(types.names().collect::<Vec<_>>(), vec!["drive", "kv"]);
        assert!(types.get("kv").is_some());
        assert!(types.get("feed").is_none());
    }
}
