use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;

/// Observable state of an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveState {
    /// Top-level archive, as opposed to one reached through a mount
    pub primary: bool,
    /// Archive this one is mounted in, if any
    pub parent: Option<PublicKey>,
    /// Whether the local writer may append
    pub authorized: bool,
    /// Whether the first usable snapshot has arrived
    pub loaded: bool,
    /// Whether network sharing is requested
    pub share: bool,
    /// This process's writer identity, known once the archive is ready
    pub local_key: Option<PublicKey>,
}

impl Default for ArchiveState {
    fn default() -> Self {
        Self {
            primary: true,
            parent: None,
            authorized: false,
            loaded: false,
            share: false,
            local_key: None,
        }
    }
}

/// Partial [`ArchiveState`], used for defaults and caller overrides
///
/// Patches layer: `base.merge(overrides)` keeps every field `overrides`
/// leaves unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatePatch {
    pub primary: Option<bool>,
    pub parent: Option<Option<PublicKey>>,
    pub authorized: Option<bool>,
    pub loaded: Option<bool>,
    pub share: Option<bool>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primary(mut self, primary: bool) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn parent(mut self, parent: Option<PublicKey>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn authorized(mut self, authorized: bool) -> Self {
        self.authorized = Some(authorized);
        self
    }

    pub fn loaded(mut self, loaded: bool) -> Self {
        self.loaded = Some(loaded);
        self
    }

    pub fn share(mut self, share: bool) -> Self {
        self.share = Some(share);
        self
    }

    /// Layer `over` on top of `self`
    pub fn merge(self, over: StatePatch) -> StatePatch {
        StatePatch {
            primary: over.primary.or(self.primary),
            parent: over.parent.or(self.parent),
            authorized: over.authorized.or(self.authorized),
            loaded: over.loaded.or(self.loaded),
            share: over.share.or(self.share),
        }
    }

    /// The full state this patch produces on top of the defaults
    pub fn resolve(&self) -> ArchiveState {
        let mut state = ArchiveState::default();
        self.apply(&mut state);
        state
    }

    pub fn apply(&self, state: &mut ArchiveState) {
        if let Some(primary) = self.primary {
            state.primary = primary;
        }
        if let Some(parent) = self.parent {
            state.parent = parent;
        }
        if let Some(authorized) = self.authorized {
            state.authorized = authorized;
        }
        if let Some(loaded) = self.loaded {
            state.loaded = loaded;
        }
        if let Some(share) = self.share {
            state.share = share;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_overrides() {
        let base = StatePatch::new().loaded(true).authorized(true);
        let merged = base.merge(StatePatch::new().primary(false).loaded(false));

        let state = merged.resolve();
        assert!(!state.primary);
        assert!(!state.loaded);
        assert!(state.authorized);
        assert!(!state.share);
        assert_eq!(state.parent, None);
    }

    #[test]
    fn test_empty_patch_resolves_to_defaults() {
        assert_eq!(StatePatch::new().resolve(), ArchiveState::default());
    }
}
