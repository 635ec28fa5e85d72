//! Hot-reloadable allow-set wrapper.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::allowset::AllowSet;

/// A wrapper that allows hot-swapping the token allow-set.
///
/// The periodic refresher and the SIGHUP handler both publish new sets
/// through this type. Uses `parking_lot::RwLock` which doesn't poison on
/// panic. Replacement is atomic: in-flight checks finish against the old
/// snapshot, new checks see the new one.
pub struct ReloadableTokens {
    inner: RwLock<Arc<AllowSet>>,
}

impl ReloadableTokens {
    /// Create with an initial allow-set.
    pub fn new(set: AllowSet) -> Self {
        Self {
            inner: RwLock::new(Arc::new(set)),
        }
    }

    /// Replace the allow-set with a freshly loaded one.
    pub fn reload(&self, set: AllowSet) {
        let mut inner = self.inner.write();
        *inner = Arc::new(set);
    }

    /// Get a clone of the current snapshot without holding the lock.
    #[inline]
    pub fn get(&self) -> Arc<AllowSet> {
        self.inner.read().clone()
    }

    /// Whether the token is in the current snapshot.
    #[inline]
    pub fn contains(&self, token: &str) -> bool {
        self.inner.read().contains(token)
    }

    /// Size of the current snapshot.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the current snapshot is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl std::fmt::Debug for ReloadableTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadableTokens")
            .field("tokens", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_swaps_snapshot() {
        let tokens = ReloadableTokens::new(AllowSet::from_tokens(["old"]));
        assert!(tokens.contains("old"));
        assert!(!tokens.contains("new"));

        tokens.reload(AllowSet::from_tokens(["new"]));
        assert!(!tokens.contains("old"));
        assert!(tokens.contains("new"));
    }

    #[test]
    fn get_outlives_reload() {
        let tokens = ReloadableTokens::new(AllowSet::from_tokens(["old"]));
        let snapshot = tokens.get();
        tokens.reload(AllowSet::new());
        // The held snapshot still answers with the old contents.
        assert!(snapshot.contains("old"));
        assert!(!tokens.contains("old"));
    }
}
