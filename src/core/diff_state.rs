// Diff State
// Last computed diff, shared between the app and anything rendering it

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::operations::DiffResult;

/// Cloneable handle to the most recent diff. All clones see the same value.
#[derive(Debug, Clone, Default)]
pub struct DiffState {
    inner: Arc<RwLock<Option<DiffResult>>>,
}

impl DiffState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, diff: DiffResult) {
        *self.inner.write() = Some(diff);
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// Copy of the current diff, if any
    pub fn get(&self) -> Option<DiffResult> {
        self.inner.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Ancestor-expanded paths for tree decorations
    pub fn decorations(&self) -> BTreeSet<String> {
        self.inner
            .read()
            .as_ref()
            .map(DiffResult::decorations)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let state = DiffState::new();
        let view = state.clone();

        let mut diff = DiffResult::default();
        diff.local_only.insert("/lib/a.py".to_string());
        state.set(diff);

        assert!(view.is_set());
        assert!(view.decorations().contains("/lib"));

        view.clear();
        assert!(!state.is_set());
        assert!(state.decorations().is_empty());
    }
}
