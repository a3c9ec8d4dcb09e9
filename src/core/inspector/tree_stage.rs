use super::event_stage::TreeAction;
use crate::core::tree::LockTree;
use std::sync::Arc;

/// Sole owner of the global lock-order tree
pub(crate) struct TreeStage {
    tree: LockTree,
}

impl TreeStage {
    pub fn new() -> Self {
        TreeStage {
            tree: LockTree::new(),
        }
    }

    #[cfg(test)]
    pub fn tree(&self) -> &LockTree {
        &self.tree
    }

    /// Apply one action
    ///
    /// # Returns
    /// `true` if the tree changed
    pub fn apply(&mut self, action: TreeAction) -> bool {
        match action {
            TreeAction::Merge(incoming) => self.tree.merge(&incoming),
            TreeAction::Delete(lock_id) => self.tree.remove_lock(lock_id) > 0,
        }
    }

    /// Apply a batch of actions in arrival order
    ///
    /// Structure added by merges is handed to `on_snapshot` as an immutable
    /// copy: right before a delete is applied, and at the end of the batch
    /// when the batch ends with merges that changed the tree.
    ///
    /// # Returns
    /// The tree after the batch if any action changed it. A snapshot already
    /// handed to `on_snapshot` is reused when it is still current, so a batch
    /// costs at most one extra copy.
    pub fn apply_batch<I, F>(&mut self, actions: I, mut on_snapshot: F) -> Option<Arc<LockTree>>
    where
        I: IntoIterator<Item = TreeAction>,
        F: FnMut(Arc<LockTree>),
    {
        let mut changed = false;
        let mut merged = false;
        let mut current = None;

        for action in actions {
            if matches!(action, TreeAction::Delete(_)) && merged {
                current = Some(self.publish(&mut on_snapshot));
                merged = false;
            }

            let is_merge = matches!(action, TreeAction::Merge(_));
            if self.apply(action) {
                changed = true;
                merged |= is_merge;
                current = None;
            }
        }

        if merged {
            current = Some(self.publish(&mut on_snapshot));
        }

        if !changed {
            return None;
        }
        Some(current.unwrap_or_else(|| self.snapshot()))
    }

    fn publish<F: FnMut(Arc<LockTree>)>(&self, on_snapshot: &mut F) -> Arc<LockTree> {
        let snapshot = self.snapshot();
        on_snapshot(Arc::clone(&snapshot));
        snapshot
    }

    /// Deep copy of the current tree
    pub fn snapshot(&self) -> Arc<LockTree> {
        Arc::new(self.tree.clone())
    }
}
