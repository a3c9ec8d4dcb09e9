use crate::core::tree::{LockTree, NodeId};
use crate::core::types::{AnomalyKind, LockId, LockObservation};

/// Nesting state of one thread that currently holds monitored locks
///
/// The tree is rooted at the first lock the thread took; `current` walks
/// down on every lock and back up on every unlock. Once a mismatched or
/// unbalanced unlock has been seen the tree is failed: depth bookkeeping
/// continues so the thread is released at the right moment, but the tree is
/// never merged.
#[derive(Debug, Default)]
pub(crate) struct ThreadLockTree {
    tree: LockTree,
    current: Option<NodeId>,
    depth: usize,
    failures: Vec<AnomalyKind>,
}

impl ThreadLockTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_failed(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Anomalies that caused this tree to fail, oldest first
    #[cfg(test)]
    pub fn failures(&self) -> &[AnomalyKind] {
        &self.failures
    }

    /// Record an acquisition and descend into it
    ///
    /// # Returns
    /// The nesting depth after the lock
    pub fn lock(&mut self, observation: LockObservation) -> usize {
        let node = self.tree.child_or_insert(self.current, observation);
        self.current = Some(node);
        self.depth += 1;
        self.depth
    }

    /// Record a release
    ///
    /// A release of anything but the innermost held lock fails the tree but
    /// still pops one nesting level.
    pub fn unlock(&mut self, lock_id: LockId) -> Result<(), AnomalyKind> {
        let Some(current) = self.current else {
            return Err(self.fail(AnomalyKind::UnbalancedUnlock));
        };

        let node = &self.tree[current];
        let expected = node.lock_id();
        self.current = node.parent();
        self.depth -= 1;

        if expected != lock_id {
            return Err(self.fail(AnomalyKind::LockOrderViolation { expected }));
        }
        Ok(())
    }

    fn fail(&mut self, kind: AnomalyKind) -> AnomalyKind {
        self.failures.push(kind);
        kind
    }

    /// Consume the state, yielding the tree only if it may be merged
    pub fn into_mergeable(self) -> Option<LockTree> {
        if self.is_failed() || self.tree.is_empty() {
            None
        } else {
            Some(self.tree)
        }
    }
}
