//! Merged lock-order tree
//!
//! A [`LockTree`] stores lock observations as a forest: every root-to-leaf
//! path is one distinct acquisition order. Nodes live in an arena owned by the
//! tree and refer to each other by [`NodeId`], so the parent relation is a
//! plain index that never extends a node's lifetime and a deep copy (used for
//! snapshots) needs no fix-up.
//!
//! The same type backs the per-thread trees built by the event stage and the
//! global tree owned by the tree stage.

mod branch;

pub use branch::{BranchIter, BranchView};

use crate::core::types::{LockId, LockObservation};
use std::ops::Index;

/// Index of a node inside the [`LockTree`] that created it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A single node of the lock tree
#[derive(Debug, Clone)]
pub struct TreeNode {
    observation: LockObservation,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl TreeNode {
    pub fn observation(&self) -> &LockObservation {
        &self.observation
    }

    pub fn lock_id(&self) -> LockId {
        self.observation.lock_id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Arena-backed forest of lock observations
///
/// Siblings (including the roots) always hold pairwise-distinct
/// observations.
#[derive(Debug, Clone, Default)]
pub struct LockTree {
    slots: Vec<Option<TreeNode>>,
    free: Vec<usize>,
    roots: Vec<NodeId>,
    len: usize,
}

impl Index<NodeId> for LockTree {
    type Output = TreeNode;

    fn index(&self, id: NodeId) -> &TreeNode {
        match self.slots.get(id.0) {
            Some(Some(node)) => node,
            _ => panic!("node {id:?} does not belong to this tree"),
        }
    }
}

impl LockTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Look up a node, returning `None` for ids that were removed
    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Children of `parent`, or the roots when `parent` is `None`
    pub fn children_of(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(id) => &self[id].children,
            None => &self.roots,
        }
    }

    /// Find the child of `parent` (or the root) holding an equal observation
    pub fn find_child(
        &self,
        parent: Option<NodeId>,
        observation: &LockObservation,
    ) -> Option<NodeId> {
        self.children_of(parent)
            .iter()
            .copied()
            .find(|&id| self[id].observation == *observation)
    }

    /// Return the child of `parent` holding `observation`, inserting it if
    /// no sibling holds an equal observation yet
    pub fn child_or_insert(
        &mut self,
        parent: Option<NodeId>,
        observation: LockObservation,
    ) -> NodeId {
        match self.find_child(parent, &observation) {
            Some(id) => id,
            None => self.push_node(parent, observation),
        }
    }

    fn push_node(&mut self, parent: Option<NodeId>, observation: LockObservation) -> NodeId {
        let node = TreeNode {
            observation,
            parent,
            children: Vec::new(),
        };

        let id = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        };

        match parent {
            Some(p) => self.node_mut(p).children.push(id),
            None => self.roots.push(id),
        }
        self.len += 1;
        id
    }

    fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        match self.slots.get_mut(id.0) {
            Some(Some(node)) => node,
            _ => panic!("node {id:?} does not belong to this tree"),
        }
    }

    /// Merge every root of `incoming` into this tree
    ///
    /// Each incoming node is matched against the existing children at the
    /// same position by observation equality. A match continues the merge one
    /// level deeper; a miss grafts the incoming node with its whole subtree.
    ///
    /// # Returns
    /// `true` if any node was added
    pub fn merge(&mut self, incoming: &LockTree) -> bool {
        let mut changed = false;
        for &root in incoming.roots() {
            changed |= self.merge_node(None, incoming, root);
        }
        changed
    }

    fn merge_node(&mut self, at: Option<NodeId>, src: &LockTree, src_id: NodeId) -> bool {
        match self.find_child(at, &src[src_id].observation) {
            Some(existing) => {
                let mut changed = false;
                for &child in src[src_id].children() {
                    changed |= self.merge_node(Some(existing), src, child);
                }
                changed
            }
            None => {
                self.graft(at, src, src_id);
                true
            }
        }
    }

    /// Copy the subtree rooted at `src_id` of `src` under `at`
    fn graft(&mut self, at: Option<NodeId>, src: &LockTree, src_id: NodeId) {
        let mut pending = vec![(at, src_id)];
        while let Some((parent, id)) = pending.pop() {
            let copied = self.push_node(parent, src[id].observation.clone());
            // Reverse keeps the children in their source order
            for &child in src[id].children().iter().rev() {
                pending.push((Some(copied), child));
            }
        }
    }

    /// Remove every node referencing `lock_id`, together with its subtree
    ///
    /// # Returns
    /// The number of nodes removed
    pub fn remove_lock(&mut self, lock_id: LockId) -> usize {
        let mut matches = Vec::new();
        let mut stack: Vec<NodeId> = self.roots.clone();

        while let Some(id) = stack.pop() {
            let node = &self[id];
            if node.lock_id() == lock_id {
                // Everything below goes with it
                matches.push(id);
            } else {
                stack.extend(node.children.iter().copied());
            }
        }

        matches
            .into_iter()
            .map(|id| self.remove_subtree(id))
            .sum()
    }

    /// Detach `id` from its parent and free it with all descendants
    fn remove_subtree(&mut self, id: NodeId) -> usize {
        match self[id].parent {
            Some(parent) => self.node_mut(parent).children.retain(|&c| c != id),
            None => self.roots.retain(|&r| r != id),
        }

        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.slots[current.0].take() {
                stack.extend(node.children);
                self.free.push(current.0);
                removed += 1;
            }
        }

        self.len -= removed;
        removed
    }

    /// Drop every node
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.roots.clear();
        self.len = 0;
    }

    /// Number of live nodes referencing `lock_id`
    pub fn count_lock(&self, lock_id: LockId) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|node| node.lock_id() == lock_id)
            .count()
    }

    pub fn contains_lock(&self, lock_id: LockId) -> bool {
        self.count_lock(lock_id) > 0
    }

    /// Lazily enumerate root-to-leaf branches, in insertion order
    pub fn branches(&self) -> BranchIter<'_> {
        BranchIter::new(self)
    }

    /// Lock identities of every branch, in iteration order
    pub fn branch_locks(&self) -> Vec<Vec<LockId>> {
        self.branches().map(|b| b.locks()).collect()
    }
}
