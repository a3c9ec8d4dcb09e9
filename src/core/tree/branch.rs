use super::{LockTree, NodeId};
use crate::core::types::{Branch, LockId, LockObservation};

/// Position inside one sibling list during the depth-first walk
#[derive(Debug, Clone)]
struct Level<'a> {
    siblings: &'a [NodeId],
    pos: usize,
}

/// Lazy iterator over every root-to-leaf path of a [`LockTree`]
///
/// The walk is depth first and yields branches in insertion order. It holds
/// only a stack of sibling cursors, so it is finite and cheap to clone;
/// calling [`LockTree::branches`] again restarts it.
#[derive(Debug, Clone)]
pub struct BranchIter<'a> {
    tree: &'a LockTree,
    levels: Vec<Level<'a>>,
}

impl<'a> BranchIter<'a> {
    pub(super) fn new(tree: &'a LockTree) -> Self {
        let mut iter = BranchIter {
            tree,
            levels: Vec::new(),
        };
        if !tree.roots().is_empty() {
            iter.levels.push(Level {
                siblings: tree.roots(),
                pos: 0,
            });
            iter.descend(tree.roots()[0]);
        }
        iter
    }

    /// Push the first-child chain below `id` down to a leaf
    fn descend(&mut self, mut id: NodeId) {
        let tree = self.tree;
        loop {
            let children = tree[id].children();
            if children.is_empty() {
                break;
            }
            self.levels.push(Level {
                siblings: children,
                pos: 0,
            });
            id = children[0];
        }
    }

    fn advance(&mut self) {
        while let Some(level) = self.levels.last_mut() {
            level.pos += 1;
            if let Some(&next) = level.siblings.get(level.pos) {
                self.descend(next);
                return;
            }
            self.levels.pop();
        }
    }
}

impl<'a> Iterator for BranchIter<'a> {
    type Item = BranchView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.levels.is_empty() {
            return None;
        }

        let nodes = self
            .levels
            .iter()
            .map(|level| level.siblings[level.pos])
            .collect();
        self.advance();

        Some(BranchView {
            tree: self.tree,
            nodes,
        })
    }
}

/// One branch yielded by [`BranchIter`], borrowing the tree
#[derive(Debug, Clone)]
pub struct BranchView<'a> {
    tree: &'a LockTree,
    nodes: Vec<NodeId>,
}

impl<'a> BranchView<'a> {
    /// Node ids from root to leaf
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn leaf(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    /// Lock identities from root to leaf
    pub fn locks(&self) -> Vec<LockId> {
        self.nodes.iter().map(|&id| self.tree[id].lock_id()).collect()
    }

    pub fn observations(&self) -> impl Iterator<Item = &'a LockObservation> + '_ {
        let tree = self.tree;
        self.nodes.iter().map(move |&id| tree[id].observation())
    }

    /// Owned copy of the branch with its call stacks
    pub fn to_branch(&self) -> Branch {
        Branch(self.observations().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_path(tree: &mut LockTree, locks: &[LockId]) {
        let mut at = None;
        for &lock in locks {
            at = Some(tree.child_or_insert(at, LockObservation::bare(lock)));
        }
    }

    #[test]
    fn test_empty_tree_has_no_branches() {
        let tree = LockTree::new();
        assert!(tree.branches().next().is_none());
    }

    #[test]
    fn test_single_node_is_one_branch() {
        let mut tree = LockTree::new();
        insert_path(&mut tree, &[7]);
        assert_eq!(tree.branch_locks(), vec![vec![7]]);
    }

    #[test]
    fn test_branches_in_depth_first_order() {
        let mut tree = LockTree::new();
        insert_path(&mut tree, &[1, 2, 3]);
        insert_path(&mut tree, &[1, 2, 4]);
        insert_path(&mut tree, &[1, 5]);
        insert_path(&mut tree, &[6]);
        insert_path(&mut tree, &[7, 8]);

        assert_eq!(
            tree.branch_locks(),
            vec![
                vec![1, 2, 3],
                vec![1, 2, 4],
                vec![1, 5],
                vec![6],
                vec![7, 8],
            ]
        );
    }

    #[test]
    fn test_iterator_is_restartable_and_cloneable() {
        let mut tree = LockTree::new();
        insert_path(&mut tree, &[1, 2]);
        insert_path(&mut tree, &[1, 3]);

        let mut iter = tree.branches();
        let first = iter.next().map(|b| b.locks());
        let rest = iter.clone().count();

        assert_eq!(first, Some(vec![1, 2]));
        assert_eq!(rest, 1);
        assert_eq!(iter.count(), 1);
        assert_eq!(tree.branches().count(), 2);
    }

    #[test]
    fn test_branch_view_keeps_call_stacks() {
        let mut tree = LockTree::new();
        let root = tree.child_or_insert(None, LockObservation::new(1, vec![100].into()));
        tree.child_or_insert(Some(root), LockObservation::new(2, vec![200, 201].into()));

        let view = tree.branches().next().unwrap();
        let branch = view.to_branch();

        assert_eq!(view.leaf().map(|id| tree[id].lock_id()), Some(2));
        assert_eq!(branch.locks(), vec![1, 2]);
        assert_eq!(branch.observations()[1].stack.frames(), &[200, 201]);
    }
}
