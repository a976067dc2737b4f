//! Edit engine: in-place insert, move and delete.
//!
//! Every edit keeps each subtree in one contiguous block and records the
//! single-slot mutations it made in an [`EditScript`], which is then replayed
//! on the tree's attribute files (when the tree has a filename).
//!
//! Inserts and moves shift every coordinate at or after the insertion point,
//! which costs O(max id) per edit; this keeps the on-disk layout a plain
//! depth-first array. Deletes only write tombstones: deleted positions keep
//! their place inside every ancestor's block, and sizes are never reduced.
//! Moves follow the same rule and leave the old ancestors' sizes unchanged,
//! since the vacated positions stay inside their blocks as tombstones.

use std::collections::{HashMap, HashSet, TryReserveError};
use std::path::Path;

use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::build::{check_id, compute_parents, validate_parents, BuildOptions};
use crate::error::{ConstructionError, Error, Result};
use crate::script::EditScript;
use crate::slot::Slot;
use crate::source::{collect_pairs, TabularFormat, TabularIds};
use crate::{NodeId, Tree, UNDEF};

/// Options for [`Tree::add_nodes`].
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Re-insert ids that were deleted instead of failing with
    /// [`Error::DeletedNode`].
    pub allow_deleted: bool,
}

/// What an edit did, plus the script that replays it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EditSummary {
    /// Inserted ids, in insertion order.
    pub added: Vec<NodeId>,
    /// Roots of moved subtrees, in move order.
    pub moved: Vec<NodeId>,
    /// Every id that became a tombstone.
    pub deleted: Vec<NodeId>,
    pub script: EditScript,
}

impl EditSummary {
    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }
}

/// Children waiting for their parent to be inserted.
type Pending = HashMap<NodeId, SmallVec<[NodeId; 4]>>;

impl Tree {
    // =========================================================================
    // Public operations
    // =========================================================================

    /// Inserts one leaf under an existing, live `parent`.
    pub fn insert_node(&mut self, node: NodeId, parent: NodeId) -> Result<EditSummary> {
        self.live_coord(parent)?;
        self.add_nodes([(node, parent)], &AddOptions::default())
    }

    /// Inserts a batch of `(id, parent)` pairs.
    ///
    /// A parent may be inserted later in the same batch; its children wait
    /// until it is placed. The batch is checked as a whole before the first
    /// insertion, so a failing batch leaves the tree untouched.
    pub fn add_nodes<I>(&mut self, pairs: I, options: &AddOptions) -> Result<EditSummary>
    where
        I: IntoIterator<Item = (NodeId, NodeId)>,
    {
        let pairs: Vec<(NodeId, NodeId)> = pairs.into_iter().collect();
        self.check_batch(&pairs, options)?;
        if let Some(max_node) = pairs.iter().map(|&(node, _)| node).max() {
            self.reserve_ids(max_node)?;
        }

        let mut summary = EditSummary::default();
        let mut pending = Pending::new();
        for &(node, parent) in &pairs {
            if self.is_live(parent) {
                self.insert_and_flush(node, parent, &mut pending, &mut summary);
            } else {
                pending.entry(parent).or_default().push(node);
            }
        }
        debug_assert!(pending.is_empty());

        self.finish_edit(summary)
    }

    /// Moves the subtree of `node` under `new_parent`.
    pub fn move_subtree(&mut self, node: NodeId, new_parent: NodeId) -> Result<EditSummary> {
        let coord = self.live_coord(node)?;
        if node == self.root_id {
            return Err(ConstructionError::MoveRoot.into());
        }
        let parent_coord = self.live_coord(new_parent)?;
        if self.parents[node as usize] == new_parent {
            return Ok(EditSummary::default());
        }
        if self.block(node, coord).contains(&parent_coord) {
            return Err(ConstructionError::MoveIntoOwnSubtree { node, new_parent }.into());
        }

        let mut summary = EditSummary::default();
        self.move_unchecked(node, new_parent, &mut summary.script);
        summary.moved.push(node);
        self.finish_edit(summary)
    }

    /// Marks every live position of `node`'s block as deleted.
    ///
    /// Coordinates, parents and sizes are left unchanged. Deleting an
    /// already deleted node is a no-op.
    pub fn delete_subtree(&mut self, node: NodeId) -> Result<EditSummary> {
        self.placed_coord(node)?;
        if node == self.root_id {
            return Err(ConstructionError::DeleteRoot.into());
        }
        let mut summary = EditSummary::default();
        self.delete_unchecked(node, &mut summary);
        self.finish_edit(summary)
    }

    /// Reconciles the tree with a complete `(id, parent)` listing.
    ///
    /// Listed ids that are not live are inserted (deleted ids are re-added),
    /// live ids with a different parent are moved, and live ids missing from
    /// the listing are deleted. The listing must describe a valid tree with
    /// the same root; it is checked before anything is changed.
    pub fn update<I>(&mut self, pairs: I) -> Result<EditSummary>
    where
        I: IntoIterator<Item = (NodeId, NodeId)>,
    {
        let (listed, root) = compute_parents(pairs)?;
        if root != self.root_id {
            return Err(ConstructionError::RootChanged {
                old: self.root_id,
                new: root,
            }
            .into());
        }
        validate_parents(&listed, root)?;
        self.reserve_ids(listed.len() as NodeId - 1)?;

        let mut children: Vec<SmallVec<[NodeId; 4]>> = vec![SmallVec::new(); listed.len()];
        for (node, &parent) in listed.iter().enumerate() {
            if parent != UNDEF && node as NodeId != root {
                children[parent as usize].push(node as NodeId);
            }
        }

        // Top-down over the new tree: when a node is visited its new parent
        // already sits at its final place, so no move can create a cycle.
        let mut summary = EditSummary::default();
        let mut stack: Vec<NodeId> = children[root as usize].iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            let parent = listed[node as usize];
            if !self.is_live(node) {
                self.insert_unchecked(node, parent, &mut summary.script);
                summary.added.push(node);
            } else if self.parents[node as usize] != parent {
                self.move_unchecked(node, parent, &mut summary.script);
                summary.moved.push(node);
            }
            stack.extend(children[node as usize].iter().rev().copied());
        }

        let is_listed = |id: NodeId| listed.get(id as usize).is_some_and(|&p| p != UNDEF);
        let absent: Vec<NodeId> = self
            .subtree_ids(root)?
            .into_iter()
            .filter(|&id| !is_listed(id))
            .collect();
        for node in absent {
            // Nodes below an absent node go with it.
            if self.is_live(node) && is_listed(self.parents[node as usize]) {
                self.delete_unchecked(node, &mut summary);
            }
        }

        self.finish_edit(summary)
    }

    pub fn update_from_tabular(
        &mut self,
        path: impl AsRef<Path>,
        format: &TabularFormat,
    ) -> Result<EditSummary> {
        let pairs = collect_pairs(TabularIds::open(path, format.clone())?)?;
        self.update(pairs)
    }

    /// Rebuilds the index from a new listing, keeping the attribute values
    /// of every id that is still present.
    ///
    /// Attribute files are rewritten in the new order right away; the tree
    /// itself must be saved with [`Tree::to_file`].
    pub fn reset<I>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (NodeId, NodeId)>,
    {
        let (parents, root_id) = compute_parents(pairs)?;
        let rebuilt = Tree::from_parents(parents, root_id, &BuildOptions::default())?;

        let saved = match self.filename {
            Some(_) => self
                .list_attributes()?
                .into_iter()
                .map(|name| {
                    let values = self.load_attribute_values(&name)?;
                    Ok((name, values))
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let filename = self.filename.take();
        *self = rebuilt;
        self.filename = filename;

        for (name, values) in saved {
            self.save_attribute_values(&name, &values)?;
        }
        info!(root = self.root_id, nodes = self.tree_size(), "tree reset");
        Ok(())
    }

    pub fn reset_from_tabular(&mut self, path: impl AsRef<Path>, format: &TabularFormat) -> Result<()> {
        let pairs = collect_pairs(TabularIds::open(path, format.clone())?)?;
        self.reset(pairs)
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn check_batch(&self, pairs: &[(NodeId, NodeId)], options: &AddOptions) -> Result<()> {
        let mut in_batch: HashSet<NodeId> = HashSet::with_capacity(pairs.len());
        for &(node, parent) in pairs {
            check_id(node)?;
            check_id(parent)?;
            if node == self.root_id {
                return Err(ConstructionError::RootExists(node).into());
            }
            if node == parent {
                return Err(ConstructionError::MultipleRoots {
                    first: self.root_id,
                    second: node,
                }
                .into());
            }
            if self.is_live(node) {
                return Err(ConstructionError::NodeExists {
                    node,
                    parent: self.parents[node as usize],
                }
                .into());
            }
            if !options.allow_deleted && self.placed_coord(node).is_ok() {
                return Err(Error::DeletedNode(node));
            }
            if !in_batch.insert(node) {
                return Err(ConstructionError::DuplicateNode(node).into());
            }
        }

        // Every node must hang below a live node through batch nodes only.
        let mut waiting = Pending::new();
        let mut ready: Vec<NodeId> = Vec::new();
        for &(node, parent) in pairs {
            if self.is_live(parent) {
                ready.push(node);
            } else {
                waiting.entry(parent).or_default().push(node);
            }
        }
        while let Some(node) = ready.pop() {
            if let Some(children) = waiting.remove(&node) {
                ready.extend(children);
            }
        }
        if !waiting.is_empty() {
            let mut unresolved: Vec<NodeId> = waiting.into_keys().collect();
            unresolved.sort_unstable();
            return Err(ConstructionError::UnresolvedParents(unresolved).into());
        }
        Ok(())
    }

    // =========================================================================
    // Primitives (no validation, no attribute sync)
    // =========================================================================

    fn insert_and_flush(
        &mut self,
        node: NodeId,
        parent: NodeId,
        pending: &mut Pending,
        summary: &mut EditSummary,
    ) {
        self.insert_unchecked(node, parent, &mut summary.script);
        summary.added.push(node);

        let mut placed: Vec<NodeId> = vec![node];
        while let Some(parent) = placed.pop() {
            if let Some(children) = pending.remove(&parent) {
                for child in children {
                    self.insert_unchecked(child, parent, &mut summary.script);
                    summary.added.push(child);
                    placed.push(child);
                }
            }
        }
    }

    /// Places `node` right after `parent`, as its first child.
    fn insert_unchecked(&mut self, node: NodeId, parent: NodeId, script: &mut EditScript) {
        let inspos = self.coords[parent as usize] as usize + 1;
        self.shift_coords(inspos, 1);
        self.treedata.insert(inspos, Slot::node(node));
        script.insert(inspos);

        self.grow_ids(node);
        let idx = node as usize;
        self.coords[idx] = inspos as u64;
        self.parents[idx] = parent;
        self.subtree_sizes[idx] = 1;
        self.add_to_ancestors(parent, 1);
    }

    /// Reserves a block of tombstones after `new_parent`, copies `node`'s
    /// block into it and tombstones the old block.
    fn move_unchecked(&mut self, node: NodeId, new_parent: NodeId, script: &mut EditScript) {
        let size = self.subtree_sizes[node as usize] as usize;
        let inspos = self.coords[new_parent as usize] as usize + 1;

        self.shift_coords(inspos, size as u64);
        self.treedata
            .splice(inspos..inspos, std::iter::repeat(Slot::TOMBSTONE).take(size));
        for _ in 0..size {
            script.insert(inspos);
        }

        let oldpos = self.coords[node as usize] as usize;
        for i in 0..size {
            let slot = self.treedata[oldpos + i];
            self.treedata[inspos + i] = slot;
            if let Some(id) = slot.id() {
                self.coords[id as usize] = (inspos + i) as u64;
                script.copy(oldpos + i, inspos + i);
            }
            self.treedata[oldpos + i] = Slot::TOMBSTONE;
            script.delete(oldpos + i);
        }

        self.parents[node as usize] = new_parent;
        self.add_to_ancestors(new_parent, size as u64);
    }

    fn delete_unchecked(&mut self, node: NodeId, summary: &mut EditSummary) {
        let coord = self.coords[node as usize] as usize;
        for pos in self.block(node, coord) {
            if let Some(id) = self.treedata[pos].id() {
                self.treedata[pos] = Slot::TOMBSTONE;
                summary.script.delete(pos);
                summary.deleted.push(id);
            }
        }
    }

    fn shift_coords(&mut self, from: usize, by: u64) {
        let from = from as u64;
        for c in self.coords.iter_mut().filter(|c| **c >= from) {
            *c += by;
        }
    }

    /// Makes room for ids up to `max_node` so that later growth cannot fail
    /// halfway through an edit.
    fn reserve_ids(&mut self, max_node: NodeId) -> Result<()> {
        let extra = (max_node as usize + 1).saturating_sub(self.parents.len());
        if extra == 0 {
            return Ok(());
        }
        let too_large = |_: TryReserveError| ConstructionError::IdRangeTooLarge(max_node);
        self.parents.try_reserve(extra).map_err(too_large)?;
        self.subtree_sizes.try_reserve(extra).map_err(too_large)?;
        self.coords.try_reserve(extra).map_err(too_large)?;
        Ok(())
    }

    fn grow_ids(&mut self, node: NodeId) {
        let len = node as usize + 1;
        if len > self.parents.len() {
            self.parents.resize(len, UNDEF);
            self.subtree_sizes.resize(len, 0);
            self.coords.resize(len, 0);
        }
    }

    /// Adds `amount` to the size of `from` and of each of its ancestors.
    fn add_to_ancestors(&mut self, from: NodeId, amount: u64) {
        let mut node = from as usize;
        loop {
            self.subtree_sizes[node] += amount;
            let parent = self.parents[node] as usize;
            if parent == node {
                break;
            }
            node = parent;
        }
    }

    fn finish_edit(&mut self, summary: EditSummary) -> Result<EditSummary> {
        if summary.script.is_empty() {
            return Ok(summary);
        }
        info!(
            added = summary.added.len(),
            moved = summary.moved.len(),
            deleted = summary.deleted.len(),
            ops = summary.script.len(),
            "tree edited"
        );
        if self.filename.is_some() {
            self.sync_attributes(&summary.script)?;
        } else {
            debug!("no tree filename set, attribute files not updated");
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::EditOp;
    use crate::tests::example_tree;

    fn construction_error<T: std::fmt::Debug>(result: Result<T>) -> ConstructionError {
        match result {
            Err(Error::Construction(e)) => e,
            other => panic!("expected a construction error, got {other:?}"),
        }
    }

    /// Every live node sits at its coordinate and inside its parent's block,
    /// and every block fits inside its parent's block.
    fn assert_consistent(t: &Tree) {
        for (pos, slot) in t.treedata.iter().enumerate().skip(1) {
            if let Some(id) = slot.id() {
                assert_eq!(t.coords[id as usize] as usize, pos, "coord of {id}");
                let parent = t.parents[id as usize];
                if id != t.root_id {
                    assert!(t.is_in_subtree(id, parent).unwrap(), "{id} outside {parent}");
                    let (c, pc) = (t.coords[id as usize], t.coords[parent as usize]);
                    let end = c + t.subtree_sizes[id as usize];
                    let pend = pc + t.subtree_sizes[parent as usize];
                    assert!(pc < c && end <= pend, "block of {id} escapes {parent}");
                }
            }
        }
        assert_eq!(t.subtree_sizes[t.root_id as usize] as usize, t.tree_size());
    }

    #[test]
    fn test_insert_leaf() {
        let mut t = example_tree();
        let summary = t.insert_node(5, 3).unwrap();
        assert_eq!(summary.added, vec![5]);
        assert_eq!(summary.script.ops(), &[EditOp::Insert { pos: 5 }]);
        assert_eq!(t.subtree_ids(1).unwrap(), vec![1, 2, 4, 3, 5]);
        assert_eq!(t.subtree_ids(3).unwrap(), vec![3, 5]);
        assert_eq!(t.get_subtree_size(1).unwrap(), 5);
        assert_eq!(t.get_subtree_size(3).unwrap(), 2);
        assert_consistent(&t);
    }

    #[test]
    fn test_insert_becomes_first_child() {
        let mut t = example_tree();
        t.insert_node(9, 1).unwrap();
        assert_eq!(t.subtree_ids(1).unwrap(), vec![1, 9, 2, 4, 3]);
        assert_eq!(t.max_id(), 9);
        assert_eq!(t.get_treedata_coord(4).unwrap(), 4);
        assert_consistent(&t);
    }

    #[test]
    fn test_add_nodes_with_pending_parents() {
        let mut t = example_tree();
        // 7 waits for 6, which waits for 5.
        let summary = t
            .add_nodes([(7, 6), (6, 5), (5, 4)], &AddOptions::default())
            .unwrap();
        assert_eq!(summary.added, vec![5, 6, 7]);
        assert_eq!(t.subtree_ids(2).unwrap(), vec![2, 4, 5, 6, 7]);
        assert_eq!(t.get_subtree_size(2).unwrap(), 5);
        assert_consistent(&t);
    }

    #[test]
    fn test_add_nodes_unresolved_parent() {
        let mut t = example_tree();
        let before = t.clone();
        let e = construction_error(t.add_nodes([(5, 1), (6, 42)], &AddOptions::default()));
        assert_eq!(e, ConstructionError::UnresolvedParents(vec![42]));
        assert_eq!(t.treedata, before.treedata);
        assert_eq!(t.coords, before.coords);
    }

    #[test]
    fn test_add_nodes_rejects_existing() {
        let mut t = example_tree();
        let e = construction_error(t.add_nodes([(4, 3)], &AddOptions::default()));
        assert_eq!(e, ConstructionError::NodeExists { node: 4, parent: 2 });
        let e = construction_error(t.add_nodes([(1, 1)], &AddOptions::default()));
        assert_eq!(e, ConstructionError::RootExists(1));
        let e = construction_error(t.add_nodes([(5, 5)], &AddOptions::default()));
        assert_eq!(e, ConstructionError::MultipleRoots { first: 1, second: 5 });
        let e = construction_error(t.add_nodes([(5, 1), (5, 2)], &AddOptions::default()));
        assert_eq!(e, ConstructionError::DuplicateNode(5));
        let e = construction_error(t.add_nodes([(5, 6), (6, 5)], &AddOptions::default()));
        assert_eq!(e, ConstructionError::UnresolvedParents(vec![5, 6]));
    }

    #[test]
    fn test_insert_unallocatable_id() {
        let mut t = example_tree();
        let huge = 1u64 << 61;
        let e = construction_error(t.insert_node(huge, 1));
        assert_eq!(e, ConstructionError::IdRangeTooLarge(huge));
        assert_eq!(t.max_id(), 4);
        assert_eq!(t.subtree_ids(1).unwrap(), vec![1, 2, 4, 3]);
    }

    #[test]
    fn test_readd_deleted_node() {
        let mut t = example_tree();
        t.delete_subtree(4).unwrap();
        assert!(matches!(
            t.add_nodes([(4, 3)], &AddOptions::default()),
            Err(Error::DeletedNode(4))
        ));

        let options = AddOptions {
            allow_deleted: true,
        };
        t.add_nodes([(4, 3)], &options).unwrap();
        assert_eq!(t.subtree_ids(1).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(t.get_parent(4).unwrap(), 3);
        assert_eq!(t.get_subtree_size(2).unwrap(), 2);
        assert_consistent(&t);
    }

    #[test]
    fn test_insert_missing_parent() {
        let mut t = example_tree();
        assert!(matches!(t.insert_node(5, 77), Err(Error::NodeNotFound(77))));
        t.delete_subtree(4).unwrap();
        assert!(matches!(t.insert_node(5, 4), Err(Error::DeletedNode(4))));
    }

    #[test]
    fn test_delete() {
        let mut t = example_tree();
        let summary = t.delete_subtree(2).unwrap();
        assert_eq!(summary.deleted, vec![2, 4]);
        assert_eq!(
            summary.script.ops(),
            &[EditOp::Delete { pos: 2 }, EditOp::Delete { pos: 3 }]
        );
        assert_eq!(t.subtree_ids(1).unwrap(), vec![1, 3]);
        assert_eq!(t.get_subtree_size(1).unwrap(), 4);
        assert_eq!(t.get_subtree_size(2).unwrap(), 2);

        let again = t.delete_subtree(2).unwrap();
        assert!(again.is_empty());
        assert!(matches!(t.delete_subtree(99), Err(Error::NodeNotFound(99))));
        assert!(t.delete_subtree(1).is_err());
    }

    #[test]
    fn test_delete_worked_example() {
        let mut t = example_tree();
        t.delete_subtree(4).unwrap();
        assert_eq!(t.subtree_ids_with(1, false).unwrap(), vec![Some(1), Some(2), Some(3)]);
        assert_eq!(t.subtree_sizes[2], 2);
    }

    #[test]
    fn test_move() {
        let mut t = example_tree();
        let summary = t.move_subtree(2, 3).unwrap();
        assert_eq!(summary.moved, vec![2]);
        assert_eq!(
            summary.script.ops(),
            &[
                EditOp::Insert { pos: 5 },
                EditOp::Insert { pos: 5 },
                EditOp::Copy { src: 2, dst: 5 },
                EditOp::Delete { pos: 2 },
                EditOp::Copy { src: 3, dst: 6 },
                EditOp::Delete { pos: 3 },
            ]
        );
        assert_eq!(t.subtree_ids(1).unwrap(), vec![1, 3, 2, 4]);
        assert_eq!(t.subtree_ids(3).unwrap(), vec![3, 2, 4]);
        assert_eq!(t.get_parent(2).unwrap(), 3);
        assert_eq!(t.get_subtree_size(3).unwrap(), 3);
        // Old ancestors keep the vacated capacity.
        assert_eq!(t.get_subtree_size(1).unwrap(), 6);
        assert_eq!(t.tree_size(), 6);
        assert_consistent(&t);
    }

    #[test]
    fn test_move_before_old_position() {
        let mut t = Tree::construct([(1, 1), (2, 1), (3, 1), (4, 3), (5, 4)]).unwrap();
        assert_eq!(t.subtree_ids(1).unwrap(), vec![1, 2, 3, 4, 5]);
        t.move_subtree(4, 2).unwrap();
        assert_eq!(t.subtree_ids(1).unwrap(), vec![1, 2, 4, 5, 3]);
        assert_eq!(t.subtree_ids(2).unwrap(), vec![2, 4, 5]);
        assert_eq!(t.subtree_ids(3).unwrap(), vec![3]);
        assert_consistent(&t);
    }

    #[test]
    fn test_move_guards() {
        let mut t = example_tree();
        assert_eq!(construction_error(t.move_subtree(1, 3)), ConstructionError::MoveRoot);
        assert_eq!(
            construction_error(t.move_subtree(2, 4)),
            ConstructionError::MoveIntoOwnSubtree { node: 2, new_parent: 4 }
        );
        assert_eq!(
            construction_error(t.move_subtree(2, 2)),
            ConstructionError::MoveIntoOwnSubtree { node: 2, new_parent: 2 }
        );
        assert!(t.move_subtree(4, 2).unwrap().is_empty());
        assert!(matches!(t.move_subtree(2, 99), Err(Error::NodeNotFound(99))));
        assert!(matches!(t.move_subtree(99, 2), Err(Error::NodeNotFound(99))));
    }

    #[test]
    fn test_update() {
        let mut t = example_tree();
        // 4 moves under 3, 2 disappears, 5 is new under 4.
        let summary = t.update([(1, 1), (3, 1), (4, 3), (5, 4)]).unwrap();
        assert_eq!(summary.moved, vec![4]);
        assert_eq!(summary.added, vec![5]);
        assert_eq!(summary.deleted, vec![2]);
        assert_eq!(t.subtree_ids(1).unwrap(), vec![1, 3, 4, 5]);
        assert_eq!(t.get_parent(4).unwrap(), 3);
        assert_consistent(&t);
    }

    #[test]
    fn test_update_swaps_parent_and_child() {
        let mut t = example_tree();
        // 2 becomes a child of 4, which was 2's child.
        t.update([(1, 1), (4, 1), (2, 4), (3, 1)]).unwrap();
        assert_eq!(t.get_parent(2).unwrap(), 4);
        assert_eq!(t.get_parent(4).unwrap(), 1);
        let mut ids = t.subtree_ids(1).unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(t.subtree_ids(4).unwrap(), vec![4, 2]);
        assert_consistent(&t);
    }

    #[test]
    fn test_update_validates_first() {
        let mut t = example_tree();
        let before = t.clone();
        let e = construction_error(t.update([(9, 9), (2, 9)]));
        assert_eq!(e, ConstructionError::RootChanged { old: 1, new: 9 });
        let e = construction_error(t.update([(1, 1), (2, 1), (4, 8)]));
        assert_eq!(e, ConstructionError::DanglingParent { node: 4, parent: 8 });
        assert_eq!(t.treedata, before.treedata);
    }

    #[test]
    fn test_update_unchanged_is_empty() {
        let mut t = example_tree();
        let summary = t.update([(1, 1), (2, 1), (3, 1), (4, 2)]).unwrap();
        assert!(summary.is_empty());
    }

    #[test]
    fn test_reset_without_filename() {
        let mut t = example_tree();
        t.reset([(1, 1), (5, 1)]).unwrap();
        assert_eq!(t.subtree_ids(1).unwrap(), vec![1, 5]);
        assert_eq!(t.tree_size(), 2);
    }
}
