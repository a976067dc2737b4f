//! Query engine: O(1) metadata lookups and O(k) subtree slices.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::slot::Slot;
use crate::{NodeId, NodeSlot, Tree};

/// Columns to include in [`Tree::subtree_info`].
#[derive(Debug, Clone, Default)]
pub struct InfoOptions {
    pub include_subtree_sizes: bool,
    pub include_parents: bool,
    /// Keep rows for deleted positions (`None` ids) so that rows stay aligned
    /// with attribute file lines.
    pub include_deleted: bool,
    /// Log how many nodes carry each attribute.
    pub show_stats: bool,
}

/// Column-oriented report of one subtree, in depth-first order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubtreeInfo {
    pub node_ids: Vec<Option<NodeId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtree_sizes: Option<Vec<Option<u64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<Option<NodeId>>>,
    pub attributes: BTreeMap<String, Vec<Option<Vec<Value>>>>,
}

impl SubtreeInfo {
    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }
}

impl Tree {
    /// Reserved block length of `node`'s subtree, `node` and tombstones included.
    pub fn get_subtree_size(&self, node: NodeId) -> Result<u64> {
        self.placed_coord(node)?;
        Ok(self.subtree_sizes[node as usize])
    }

    /// 1-based position of `node` in the depth-first array.
    pub fn get_treedata_coord(&self, node: NodeId) -> Result<usize> {
        self.placed_coord(node)
    }

    pub fn get_parent(&self, node: NodeId) -> Result<NodeId> {
        self.placed_coord(node)?;
        Ok(self.parents[node as usize])
    }

    /// True if `node` is placed and not deleted.
    pub fn contains(&self, node: NodeId) -> bool {
        self.is_live(node)
    }

    /// True if `node` lies in the block reserved for `subtree_root`.
    pub fn is_in_subtree(&self, node: NodeId, subtree_root: NodeId) -> Result<bool> {
        let root_coord = self.placed_coord(subtree_root)?;
        let coord = self.placed_coord(node)?;
        Ok(self.block(subtree_root, root_coord).contains(&coord))
    }

    /// The raw block of `subtree_root`, deleted positions included.
    ///
    /// The iterator is lazy and can be cloned to restart it.
    pub fn get_subtree_data(
        &self,
        subtree_root: NodeId,
    ) -> Result<impl Iterator<Item = NodeSlot> + Clone + '_> {
        Ok(self.subtree_block(subtree_root)?.iter().map(|s| s.kind()))
    }

    /// Live ids of the subtree in depth-first preorder.
    pub fn subtree_ids(&self, subtree_root: NodeId) -> Result<Vec<NodeId>> {
        let block = self.subtree_block(subtree_root)?;
        let ids: Vec<NodeId> = block.iter().filter_map(|s| s.id()).collect();
        debug!(
            root = subtree_root,
            reserved = block.len(),
            live = ids.len(),
            "subtree query"
        );
        Ok(ids)
    }

    /// Like [`Tree::subtree_ids`]; with `include_deleted`, deleted positions
    /// are kept as `None`.
    pub fn subtree_ids_with(
        &self,
        subtree_root: NodeId,
        include_deleted: bool,
    ) -> Result<Vec<Option<NodeId>>> {
        let block = self.subtree_block(subtree_root)?;
        Ok(block
            .iter()
            .map(|s| s.id())
            .filter(|id| include_deleted || id.is_some())
            .collect())
    }

    /// Joins the subtree's ids with the requested columns and attributes.
    pub fn subtree_info(
        &self,
        subtree_root: NodeId,
        attributes: &[&str],
        options: &InfoOptions,
    ) -> Result<SubtreeInfo> {
        let node_ids = self.subtree_ids_with(subtree_root, true)?;
        let column = |f: &dyn Fn(usize) -> u64| -> Vec<Option<u64>> {
            node_ids.iter().map(|id| id.map(|v| f(v as usize))).collect()
        };

        let mut info = SubtreeInfo {
            subtree_sizes: options
                .include_subtree_sizes
                .then(|| column(&|v| self.subtree_sizes[v])),
            parents: options
                .include_parents
                .then(|| column(&|v| self.parents[v])),
            attributes: if attributes.is_empty() {
                BTreeMap::new()
            } else {
                self.query_attributes(subtree_root, attributes, options.show_stats)?
            },
            node_ids,
        };

        if !options.include_deleted {
            let keep: Vec<bool> = info.node_ids.iter().map(Option::is_some).collect();
            retain_rows(&mut info.node_ids, &keep);
            if let Some(col) = info.subtree_sizes.as_mut() {
                retain_rows(col, &keep);
            }
            if let Some(col) = info.parents.as_mut() {
                retain_rows(col, &keep);
            }
            for col in info.attributes.values_mut() {
                retain_rows(col, &keep);
            }
        }
        Ok(info)
    }

    fn subtree_block(&self, subtree_root: NodeId) -> Result<&[Slot]> {
        let coord = self.placed_coord(subtree_root)?;
        let block = self.block(subtree_root, coord);
        self.treedata
            .get(block)
            .ok_or_else(|| {
                Error::InvalidFormat(format!(
                    "block of node {subtree_root} runs past the end of the tree"
                ))
            })
    }
}

fn retain_rows<T>(rows: &mut Vec<T>, keep: &[bool]) {
    let mut i = 0;
    rows.retain(|_| {
        let k = keep.get(i).copied().unwrap_or(false);
        i += 1;
        k
    });
}
