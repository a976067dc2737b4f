//! # subtree-index
//!
//! Subtree extraction in O(subtree size) for large, singly-rooted trees
//! (taxonomies with millions of nodes), without scanning the tree and without
//! a database.
//!
//! Nodes are laid out in depth-first preorder in one flat array, so that every
//! subtree occupies one contiguous block. Four parallel arrays make up the
//! index:
//!
//! - `parents[v]`: parent of `v` (`parents[root] == root`, `UNDEF` if unused)
//! - `subtree_sizes[v]`: reserved length of `v`'s block, `v` included
//! - `coords[v]`: 1-based position of `v` in the depth-first array (0 = not placed)
//! - `treedata[p]`: the node at position `p` (slot 0 is a dummy)
//!
//! Per-node attribute values live in side files with one line per position,
//! kept aligned with the index by replaying the edit script that every
//! structural edit emits.
//!
//! ## Example
//!
//! ```rust
//! use subtree_index::Tree;
//!
//! let tree = Tree::construct([(1, 1), (2, 1), (3, 1), (4, 2)]).unwrap();
//! assert_eq!(tree.subtree_ids(1).unwrap(), vec![1, 2, 4, 3]);
//! assert_eq!(tree.subtree_ids(2).unwrap(), vec![2, 4]);
//! ```
//!
//! ## Concurrency
//!
//! A `Tree` is owned by a single writer. Tree files and attribute files are
//! ordinary files without locking; concurrent writers to the same files must
//! be serialized by the caller.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

pub mod attr;
pub mod build;
pub mod cast;
pub mod edit;
pub mod error;
pub mod query;
pub mod script;
pub mod slot;
pub mod source;
mod store;

#[cfg(test)]
mod proptests;

pub use attr::AttributeValues;
pub use build::BuildOptions;
pub use cast::{group_values, Cast};
pub use edit::{AddOptions, EditSummary};
pub use error::{ConstructionError, Error, Result};
pub use query::{InfoOptions, SubtreeInfo};
pub use script::{EditOp, EditScript, LineStore};
pub use slot::NodeSlot;
pub use source::{AttributeSource, IdSource, TabularFormat, TabularIds, TabularValues};

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::slot::Slot;

/// Node identifier; used directly as an array index.
pub type NodeId = u64;

// =============================================================================
// Configuration
// =============================================================================

/// Marker for unassigned `parents` slots and, in tree files, for empty and
/// deleted positions.
pub const UNDEF: u64 = u64::MAX;

/// Position of the root in the depth-first array.
pub const ROOT_COORD: usize = 1;

/// Largest accepted node id; the ids above it are reserved for sentinels.
pub const MAX_NODE_ID: NodeId = UNDEF - 2;

// =============================================================================
// Tree
// =============================================================================

/// Depth-first positional index over a singly-rooted tree.
#[derive(Clone, Debug)]
pub struct Tree {
    /// Parent of each id (`UNDEF` if unused).
    pub(crate) parents: Vec<u64>,
    /// Reserved block length of each id (capacity, not live count).
    pub(crate) subtree_sizes: Vec<u64>,
    /// Position of each id in `treedata` (0 = not placed).
    pub(crate) coords: Vec<u64>,
    /// Depth-first array; `treedata[0]` is the dummy slot.
    pub(crate) treedata: Vec<Slot>,
    pub(crate) root_id: NodeId,
    /// Tree file path; attribute files are stored next to it.
    pub(crate) filename: Option<PathBuf>,
}

/// Size and memory statistics for a tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TreeStats {
    /// Largest id the id-indexed arrays can hold.
    pub max_id: NodeId,
    /// Number of positions in the depth-first array (slot 0 excluded).
    pub tree_size: usize,
    /// Positions holding a live node.
    pub live_nodes: usize,
    /// Positions holding a tombstone.
    pub tombstones: usize,
    /// Approximate heap bytes used by the four arrays.
    pub memory_bytes: usize,
}

impl Tree {
    #[inline]
    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    /// Largest id covered by the id-indexed arrays.
    #[inline]
    pub fn max_id(&self) -> NodeId {
        self.parents.len().saturating_sub(1) as NodeId
    }

    /// Number of positions in the depth-first array, tombstones included.
    #[inline]
    pub fn tree_size(&self) -> usize {
        self.treedata.len() - 1
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    /// Associates the tree with a file path without writing anything.
    ///
    /// Attribute operations look for their files next to this path.
    pub fn set_filename(&mut self, path: impl Into<PathBuf>) {
        self.filename = Some(path.into());
    }

    pub fn parents(&self) -> &[u64] {
        &self.parents
    }

    pub fn subtree_sizes(&self) -> &[u64] {
        &self.subtree_sizes
    }

    pub fn coords(&self) -> &[u64] {
        &self.coords
    }

    /// The depth-first array, slot 0 included.
    pub fn treedata(&self) -> impl Iterator<Item = NodeSlot> + '_ {
        self.treedata.iter().map(|s| s.kind())
    }

    pub fn stats(&self) -> TreeStats {
        let tombstones = self.treedata.iter().filter(|s| s.is_tombstone()).count();
        let tree_size = self.tree_size();
        TreeStats {
            max_id: self.max_id(),
            tree_size,
            live_nodes: tree_size - tombstones,
            tombstones,
            memory_bytes: self.memory_usage(),
        }
    }

    pub fn memory_usage(&self) -> usize {
        (self.parents.capacity()
            + self.subtree_sizes.capacity()
            + self.coords.capacity()
            + self.treedata.capacity())
            * std::mem::size_of::<u64>()
    }

    pub fn shrink_to_fit(&mut self) {
        self.parents.shrink_to_fit();
        self.subtree_sizes.shrink_to_fit();
        self.coords.shrink_to_fit();
        self.treedata.shrink_to_fit();
    }

    // -------------------------------------------------------------------------
    // Lookup helpers shared by the query and edit engines
    // -------------------------------------------------------------------------

    /// Position of `node`, which must be in range and placed.
    #[inline]
    pub(crate) fn placed_coord(&self, node: NodeId) -> Result<usize> {
        match self.coords.get(node as usize) {
            Some(&c) if c > 0 => Ok(c as usize),
            _ => Err(Error::NodeNotFound(node)),
        }
    }

    /// Position of `node`, which must be placed and not deleted.
    #[inline]
    pub(crate) fn live_coord(&self, node: NodeId) -> Result<usize> {
        let c = self.placed_coord(node)?;
        if self.treedata[c].id() == Some(node) {
            Ok(c)
        } else {
            Err(Error::DeletedNode(node))
        }
    }

    #[inline]
    pub(crate) fn is_live(&self, node: NodeId) -> bool {
        self.live_coord(node).is_ok()
    }

    /// Range of positions reserved for the subtree whose root is at `coord`.
    #[inline]
    pub(crate) fn block(&self, node: NodeId, coord: usize) -> std::ops::Range<usize> {
        coord..coord + self.subtree_sizes[node as usize] as usize
    }
}
