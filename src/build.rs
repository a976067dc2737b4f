//! Construction engine: turns an `(id, parent)` stream into the index arrays.
//!
//! Four passes:
//!
//! 1. parents: grow `parents[]` on demand, reject duplicates and extra roots
//! 2. validation (optional): every ancestor chain must reach the root
//! 3. subtree sizes: every node adds 1 to itself and each of its ancestors;
//!    optionally split over worker partitions and summed afterwards
//! 4. layout: one linear pass with a per-node bump cursor places each node
//!    right after the blocks reserved for its earlier siblings

use std::collections::TryReserveError;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::path::Path;

use rayon::prelude::*;
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::error::{ConstructionError, Result};
use crate::slot::Slot;
use crate::source::{IdSource, TabularFormat, TabularIds};
use crate::{NodeId, Tree, MAX_NODE_ID, ROOT_COORD, UNDEF};

/// Options for [`Tree::construct_with`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Number of partitions for the subtree-size pass (1 = sequential).
    pub workers: usize,
    /// Check every ancestor chain before sizing.
    pub validate: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            validate: true,
        }
    }
}

impl BuildOptions {
    pub fn sequential() -> Self {
        Self {
            workers: 1,
            ..Self::default()
        }
    }
}

impl Tree {
    /// Builds a tree from `(id, parent)` pairs; `id == parent` marks the root.
    pub fn construct<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (NodeId, NodeId)>,
    {
        Self::construct_with(pairs, &BuildOptions::default())
    }

    pub fn construct_with<I>(pairs: I, options: &BuildOptions) -> Result<Self>
    where
        I: IntoIterator<Item = (NodeId, NodeId)>,
    {
        let (parents, root_id) = compute_parents(pairs)?;
        Ok(Self::from_parents(parents, root_id, options)?)
    }

    /// Builds a tree from any [`IdSource`]; read errors abort construction.
    pub fn construct_from_source<S: IdSource>(source: S, options: &BuildOptions) -> Result<Self> {
        let mut failure = None;
        let pairs = source.pairs().map_while(|item| match item {
            Ok(pair) => Some(pair),
            Err(e) => {
                failure = Some(e);
                None
            }
        });
        let parsed = compute_parents(pairs);
        if let Some(e) = failure {
            return Err(e);
        }
        let (parents, root_id) = parsed?;
        Ok(Self::from_parents(parents, root_id, options)?)
    }

    /// Builds a tree from a delimited text file of id/parent columns.
    pub fn construct_from_tabular(path: impl AsRef<Path>, format: &TabularFormat) -> Result<Self> {
        let source = TabularIds::open(path, format.clone())?;
        Self::construct_from_source(source, &BuildOptions::default())
    }

    /// Rebuilds the index arrays from a complete parents table.
    pub(crate) fn from_parents(
        parents: Vec<u64>,
        root_id: NodeId,
        options: &BuildOptions,
    ) -> std::result::Result<Self, ConstructionError> {
        if options.validate {
            debug!(ids = parents.len(), "validating parents table");
            validate_parents(&parents, root_id)?;
        }

        debug!(workers = options.workers, "computing subtree sizes");
        let subtree_sizes = compute_subtree_sizes(&parents, root_id, options.workers)?;

        debug!("computing depth-first layout");
        let (treedata, coords) = compute_layout(&parents, &subtree_sizes, root_id);

        info!(
            root = root_id,
            nodes = treedata.len() - 1,
            "tree constructed"
        );
        Ok(Self {
            parents,
            subtree_sizes,
            coords,
            treedata,
            root_id,
            filename: None,
        })
    }
}

// =============================================================================
// Parents pass
// =============================================================================

pub(crate) fn check_id(id: NodeId) -> std::result::Result<(), ConstructionError> {
    if id > MAX_NODE_ID {
        Err(ConstructionError::InvalidId(id))
    } else {
        Ok(())
    }
}

/// Grows `table` to `len` entries of `fill`, failing instead of aborting when
/// the allocation is impossible.
pub(crate) fn try_grow(
    table: &mut Vec<u64>,
    len: usize,
    fill: u64,
) -> std::result::Result<(), TryReserveError> {
    if len > table.len() {
        table.try_reserve(len - table.len())?;
        table.resize(len, fill);
    }
    Ok(())
}

pub(crate) fn compute_parents<I>(
    pairs: I,
) -> std::result::Result<(Vec<u64>, NodeId), ConstructionError>
where
    I: IntoIterator<Item = (NodeId, NodeId)>,
{
    let mut parents: Vec<u64> = Vec::new();
    let mut root: Option<NodeId> = None;

    for (node, parent) in pairs {
        check_id(node)?;
        check_id(parent)?;

        let idx = node as usize;
        try_grow(&mut parents, idx + 1, UNDEF)
            .map_err(|_| ConstructionError::IdRangeTooLarge(node))?;
        if parents[idx] != UNDEF {
            return Err(ConstructionError::DuplicateNode(node));
        }
        if node == parent {
            if let Some(first) = root {
                return Err(ConstructionError::MultipleRoots {
                    first,
                    second: node,
                });
            }
            root = Some(node);
        }
        parents[idx] = parent;
    }

    let root = root.ok_or(ConstructionError::MissingRoot)?;
    Ok((parents, root))
}

// =============================================================================
// Validation pass
// =============================================================================

const UNVISITED: u8 = 0;
const ON_PATH: u8 = 1;
const REACHES_ROOT: u8 = 2;

/// Fails on the first parent that is out of range, unassigned, or part of a
/// cycle. Each node is walked at most once.
pub(crate) fn validate_parents(parents: &[u64], root: NodeId) -> std::result::Result<(), ConstructionError> {
    let mut state = vec![UNVISITED; parents.len()];
    state[root as usize] = REACHES_ROOT;
    let mut path: Vec<usize> = Vec::new();

    for start in 0..parents.len() {
        if parents[start] == UNDEF || state[start] != UNVISITED {
            continue;
        }
        let mut node = start;
        loop {
            match state[node] {
                REACHES_ROOT => break,
                ON_PATH => return Err(ConstructionError::Cycle(start as NodeId)),
                _ => {}
            }
            state[node] = ON_PATH;
            path.push(node);

            let parent = parents[node];
            match parents.get(parent as usize) {
                Some(&p) if p != UNDEF => node = parent as usize,
                _ => {
                    return Err(ConstructionError::DanglingParent {
                        node: node as NodeId,
                        parent,
                    })
                }
            }
        }
        for n in path.drain(..) {
            state[n] = REACHES_ROOT;
        }
    }
    Ok(())
}

// =============================================================================
// Subtree-size pass
// =============================================================================

/// Sizes contributed by the nodes whose ids fall in `starts`.
///
/// Reads the whole parents table but only starts walks inside its own
/// partition, so partitions can run independently.
fn partial_subtree_sizes(
    parents: &[u64],
    root: NodeId,
    starts: Range<usize>,
) -> std::result::Result<Vec<u64>, ConstructionError> {
    let mut sizes = vec![0u64; parents.len()];
    let max_steps = parents.len();

    for start in starts {
        if parents[start] == UNDEF {
            continue;
        }
        let mut node = start;
        let mut steps = 0usize;
        loop {
            sizes[node] += 1;
            if node as NodeId == root {
                break;
            }
            let parent = parents[node];
            match parents.get(parent as usize) {
                Some(&p) if p != UNDEF => {}
                _ => {
                    return Err(ConstructionError::DanglingParent {
                        node: node as NodeId,
                        parent,
                    })
                }
            }
            node = parent as usize;
            steps += 1;
            if steps > max_steps {
                return Err(ConstructionError::Cycle(start as NodeId));
            }
        }
    }
    Ok(sizes)
}

pub(crate) fn compute_subtree_sizes(
    parents: &[u64],
    root: NodeId,
    workers: usize,
) -> std::result::Result<Vec<u64>, ConstructionError> {
    let n = parents.len();
    if workers <= 1 || n < workers {
        return partial_subtree_sizes(parents, root, 0..n);
    }

    let chunk = n.div_ceil(workers);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| ConstructionError::Worker(e.to_string()))?;

    pool.install(|| {
        (0..workers)
            .into_par_iter()
            .map(|w| {
                let start = (w * chunk).min(n);
                let end = (start + chunk).min(n);
                partial_subtree_sizes(parents, root, start..end)
            })
            .try_reduce(
                || vec![0u64; n],
                |mut acc, part| {
                    for (a, p) in acc.iter_mut().zip(part) {
                        *a += p;
                    }
                    Ok(acc)
                },
            )
    })
}

// =============================================================================
// Layout pass
// =============================================================================

/// Places every node in depth-first preorder.
///
/// While placing, `coords[v]` is `v`'s bump cursor: the last position taken
/// inside its block. A child goes right after its parent's cursor and moves
/// it forward by the child's whole subtree size. At the end each cursor sits
/// on the last position of its block, so `coords[v] -= size[v] - 1` turns it
/// into the block start.
fn compute_layout(parents: &[u64], sizes: &[u64], root: NodeId) -> (Vec<Slot>, Vec<u64>) {
    let tree_size = sizes[root as usize] as usize;
    let mut treedata = vec![Slot::EMPTY; tree_size + 1];
    let mut coords = vec![0u64; parents.len()];

    coords[root as usize] = ROOT_COORD as u64;
    treedata[ROOT_COORD] = Slot::node(root);

    // Unplaced prefix of one ancestor chain.
    let mut unplaced: SmallVec<[usize; 64]> = SmallVec::new();

    for start in 0..parents.len() {
        if parents[start] == UNDEF || coords[start] != 0 {
            continue;
        }
        let mut node = start;
        while coords[node] == 0 {
            unplaced.push(node);
            node = parents[node] as usize;
        }
        while let Some(child) = unplaced.pop() {
            let parent = parents[child] as usize;
            let pos = coords[parent] + 1;
            coords[child] = pos;
            treedata[pos as usize] = Slot::node(child as NodeId);
            coords[parent] += sizes[child];
        }
    }

    for (coord, &size) in coords.iter_mut().zip(sizes) {
        if *coord > 0 {
            *coord -= size - 1;
        }
    }
    (treedata, coords)
}
