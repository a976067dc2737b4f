//! Binary tree files.
//!
//! Layout (all integers little-endian `u64`):
//!
//! ```text
//! [len(subtree_sizes)][len(treedata)][len(parents)]
//! [subtree_sizes...][coords...][treedata...][parents...]
//! ```
//!
//! `coords` has the same length as `subtree_sizes`. Empty and deleted
//! positions of `treedata` are both written as `UNDEF`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;
use tracing::{debug, info};

use crate::attr::{remove_attribute_files, same_tree_file};
use crate::error::{Error, Result};
use crate::slot::Slot;
use crate::{Tree, ROOT_COORD};

const WORD: usize = std::mem::size_of::<u64>();
const HEADER_WORDS: usize = 3;

impl Tree {
    /// Writes the index to `path` and associates the tree with it.
    ///
    /// When `path` is not the current filename, attribute files found next to
    /// it belong to a different tree and are removed.
    pub fn to_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !self.filename.as_deref().is_some_and(|own| same_tree_file(own, path)) {
            remove_attribute_files(path)?;
        }
        debug!(path = %path.display(), "writing tree file");
        let mut out = BufWriter::new(File::create(path)?);

        for len in [
            self.subtree_sizes.len(),
            self.treedata.len(),
            self.parents.len(),
        ] {
            out.write_all(&(len as u64).to_le_bytes())?;
        }
        write_words(&mut out, self.subtree_sizes.iter().copied())?;
        write_words(&mut out, self.coords.iter().copied())?;
        write_words(&mut out, self.treedata.iter().map(|s| s.to_raw()))?;
        write_words(&mut out, self.parents.iter().copied())?;
        out.flush()?;

        self.filename = Some(path.to_path_buf());
        info!(path = %path.display(), nodes = self.tree_size(), "tree written");
        Ok(())
    }

    /// Loads a tree written by [`Tree::to_file`] and associates it with `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "reading tree file");
        let file = File::open(path)?;
        if file.metadata()?.len() < (HEADER_WORDS * WORD) as u64 {
            return Err(Error::InvalidFormat("file shorter than its header".into()));
        }
        // SAFETY: the map is read-only and dropped before returning; the file
        // is assumed not to be modified concurrently (single writer per tree).
        let map = unsafe { Mmap::map(&file)? };
        let mut tree = decode(&map)?;
        tree.filename = Some(path.to_path_buf());
        info!(path = %path.display(), nodes = tree.tree_size(), "tree loaded");
        Ok(tree)
    }
}

fn write_words(out: &mut impl Write, words: impl Iterator<Item = u64>) -> Result<()> {
    for w in words {
        out.write_all(&w.to_le_bytes())?;
    }
    Ok(())
}

struct Words<'a> {
    bytes: &'a [u8],
}

impl<'a> Words<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<impl Iterator<Item = u64> + 'a> {
        let len = n
            .checked_mul(WORD)
            .filter(|&len| len <= self.bytes.len())
            .ok_or_else(|| Error::InvalidFormat(format!("truncated {what} array")))?;
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(head.chunks_exact(WORD).map(|c| {
            let mut word = [0u8; WORD];
            word.copy_from_slice(c);
            u64::from_le_bytes(word)
        }))
    }
}

fn decode(bytes: &[u8]) -> Result<Tree> {
    let mut words = Words { bytes };
    let header: Vec<u64> = words.take(HEADER_WORDS, "header")?.collect();
    let (n_ids, n_positions, n_parents) = (header[0] as usize, header[1] as usize, header[2] as usize);

    let subtree_sizes: Vec<u64> = words.take(n_ids, "subtree sizes")?.collect();
    let coords: Vec<u64> = words.take(n_ids, "coords")?.collect();
    let treedata: Vec<Slot> = words
        .take(n_positions, "treedata")?
        .enumerate()
        .map(|(pos, raw)| Slot::from_raw(pos, raw))
        .collect();
    let parents: Vec<u64> = words.take(n_parents, "parents")?.collect();

    if !words.bytes.is_empty() {
        return Err(Error::InvalidFormat(format!(
            "{} trailing bytes",
            words.bytes.len()
        )));
    }
    if n_parents != n_ids {
        return Err(Error::InvalidFormat(format!(
            "{n_ids} subtree sizes but {n_parents} parents"
        )));
    }
    let root_id = treedata
        .get(ROOT_COORD)
        .and_then(|s| s.id())
        .ok_or_else(|| Error::InvalidFormat("no root in the first position".into()))?;
    if parents.get(root_id as usize) != Some(&root_id) {
        return Err(Error::InvalidFormat(format!(
            "root {root_id} is not its own parent"
        )));
    }

    let t = Tree {
        parents,
        subtree_sizes,
        coords,
        treedata,
        root_id,
        filename: None,
    };
    check_contents(&t)?;
    Ok(t)
}

/// Checks the cross-references between the arrays, so that lookups on a
/// loaded tree stay in bounds.
fn check_contents(t: &Tree) -> Result<()> {
    let n_ids = t.parents.len() as u64;
    let n_positions = t.treedata.len() as u64;
    let invalid = |msg: String| Err(Error::InvalidFormat(msg));

    for (pos, slot) in t.treedata.iter().enumerate().skip(1) {
        if let Some(id) = slot.id() {
            if id >= n_ids || t.coords[id as usize] != pos as u64 {
                return invalid(format!("position {pos} holds {id}, which is not placed there"));
            }
        }
    }
    for (id, &coord) in t.coords.iter().enumerate() {
        if coord == 0 {
            continue;
        }
        let size = t.subtree_sizes[id];
        if coord >= n_positions || size == 0 || size > n_positions - coord {
            return invalid(format!(
                "block of {id} at {coord} with size {size} does not fit {n_positions} positions"
            ));
        }
        if t.treedata[coord as usize].id().is_some_and(|held| held != id as u64) {
            return invalid(format!("{id} is placed at position {coord} of another node"));
        }
        if t.parents[id] >= n_ids {
            return invalid(format!("{id} has parent {} out of range", t.parents[id]));
        }
    }
    if t.subtree_sizes[t.root_id as usize] != n_positions - ROOT_COORD as u64 {
        return invalid(format!("root block does not cover the {n_positions} positions"));
    }

    // Live blocks nest strictly inside their parent's, which also rules out
    // cycles in `parents`.
    for (pos, slot) in t.treedata.iter().enumerate().skip(ROOT_COORD + 1) {
        let Some(id) = slot.id() else {
            continue;
        };
        let parent = t.parents[id as usize];
        let inside = t.live_coord(parent).is_ok_and(|pc| {
            pc < pos && t.block(id, pos).end <= t.block(parent, pc).end
        });
        if !inside {
            return invalid(format!("block of {id} is not inside the block of its parent {parent}"));
        }
    }
    Ok(())
}
