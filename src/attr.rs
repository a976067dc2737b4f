//! Attribute store: per-node values kept in side files next to the tree file.
//!
//! The values of attribute `name` for tree file `T` live in `T.name.attr`.
//! Line `k` of that file holds the JSON array of values of the node at
//! depth-first position `k + 1`, or `null` if the position is deleted or the
//! node has no values. A subtree query is therefore a contiguous range of
//! lines, and every structural edit is mirrored by replaying its
//! [`EditScript`] on each attribute file.
//!
//! Files are rewritten through a temporary file in the same directory and
//! renamed into place.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::cast::{group_values, Cast};
use crate::error::{Error, Result};
use crate::script::EditScript;
use crate::source::{TabularFormat, TabularValues};
use crate::{NodeId, Tree};

/// Values of one attribute, keyed by node id.
pub type AttributeValues = HashMap<NodeId, Vec<Value>>;

/// One attribute file line: the values at one position.
pub type AttributeRow = Option<Vec<Value>>;

const ATTR_EXT: &str = "attr";
const NONE_LINE: &str = "null";
const DUMP_EXT: &str = "json";

// =============================================================================
// File naming
// =============================================================================

/// `<tree>.<name>.attr`
pub(crate) fn attribute_path(tree: &Path, name: &str) -> PathBuf {
    let mut path = OsString::from(tree.as_os_str());
    path.push(".");
    path.push(name);
    path.push(".");
    path.push(ATTR_EXT);
    PathBuf::from(path)
}

fn dump_path(attr_file: &Path) -> PathBuf {
    let mut path = OsString::from(attr_file.as_os_str());
    path.push(".");
    path.push(DUMP_EXT);
    PathBuf::from(path)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Whether `a` and `b` name the same tree file, however they are spelled.
///
/// A path that does not exist yet is compared through its canonical
/// directory and file name.
pub(crate) fn same_tree_file(a: &Path, b: &Path) -> bool {
    fn canonical(path: &Path) -> Option<PathBuf> {
        fs::canonicalize(path).ok().or_else(|| {
            let dir = fs::canonicalize(parent_dir(path)).ok()?;
            Some(dir.join(path.file_name()?))
        })
    }
    a == b || matches!((canonical(a), canonical(b)), (Some(x), Some(y)) if x == y)
}

/// Attribute files that belong to the tree file `tree`, by attribute name.
pub(crate) fn existing_attribute_files(tree: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut found = BTreeMap::new();
    let Some(tree_name) = tree.file_name().and_then(|n| n.to_str()) else {
        return Ok(found);
    };
    let prefix = format!("{tree_name}.");
    let suffix = format!(".{ATTR_EXT}");

    let entries = match fs::read_dir(parent_dir(tree)) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name.len() > prefix.len() + suffix.len()
            && file_name.starts_with(&prefix)
            && file_name.ends_with(&suffix)
        {
            let name = &file_name[prefix.len()..file_name.len() - suffix.len()];
            found.insert(name.to_string(), entry.path());
        }
    }
    Ok(found)
}

/// Deletes the attribute files of whatever tree was stored at `tree` before.
pub(crate) fn remove_attribute_files(tree: &Path) -> Result<()> {
    for (name, file) in existing_attribute_files(tree)? {
        info!(attribute = %name, path = %file.display(), "removing obsolete attribute file");
        fs::remove_file(file)?;
    }
    Ok(())
}

// =============================================================================
// Line I/O
// =============================================================================

fn parse_row(line: &str) -> Result<AttributeRow> {
    Ok(serde_json::from_str(line)?)
}

fn read_rows(path: &Path) -> Result<Vec<AttributeRow>> {
    BufReader::new(File::open(path)?)
        .lines()
        .map(|line| parse_row(&line?))
        .collect()
}

fn write_rows<'a>(path: &Path, rows: impl Iterator<Item = Option<&'a Vec<Value>>>) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(parent_dir(path))?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        for row in rows {
            match row {
                Some(values) => serde_json::to_writer(&mut out, values)?,
                None => out.write_all(NONE_LINE.as_bytes())?,
            }
            out.write_all(b"\n")?;
        }
        out.flush()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl Tree {
    fn tree_path(&self) -> Result<&Path> {
        self.filename.as_deref().ok_or(Error::FilenameNotSet)
    }

    /// Path of the file holding attribute `name`, whether or not it exists.
    pub fn attribute_filename(&self, name: &str) -> Result<PathBuf> {
        Ok(attribute_path(self.tree_path()?, name))
    }

    /// Names of the attributes stored for this tree, sorted.
    pub fn list_attributes(&self) -> Result<Vec<String>> {
        Ok(existing_attribute_files(self.tree_path()?)?.into_keys().collect())
    }

    pub fn has_attribute(&self, name: &str) -> Result<bool> {
        Ok(self.attribute_filename(name)?.is_file())
    }

    fn existing_attribute(&self, name: &str) -> Result<PathBuf> {
        let path = self.attribute_filename(name)?;
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::AttributeNotFound(name.to_string()))
        }
    }

    pub fn destroy_attribute(&self, name: &str) -> Result<()> {
        let path = self.existing_attribute(name)?;
        info!(attribute = name, path = %path.display(), "removing attribute file");
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn destroy_all_attributes(&self) -> Result<()> {
        remove_attribute_files(self.tree_path()?)
    }

    // -------------------------------------------------------------------------
    // Whole-attribute reads and writes
    // -------------------------------------------------------------------------

    /// Creates attribute `name`; with `force`, an existing one is replaced.
    pub fn create_attribute(&self, name: &str, values: &AttributeValues, force: bool) -> Result<()> {
        if !force && self.has_attribute(name)? {
            return Err(Error::AttributeCreation(name.to_string()));
        }
        self.save_attribute_values(name, values)
    }

    /// Creates attribute `name` from id/value columns of a text file, casting
    /// every raw value with `cast`.
    pub fn create_attribute_from_tabular(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        format: &TabularFormat,
        cast: Cast,
        force: bool,
    ) -> Result<()> {
        if !force && self.has_attribute(name)? {
            return Err(Error::AttributeCreation(name.to_string()));
        }
        let source = TabularValues::open(path, format.clone())?;
        let values = group_values(source, |raw| cast.apply(&raw))?;
        self.save_attribute_values(name, &values)
    }

    /// Writes one line per position in depth-first order. Values of ids that
    /// are not live in the tree are dropped.
    pub fn save_attribute_values(&self, name: &str, values: &AttributeValues) -> Result<()> {
        let path = self.attribute_filename(name)?;
        debug!(attribute = name, path = %path.display(), "writing attribute file");
        let rows = self.treedata[1..]
            .iter()
            .map(|slot| slot.id().and_then(|id| values.get(&id)));
        write_rows(&path, rows)?;
        info!(attribute = name, nodes = values.len(), "attribute saved");
        Ok(())
    }

    /// Reads attribute `name` back into a map. Live nodes without values are
    /// left out.
    pub fn load_attribute_values(&self, name: &str) -> Result<AttributeValues> {
        let path = self.existing_attribute(name)?;
        let rows = read_rows(&path)?;
        self.check_row_count(name, rows.len())?;

        let mut values = AttributeValues::new();
        for (slot, row) in self.treedata[1..].iter().zip(rows) {
            if let (Some(id), Some(row)) = (slot.id(), row) {
                values.insert(id, row);
            }
        }
        Ok(values)
    }

    fn check_row_count(&self, name: &str, rows: usize) -> Result<()> {
        if rows == self.tree_size() {
            Ok(())
        } else {
            Err(Error::InvalidFormat(format!(
                "attribute '{name}' has {rows} lines for {} tree positions",
                self.tree_size()
            )))
        }
    }

    // -------------------------------------------------------------------------
    // Per-node edits
    // -------------------------------------------------------------------------

    /// Fails on ids that are not live when `strict`; otherwise reports whether
    /// the id should be skipped.
    fn skip_node(&self, node: NodeId, strict: bool) -> Result<bool> {
        match self.live_coord(node) {
            Ok(_) => Ok(false),
            Err(e) if strict => Err(e),
            Err(_) => {
                debug!(node, "skipping attribute values of a node not in the tree");
                Ok(true)
            }
        }
    }

    /// Overwrites the values of the given nodes; other nodes are unchanged.
    pub fn replace_attribute_values(
        &self,
        name: &str,
        new_values: AttributeValues,
        strict: bool,
    ) -> Result<()> {
        let mut values = self.load_attribute_values(name)?;
        for (node, v) in new_values {
            if !self.skip_node(node, strict)? {
                values.insert(node, v);
            }
        }
        self.save_attribute_values(name, &values)
    }

    /// Appends to the values of the given nodes.
    pub fn append_attribute_values(
        &self,
        name: &str,
        new_values: AttributeValues,
        strict: bool,
    ) -> Result<()> {
        let mut values = self.load_attribute_values(name)?;
        for (node, v) in new_values {
            if !self.skip_node(node, strict)? {
                values.entry(node).or_default().extend(v);
            }
        }
        self.save_attribute_values(name, &values)
    }

    /// Removes every value of the given nodes.
    pub fn delete_attribute_values<I>(&self, name: &str, nodes: I, strict: bool) -> Result<()>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut values = self.load_attribute_values(name)?;
        for node in nodes {
            if !self.skip_node(node, strict)? {
                values.remove(&node);
            }
        }
        self.save_attribute_values(name, &values)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// One row per position of `subtree_root`'s block, deleted positions
    /// included, read from a contiguous range of lines.
    pub fn subtree_attribute_data(&self, subtree_root: NodeId, name: &str) -> Result<Vec<AttributeRow>> {
        let path = self.existing_attribute(name)?;
        let coord = self.placed_coord(subtree_root)?;
        let size = self.subtree_sizes[subtree_root as usize] as usize;

        let rows = BufReader::new(File::open(&path)?)
            .lines()
            .skip(coord - 1)
            .take(size)
            .map(|line| parse_row(&line?))
            .collect::<Result<Vec<_>>>()?;
        if rows.len() != size {
            return Err(Error::InvalidFormat(format!(
                "attribute '{name}' ends before the block of node {subtree_root}"
            )));
        }
        Ok(rows)
    }

    /// [`Tree::subtree_attribute_data`] for several attributes.
    pub fn query_attributes(
        &self,
        subtree_root: NodeId,
        names: &[&str],
        show_stats: bool,
    ) -> Result<BTreeMap<String, Vec<AttributeRow>>> {
        let mut result = BTreeMap::new();
        for &name in names {
            debug!(attribute = name, "loading attribute values");
            let rows = self.subtree_attribute_data(subtree_root, name)?;
            if show_stats {
                let nodes = rows.iter().flatten().count();
                let values: usize = rows.iter().flatten().map(Vec::len).sum();
                info!(attribute = name, nodes, values, "attribute statistics");
            }
            result.insert(name.to_string(), rows);
        }
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Dumps
    // -------------------------------------------------------------------------

    /// Writes the values as a JSON object keyed by id to `<attr file>.json`,
    /// independent of the depth-first order.
    pub fn dump_attribute_values(&self, name: &str) -> Result<PathBuf> {
        let values: BTreeMap<NodeId, Vec<Value>> =
            self.load_attribute_values(name)?.into_iter().collect();
        let path = dump_path(&self.attribute_filename(name)?);
        let mut out = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut out, &values)?;
        out.flush()?;
        info!(attribute = name, path = %path.display(), "attribute dumped");
        Ok(path)
    }

    /// Recreates attribute `name` from its dump, then removes the dump.
    pub fn restore_attribute_from_dump(&self, name: &str) -> Result<()> {
        let path = dump_path(&self.attribute_filename(name)?);
        let values: AttributeValues = serde_json::from_reader(BufReader::new(File::open(&path)?))?;
        self.save_attribute_values(name, &values)?;
        fs::remove_file(&path)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Synchronization with structural edits
    // -------------------------------------------------------------------------

    /// Replays `script` on every attribute file of the tree.
    pub(crate) fn sync_attributes(&self, script: &EditScript) -> Result<()> {
        for (name, path) in existing_attribute_files(self.tree_path()?)? {
            let mut rows = read_rows(&path)?;
            script.replay(&mut rows)?;
            self.check_row_count(&name, rows.len())?;
            write_rows(&path, rows.iter().map(Option::as_ref))?;
            debug!(attribute = %name, ops = script.len(), "attribute file updated");
        }
        Ok(())
    }
}
