//! Edit scripts: position-indexed records of structural edits.
//!
//! Every insert, move and delete reports the exact single-slot mutations it
//! performed on the depth-first array. Replaying the script on any store whose
//! entry `i` belongs to position `i + 1` keeps that store aligned with the
//! tree.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One single-slot mutation of the depth-first array. Positions are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum EditOp {
    /// A new empty slot was inserted at `pos`, shifting later slots right.
    Insert { pos: usize },
    /// The content of `src` was copied to `dst`.
    Copy { src: usize, dst: usize },
    /// The slot at `pos` became a tombstone.
    Delete { pos: usize },
}

/// Ordered list of [`EditOp`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditScript {
    ops: Vec<EditOp>,
}

/// A store with one entry per depth-first position that can replay an
/// [`EditScript`].
pub trait LineStore {
    /// Inserts an empty entry before the entry at `index`.
    fn insert_empty(&mut self, index: usize) -> Result<()>;
    fn copy_entry(&mut self, src: usize, dst: usize) -> Result<()>;
    /// Empties the entry at `index`.
    fn clear_entry(&mut self, index: usize) -> Result<()>;
}

impl EditScript {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn insert(&mut self, pos: usize) {
        self.ops.push(EditOp::Insert { pos });
    }

    #[inline]
    pub fn copy(&mut self, src: usize, dst: usize) {
        self.ops.push(EditOp::Copy { src, dst });
    }

    #[inline]
    pub fn delete(&mut self, pos: usize) {
        self.ops.push(EditOp::Delete { pos });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[EditOp] {
        &self.ops
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EditOp> {
        self.ops.iter()
    }

    /// Appends the ops of `other`, which must have been recorded after ours.
    pub fn append(&mut self, other: &mut EditScript) {
        self.ops.append(&mut other.ops);
    }

    /// Applies every op, in order, to `store`.
    ///
    /// Position `p` addresses entry `p - 1`: the dummy slot 0 of the
    /// depth-first array has no entry.
    pub fn replay<S: LineStore + ?Sized>(&self, store: &mut S) -> Result<()> {
        for op in &self.ops {
            match *op {
                EditOp::Insert { pos } => store.insert_empty(entry(pos)?)?,
                EditOp::Copy { src, dst } => store.copy_entry(entry(src)?, entry(dst)?)?,
                EditOp::Delete { pos } => store.clear_entry(entry(pos)?)?,
            }
        }
        Ok(())
    }
}

#[inline]
fn entry(pos: usize) -> Result<usize> {
    pos.checked_sub(1)
        .ok_or_else(|| Error::InvalidFormat("edit script addresses the dummy slot 0".into()))
}

pub(crate) fn out_of_range(index: usize, len: usize) -> Error {
    Error::InvalidFormat(format!(
        "edit script addresses position {} but the store has {len} entries",
        index + 1
    ))
}

impl From<Vec<EditOp>> for EditScript {
    fn from(ops: Vec<EditOp>) -> Self {
        Self { ops }
    }
}

impl IntoIterator for EditScript {
    type Item = EditOp;
    type IntoIter = std::vec::IntoIter<EditOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

impl<'a> IntoIterator for &'a EditScript {
    type Item = &'a EditOp;
    type IntoIter = std::slice::Iter<'a, EditOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

/// In-memory column; `None` is the empty entry.
impl<T: Clone> LineStore for Vec<Option<T>> {
    fn insert_empty(&mut self, index: usize) -> Result<()> {
        if index > self.len() {
            return Err(out_of_range(index, self.len()));
        }
        self.insert(index, None);
        Ok(())
    }

    fn copy_entry(&mut self, src: usize, dst: usize) -> Result<()> {
        let value = self.get(src).ok_or_else(|| out_of_range(src, self.len()))?.clone();
        let len = self.len();
        *self.get_mut(dst).ok_or_else(|| out_of_range(dst, len))? = value;
        Ok(())
    }

    fn clear_entry(&mut self, index: usize) -> Result<()> {
        let len = self.len();
        *self.get_mut(index).ok_or_else(|| out_of_range(index, len))? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_move() {
        // Moving a two-slot block from positions 3..5 to right after position 1.
        let mut column = vec![Some('r'), Some('a'), Some('b'), Some('c')];
        let mut script = EditScript::new();
        script.insert(2);
        script.insert(2);
        script.copy(5, 2);
        script.delete(5);
        script.copy(6, 3);
        script.delete(6);

        script.replay(&mut column).unwrap();
        assert_eq!(
            column,
            vec![Some('r'), Some('b'), Some('c'), Some('a'), None, None]
        );
    }

    #[test]
    fn test_replay_out_of_range() {
        let mut column = vec![Some(1u8)];
        let script = EditScript::from(vec![EditOp::Delete { pos: 3 }]);
        assert!(matches!(
            script.replay(&mut column),
            Err(Error::InvalidFormat(_))
        ));

        let script = EditScript::from(vec![EditOp::Insert { pos: 0 }]);
        assert!(script.replay(&mut column).is_err());
    }

    #[test]
    fn test_append_keeps_order() {
        let mut a = EditScript::new();
        a.insert(2);
        let mut b = EditScript::new();
        b.delete(3);
        a.append(&mut b);
        assert!(b.is_empty());
        assert_eq!(
            a.ops(),
            &[EditOp::Insert { pos: 2 }, EditOp::Delete { pos: 3 }]
        );
    }

    #[test]
    fn test_serialized_form() {
        let script = EditScript::from(vec![
            EditOp::Insert { pos: 2 },
            EditOp::Copy { src: 4, dst: 2 },
        ]);
        let json = serde_json::to_string(&script).unwrap();
        assert_eq!(
            json,
            r#"[{"op":"insert","pos":2},{"op":"copy","src":4,"dst":2}]"#
        );
    }
}
