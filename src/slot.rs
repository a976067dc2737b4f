//! Positional slots of the depth-first array.

use crate::{NodeId, UNDEF};

/// What occupies one position of the depth-first array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeSlot {
    /// Never held a node (only the dummy slot 0).
    Empty,
    /// Held a node that has since been deleted or moved away.
    Tombstone,
    /// A live node.
    Id(NodeId),
}

impl NodeSlot {
    #[inline]
    pub fn id(self) -> Option<NodeId> {
        match self {
            NodeSlot::Id(id) => Some(id),
            _ => None,
        }
    }

    #[inline]
    pub fn is_live(self) -> bool {
        matches!(self, NodeSlot::Id(_))
    }
}

/// Compact slot: a node id, or one of two reserved values at the top of the
/// `u64` range.
///
/// Both reserved values serialize to `UNDEF` in tree files; see
/// [`Slot::to_raw`] and [`Slot::from_raw`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub(crate) struct Slot(u64);

impl Slot {
    pub(crate) const EMPTY: Slot = Slot(UNDEF);
    pub(crate) const TOMBSTONE: Slot = Slot(UNDEF - 1);

    #[inline]
    pub(crate) fn node(id: NodeId) -> Self {
        debug_assert!(id < UNDEF - 1);
        Self(id)
    }

    #[inline]
    pub(crate) fn is_tombstone(self) -> bool {
        self == Self::TOMBSTONE
    }

    #[inline]
    pub(crate) fn id(self) -> Option<NodeId> {
        if self == Self::EMPTY || self == Self::TOMBSTONE {
            None
        } else {
            Some(self.0)
        }
    }

    #[inline]
    pub(crate) fn kind(self) -> NodeSlot {
        match self {
            Self::EMPTY => NodeSlot::Empty,
            Self::TOMBSTONE => NodeSlot::Tombstone,
            Slot(id) => NodeSlot::Id(id),
        }
    }

    /// File encoding: every non-node slot becomes `UNDEF`.
    #[inline]
    pub(crate) fn to_raw(self) -> u64 {
        match self.id() {
            Some(id) => id,
            None => UNDEF,
        }
    }

    /// Inverse of [`Slot::to_raw`]. Position 0 is the dummy slot; any other
    /// `UNDEF` is a tombstone.
    #[inline]
    pub(crate) fn from_raw(pos: usize, raw: u64) -> Self {
        match (pos, raw) {
            (0, _) => Self::EMPTY,
            (_, UNDEF) => Self::TOMBSTONE,
            (_, id) => Self(id),
        }
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            NodeSlot::Empty => f.write_str("Empty"),
            NodeSlot::Tombstone => f.write_str("Tombstone"),
            NodeSlot::Id(id) => write!(f, "{id}"),
        }
    }
}
