//! Error types.

use thiserror::Error;

use crate::NodeId;

/// Result type for tree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structural problems found while building or editing a tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    /// Id collides with the reserved sentinel range.
    #[error("invalid node id {0}: ids must be below the reserved sentinel range")]
    InvalidId(NodeId),

    /// The id-indexed arrays cannot grow far enough to hold this id.
    #[error("node id {0} is too large: the id-indexed arrays cannot be allocated")]
    IdRangeTooLarge(NodeId),

    #[error("node {0} is listed more than once")]
    DuplicateNode(NodeId),

    #[error("more than one root: {first} and {second}")]
    MultipleRoots { first: NodeId, second: NodeId },

    #[error("no root node (an id listed as its own parent) was found")]
    MissingRoot,

    /// A parent id that is never listed as a node.
    #[error("node {node} has parent {parent}, which is not in the tree")]
    DanglingParent { node: NodeId, parent: NodeId },

    #[error("the ancestor chain of node {0} does not reach the root")]
    Cycle(NodeId),

    #[error("parents never became available: {0:?}")]
    UnresolvedParents(Vec<NodeId>),

    #[error("node {node} already exists with parent {parent}")]
    NodeExists { node: NodeId, parent: NodeId },

    #[error("node {0} already exists as the root")]
    RootExists(NodeId),

    #[error("the root node cannot be moved")]
    MoveRoot,

    #[error("the root node cannot be deleted")]
    DeleteRoot,

    /// A full listing passed to `update` names a different root.
    #[error("the root cannot change from {old} to {new}")]
    RootChanged { old: NodeId, new: NodeId },

    #[error("node {node} cannot be moved under its own descendant {new_parent}")]
    MoveIntoOwnSubtree { node: NodeId, new_parent: NodeId },

    /// The partitioned size pass could not run.
    #[error("size pass worker failed: {0}")]
    Worker(String),
}

/// Errors returned by the tree, its file store and its attribute files.
#[derive(Debug, Error)]
pub enum Error {
    #[error("construction error: {0}")]
    Construction(#[from] ConstructionError),

    #[error("node {0} not found in the tree")]
    NodeNotFound(NodeId),

    #[error("node {0} was deleted from the tree")]
    DeletedNode(NodeId),

    #[error("attribute '{0}' does not exist")]
    AttributeNotFound(String),

    #[error("attribute '{0}' already exists")]
    AttributeCreation(String),

    /// Attribute files live next to the tree file, so the tree needs a path.
    #[error("the tree filename is not set")]
    FilenameNotSet,

    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    #[error("cannot cast {value:?} with '{cast}' caster")]
    Cast { value: String, cast: &'static str },

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors caused by malformed or inconsistent tree structure.
    pub fn is_construction(&self) -> bool {
        matches!(self, Error::Construction(_))
    }
}
