#![forbid(unsafe_code)]
//! Identifier newtypes and the storage-level error type shared by every layer.

use std::fmt;

/// Node identifier.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);
/// Relationship identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RelId(pub u64);
/// Label token identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LabelId(pub u32);
/// Relationship type token identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TypeId(pub u32);
/// Property key token identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PropId(pub u32);
/// Page number within a paged file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

/// Kind of entity a record or lookup refers to.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EntityKind {
    /// A node record.
    Node,
    /// A relationship record.
    Relationship,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => f.write_str("node"),
            EntityKind::Relationship => f.write_str("relationship"),
        }
    }
}

/// Errors raised by the page, record and chain layers.
#[derive(thiserror::Error, Debug)]
pub enum StrandError {
    /// A cursor was used before it was bound to a page.
    #[error("cursor has not been initialized")]
    NotInitialized,
    /// An access reached past the end of the bound page region.
    #[error("cursor is bounded to {bound} bytes, tried to access {size} bytes at offset {offset}")]
    OutOfBounds {
        /// Requested offset relative to the cursor base.
        offset: usize,
        /// Width of the access in bytes.
        size: usize,
        /// Length of the bound region.
        bound: usize,
    },
    /// A chain walk started from a record that is not linked to the node.
    #[error("relationship {rel} not in chain for node {node}")]
    ChainCorruption {
        /// Record the walk was asked to start from.
        rel: RelId,
        /// Node whose chain was expected.
        node: NodeId,
    },
    /// A chain walk started from a record that a newer record has replaced
    /// as the head of the node's chain.
    #[error("relationship {rel} no longer heads the chain of node {node}")]
    StaleChainHead {
        /// Record the walk was asked to start from.
        rel: RelId,
        /// Node whose chain was expected.
        node: NodeId,
    },
    /// A record loaded with must-exist semantics is absent or freed.
    #[error("{kind} record {id} is not in use")]
    RecordNotInUse {
        /// Entity kind of the record.
        kind: EntityKind,
        /// Raw record id.
        id: u64,
    },
    /// Inconsistent on-page state.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an argument the layer cannot honour.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A lookup found nothing.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Store configuration could not be parsed or validated.
    #[error("configuration: {0}")]
    Config(String),
}

impl StrandError {
    /// Whether repeating the operation from fresh state can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StrandError::StaleChainHead { .. })
    }
}

/// Result alias for storage-level operations.
pub type Result<T> = std::result::Result<T, StrandError>;

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LabelId {
    fn from(value: u32) -> Self {
        LabelId(value)
    }
}

impl From<LabelId> for u32 {
    fn from(value: LabelId) -> Self {
        value.0
    }
}

impl From<u32> for TypeId {
    fn from(value: u32) -> Self {
        TypeId(value)
    }
}

impl From<TypeId> for u32 {
    fn from(value: TypeId) -> Self {
        value.0
    }
}

impl From<u32> for PropId {
    fn from(value: u32) -> Self {
        PropId(value)
    }
}

impl From<PropId> for u32 {
    fn from(value: PropId) -> Self {
        value.0
    }
}
