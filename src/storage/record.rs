//! In-memory relationship and node records.

use std::fmt;

use super::format::{
    RawNode, RawRelationship, RecordFormat, FLAG_FIRST_IN_FIRST_CHAIN,
    FLAG_FIRST_IN_SECOND_CHAIN, FLAG_IN_USE,
};
use crate::primitives::pager::PageCursor;
use crate::types::{EntityKind, NodeId, RelId, Result, StrandError, TypeId};

/// Endpoint of a relationship record. Each side has its own chain links.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Side {
    /// The source node's half of the record.
    First,
    /// The target node's half of the record.
    Second,
}

impl Side {
    /// Both sides, first first.
    pub const BOTH: [Side; 2] = [Side::First, Side::Second];
}

/// Contents of a record's prev slot on one side.
///
/// The first record of a node's chain has no predecessor and keeps the chain
/// degree in that slot instead.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChainLink {
    /// The record heads the chain; the chain holds this many relationships.
    Degree(u64),
    /// The previous relationship in the chain.
    Prev(RelId),
}

impl ChainLink {
    /// The predecessor, or `None` for a chain head.
    pub fn prev(self) -> Option<RelId> {
        match self {
            ChainLink::Degree(_) => None,
            ChainLink::Prev(id) => Some(id),
        }
    }

    /// The chain degree, or `None` when the slot holds a predecessor.
    pub fn degree(self) -> Option<u64> {
        match self {
            ChainLink::Degree(degree) => Some(degree),
            ChainLink::Prev(_) => None,
        }
    }
}

/// A relationship record with both chains' links.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelationshipRecord {
    /// Record id.
    pub id: RelId,
    /// Whether the record holds a live relationship.
    pub in_use: bool,
    /// Relationship type.
    pub rel_type: TypeId,
    /// Source node.
    pub first_node: NodeId,
    /// Target node.
    pub second_node: NodeId,
    /// Head of the property chain, if any.
    pub next_prop: Option<u64>,
    first_prev: ChainLink,
    first_next: Option<RelId>,
    second_prev: ChainLink,
    second_next: Option<RelId>,
}

impl Default for RelationshipRecord {
    fn default() -> Self {
        Self::new(RelId(0))
    }
}

impl RelationshipRecord {
    /// An unused record with empty links.
    pub fn new(id: RelId) -> Self {
        Self {
            id,
            in_use: false,
            rel_type: TypeId(0),
            first_node: NodeId(0),
            second_node: NodeId(0),
            next_prop: None,
            first_prev: ChainLink::Degree(0),
            first_next: None,
            second_prev: ChainLink::Degree(0),
            second_next: None,
        }
    }

    /// A live record linking `first` to `second`, not yet placed in any chain.
    pub fn linking(id: RelId, first: NodeId, second: NodeId, rel_type: TypeId) -> Self {
        Self {
            in_use: true,
            rel_type,
            first_node: first,
            second_node: second,
            ..Self::new(id)
        }
    }

    /// Resets every field and marks the record as `id`.
    pub fn clear(&mut self, id: RelId) {
        *self = Self::new(id);
    }

    /// Node on `side`.
    pub fn node(&self, side: Side) -> NodeId {
        match side {
            Side::First => self.first_node,
            Side::Second => self.second_node,
        }
    }

    /// Prev slot on `side`.
    pub fn prev(&self, side: Side) -> ChainLink {
        match side {
            Side::First => self.first_prev,
            Side::Second => self.second_prev,
        }
    }

    /// Next relationship on `side`, `None` at the end of the chain.
    pub fn next(&self, side: Side) -> Option<RelId> {
        match side {
            Side::First => self.first_next,
            Side::Second => self.second_next,
        }
    }

    /// Replaces the prev slot on `side`.
    pub fn set_prev(&mut self, side: Side, link: ChainLink) {
        match side {
            Side::First => self.first_prev = link,
            Side::Second => self.second_prev = link,
        }
    }

    /// Replaces the next link on `side`.
    pub fn set_next(&mut self, side: Side, next: Option<RelId>) {
        match side {
            Side::First => self.first_next = next,
            Side::Second => self.second_next = next,
        }
    }

    /// Whether the record heads the chain on `side`.
    pub fn is_first_in_chain(&self, side: Side) -> bool {
        matches!(self.prev(side), ChainLink::Degree(_))
    }

    /// Both endpoints are the same node.
    pub fn is_loop(&self) -> bool {
        self.first_node == self.second_node
    }

    /// The side `node` sits on, preferring the first side for loops.
    pub fn side_of(&self, node: NodeId) -> Option<Side> {
        if self.first_node == node {
            Some(Side::First)
        } else if self.second_node == node {
            Some(Side::Second)
        } else {
            None
        }
    }

    /// Every side `node` sits on; both for a loop.
    pub fn sides_of(&self, node: NodeId) -> impl Iterator<Item = Side> + '_ {
        Side::BOTH
            .into_iter()
            .filter(move |side| self.node(*side) == node)
    }

    pub(crate) fn load_raw(&mut self, id: RelId, raw: &RawRelationship, format: RecordFormat) {
        let null = format.null_ref();
        let reference = |value: u64| (value != null).then_some(RelId(value));
        let link = |value: u64, first: bool| {
            if first {
                ChainLink::Degree(value)
            } else if value == null {
                // A non-head prev never holds the terminator; read it as an empty head.
                ChainLink::Degree(0)
            } else {
                ChainLink::Prev(RelId(value))
            }
        };
        *self = Self {
            id,
            in_use: raw.flags & FLAG_IN_USE != 0,
            rel_type: TypeId(raw.rel_type),
            first_node: NodeId(raw.first_node),
            second_node: NodeId(raw.second_node),
            next_prop: (raw.next_prop != null).then_some(raw.next_prop),
            first_prev: link(raw.first_prev, raw.flags & FLAG_FIRST_IN_FIRST_CHAIN != 0),
            first_next: reference(raw.first_next),
            second_prev: link(raw.second_prev, raw.flags & FLAG_FIRST_IN_SECOND_CHAIN != 0),
            second_next: reference(raw.second_next),
        };
    }

    pub(crate) fn to_raw(&self, format: RecordFormat) -> Result<RawRelationship> {
        let null = format.null_ref();
        let reference = |id: Option<RelId>| id.map_or(null, |id| id.0);
        let slot = |link: ChainLink| match link {
            ChainLink::Degree(degree) if degree > format.max_degree() => {
                Err(StrandError::Invalid("chain degree exceeds the record format"))
            }
            ChainLink::Degree(degree) => Ok(degree),
            ChainLink::Prev(id) => Ok(id.0),
        };
        if self.rel_type.0 > format.max_type() {
            return Err(StrandError::Invalid("relationship type exceeds the record format"));
        }
        for node in [self.first_node, self.second_node] {
            if node.0 > format.max_id() {
                return Err(StrandError::Invalid("node id exceeds the record format"));
            }
        }
        let mut flags = 0;
        if self.in_use {
            flags |= FLAG_IN_USE;
        }
        if self.is_first_in_chain(Side::First) {
            flags |= FLAG_FIRST_IN_FIRST_CHAIN;
        }
        if self.is_first_in_chain(Side::Second) {
            flags |= FLAG_FIRST_IN_SECOND_CHAIN;
        }
        Ok(RawRelationship {
            flags,
            rel_type: self.rel_type.0,
            first_node: self.first_node.0,
            second_node: self.second_node.0,
            first_prev: slot(self.first_prev)?,
            first_next: reference(self.first_next),
            second_prev: slot(self.second_prev)?,
            second_next: reference(self.second_next),
            next_prop: self.next_prop.unwrap_or(null),
        })
    }
}

impl fmt::Display for RelationshipRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Relationship[{},used={},source={},target={},type={},sPrev={:?},sNext={:?},tPrev={:?},tNext={:?}]",
            self.id,
            self.in_use,
            self.first_node,
            self.second_node,
            self.rel_type,
            self.first_prev,
            self.first_next,
            self.second_prev,
            self.second_next
        )
    }
}

/// A node record: liveness plus the head of its relationship chain.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NodeRecord {
    /// Record id.
    pub id: NodeId,
    /// Whether the record holds a live node.
    pub in_use: bool,
    /// First relationship in the node's chain.
    pub first_rel: Option<RelId>,
}

impl NodeRecord {
    pub(crate) fn load_raw(&mut self, id: NodeId, raw: &RawNode, format: RecordFormat) {
        self.id = id;
        self.in_use = raw.flags & FLAG_IN_USE != 0;
        self.first_rel = (raw.first_rel != format.null_ref()).then_some(RelId(raw.first_rel));
    }

    pub(crate) fn to_raw(&self, format: RecordFormat) -> RawNode {
        RawNode {
            flags: if self.in_use { FLAG_IN_USE } else { 0 },
            first_rel: self.first_rel.map_or(format.null_ref(), |id| id.0),
        }
    }
}

/// A fixed-size record type a [`super::RecordCursor`] can load and a store can write.
pub trait Record: Clone {
    /// Entity kind reported in "not in use" errors.
    const KIND: EntityKind;

    /// Raw on-page representation.
    type Raw: Copy;

    /// Record size in bytes for `format`.
    fn size(format: RecordFormat) -> usize;

    /// A cleared record carrying `id`.
    fn empty(id: u64) -> Self;

    /// Raw id of the record.
    fn raw_id(&self) -> u64;

    /// Whether the record is live.
    fn is_in_use(&self) -> bool;

    /// Reads the raw fields at the cursor window.
    ///
    /// Decoding happens in two steps so that an optimistic reader can retry
    /// the raw read before anything is interpreted.
    fn read(cursor: &PageCursor, format: RecordFormat) -> Result<Self::Raw>;

    /// Interprets a validated raw read as record `id`.
    fn decode(&mut self, id: u64, raw: &Self::Raw, format: RecordFormat);

    /// Writes the record into the cursor window.
    fn write(&self, cursor: &mut PageCursor, format: RecordFormat) -> Result<()>;
}

impl Record for RelationshipRecord {
    const KIND: EntityKind = EntityKind::Relationship;
    type Raw = RawRelationship;

    fn size(format: RecordFormat) -> usize {
        format.relationship_size()
    }

    fn empty(id: u64) -> Self {
        Self::new(RelId(id))
    }

    fn raw_id(&self) -> u64 {
        self.id.0
    }

    fn is_in_use(&self) -> bool {
        self.in_use
    }

    fn read(cursor: &PageCursor, format: RecordFormat) -> Result<RawRelationship> {
        format.read_relationship(cursor)
    }

    fn decode(&mut self, id: u64, raw: &RawRelationship, format: RecordFormat) {
        self.load_raw(RelId(id), raw, format);
    }

    fn write(&self, cursor: &mut PageCursor, format: RecordFormat) -> Result<()> {
        let raw = self.to_raw(format)?;
        format.write_relationship(cursor, &raw)
    }
}

impl Record for NodeRecord {
    const KIND: EntityKind = EntityKind::Node;
    type Raw = RawNode;

    fn size(format: RecordFormat) -> usize {
        format.node_size()
    }

    fn empty(id: u64) -> Self {
        Self {
            id: NodeId(id),
            ..Self::default()
        }
    }

    fn raw_id(&self) -> u64 {
        self.id.0
    }

    fn is_in_use(&self) -> bool {
        self.in_use
    }

    fn read(cursor: &PageCursor, format: RecordFormat) -> Result<RawNode> {
        format.read_node(cursor)
    }

    fn decode(&mut self, id: u64, raw: &RawNode, format: RecordFormat) {
        self.load_raw(NodeId(id), raw, format);
    }

    fn write(&self, cursor: &mut PageCursor, format: RecordFormat) -> Result<()> {
        format.write_node(cursor, &self.to_raw(format))
    }
}
