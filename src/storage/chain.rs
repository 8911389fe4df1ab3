//! Walking per-node relationship chains.
//!
//! A node's relationships form a doubly-linked list threaded through the
//! relationship records, using the links on whichever side of each record
//! the node sits. The head record stores the chain length in its prev slot.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::loader::{RecordLoad, RecordLoader};
use super::record::{ChainLink, RelationshipRecord, Side};
use crate::types::{NodeId, RelId, Result, StrandError, TypeId};

/// Which end of a relationship a node must sit on to match.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    /// The node is the source.
    Outgoing,
    /// The node is the target.
    Incoming,
    /// Either end.
    Both,
}

impl Direction {
    /// The direction seen from the other end.
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
            Direction::Both => Direction::Both,
        }
    }

    /// Whether `record` leaves or enters `node` in this direction. Loops match
    /// every direction.
    pub fn matches(self, record: &RelationshipRecord, node: NodeId) -> bool {
        match self {
            Direction::Outgoing => record.first_node == node,
            Direction::Incoming => record.second_node == node,
            Direction::Both => record.first_node == node || record.second_node == node,
        }
    }
}

/// Cursor over one node's relationship chain.
///
/// [`RelationshipCursor::init`] positions the cursor on the first relationship
/// of the requested type and direction and returns the number of chain
/// records from there to the end. The navigation methods then move along the
/// raw links without filtering; they return `false` once the chain ends or the
/// target record has been deleted.
///
/// The cursor holds no loader of its own. Every call that reads takes the
/// loader, so one cursor can be re-initialized any number of times against
/// the same loader. Field accessors describe the current record and are only
/// meaningful while [`available`](Self::available) holds.
#[derive(Debug, Default)]
pub struct RelationshipCursor {
    record: RelationshipRecord,
    current: Option<RelId>,
    bound: bool,
}

impl RelationshipCursor {
    /// A closed cursor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the current record is of `rel_type` and sits on `node` in `direction`.
    pub fn matching(&self, node: NodeId, direction: Direction, rel_type: TypeId) -> bool {
        self.record.rel_type == rel_type && direction.matches(&self.record, node)
    }

    /// Starts a walk at `start`, which must head `node`'s chain.
    ///
    /// Discards whatever the cursor was positioned on. Returns the chain
    /// degree minus the records skipped to reach the first match, or 0 with
    /// the cursor closed when `start` is gone or no record matches.
    ///
    /// Fails with [`StrandError::StaleChainHead`] when `start` is linked to
    /// `node` but a newer record has since become the head; re-read the
    /// node's first relationship and try again. Fails with
    /// [`StrandError::ChainCorruption`] when `start` is not linked to `node`.
    pub fn init(
        &mut self,
        loader: &mut dyn RecordLoader,
        start: RelId,
        node: NodeId,
        direction: Direction,
        rel_type: TypeId,
    ) -> Result<u64> {
        self.close();
        match self.seek(loader, start, node, direction, rel_type) {
            Ok(Some(degree)) => {
                debug!(rel = self.record.id.0, node = node.0, degree, "chain.init");
                self.current = Some(self.record.id);
                self.bound = true;
                Ok(degree)
            }
            Ok(None) => {
                self.close();
                Ok(0)
            }
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    fn seek(
        &mut self,
        loader: &mut dyn RecordLoader,
        start: RelId,
        node: NodeId,
        direction: Direction,
        rel_type: TypeId,
    ) -> Result<Option<u64>> {
        if !loader.load_relationship(start, &mut self.record, RecordLoad::Check)? {
            return Ok(None);
        }
        let mut side = self.side_for(node)?;
        let mut degree = match self.record.prev(side) {
            ChainLink::Degree(degree) => degree,
            ChainLink::Prev(head) => {
                debug!(rel = start.0, node = node.0, head = head.0, "chain.init.stale_head");
                return Err(StrandError::StaleChainHead { rel: start, node });
            }
        };
        while !self.matching(node, direction, rel_type) {
            degree = degree.saturating_sub(1);
            let Some(next) = self.record.next(side) else {
                return Ok(None);
            };
            if !loader.load_relationship(next, &mut self.record, RecordLoad::Check)? {
                return Ok(None);
            }
            side = self.side_for(node)?;
        }
        Ok(Some(degree))
    }

    /// Follows the source side's next link.
    pub fn next_source(&mut self, loader: &mut dyn RecordLoader) -> Result<bool> {
        let next = self.record.next(Side::First);
        self.follow(loader, next)
    }

    /// Follows the target side's next link.
    pub fn next_target(&mut self, loader: &mut dyn RecordLoader) -> Result<bool> {
        let next = self.record.next(Side::Second);
        self.follow(loader, next)
    }

    /// Follows the source side's prev link; a chain head has none.
    pub fn prev_source(&mut self, loader: &mut dyn RecordLoader) -> Result<bool> {
        let prev = self.source_prev();
        self.follow(loader, prev)
    }

    /// Follows the target side's prev link; a chain head has none.
    pub fn prev_target(&mut self, loader: &mut dyn RecordLoader) -> Result<bool> {
        let prev = self.target_prev();
        self.follow(loader, prev)
    }

    /// Moves to relationship `id`. A deleted or missing record leaves the
    /// cursor unavailable.
    pub fn jump(&mut self, loader: &mut dyn RecordLoader, id: RelId) -> Result<bool> {
        self.follow(loader, Some(id))
    }

    /// Whether the cursor is on a live record.
    pub fn available(&self) -> bool {
        self.current.is_some()
    }

    /// Current relationship id; `None` once closed or past the end of the chain.
    pub fn id(&self) -> Option<RelId> {
        self.current
    }

    /// Current relationship type.
    pub fn rel_type(&self) -> TypeId {
        self.record.rel_type
    }

    /// Source node of the current relationship.
    pub fn source(&self) -> NodeId {
        self.record.first_node
    }

    /// Target node of the current relationship.
    pub fn target(&self) -> NodeId {
        self.record.second_node
    }

    /// Next relationship in the source node's chain.
    pub fn source_next(&self) -> Option<RelId> {
        self.record.next(Side::First)
    }

    /// Next relationship in the target node's chain.
    pub fn target_next(&self) -> Option<RelId> {
        self.record.next(Side::Second)
    }

    /// Previous relationship in the source node's chain, `None` at the head.
    pub fn source_prev(&self) -> Option<RelId> {
        self.record.prev(Side::First).prev()
    }

    /// Previous relationship in the target node's chain, `None` at the head.
    pub fn target_prev(&self) -> Option<RelId> {
        self.record.prev(Side::Second).prev()
    }

    /// The current record.
    pub fn record(&self) -> &RelationshipRecord {
        &self.record
    }

    /// Clears the record and stops navigation until the next
    /// [`init`](Self::init). The loader is left untouched.
    pub fn close(&mut self) {
        self.bound = false;
        self.current = None;
        self.record = RelationshipRecord::default();
    }

    fn follow(&mut self, loader: &mut dyn RecordLoader, target: Option<RelId>) -> Result<bool> {
        self.current = None;
        if !self.bound {
            return Ok(false);
        }
        let Some(id) = target else {
            self.record = RelationshipRecord::default();
            return Ok(false);
        };
        if loader.load_relationship(id, &mut self.record, RecordLoad::Check)? {
            self.current = Some(id);
        }
        Ok(self.current.is_some())
    }

    fn side_for(&self, node: NodeId) -> Result<Side> {
        self.record.side_of(node).ok_or_else(|| {
            warn!(rel = self.record.id.0, node = node.0, "chain.foreign_record");
            StrandError::ChainCorruption {
                rel: self.record.id,
                node,
            }
        })
    }
}

/// Iterator over the records of one node's chain, optionally filtered.
///
/// Ends quietly when a link points at a deleted record.
pub struct ChainIter<'l> {
    loader: &'l mut dyn RecordLoader,
    node: NodeId,
    next: Option<RelId>,
    direction: Direction,
    rel_type: Option<TypeId>,
}

impl<'l> ChainIter<'l> {
    /// Walks `node`'s chain from `first_rel`, yielding every record.
    pub fn new(loader: &'l mut dyn RecordLoader, node: NodeId, first_rel: Option<RelId>) -> Self {
        Self {
            loader,
            node,
            next: first_rel,
            direction: Direction::Both,
            rel_type: None,
        }
    }

    /// Only yields records matching `direction`.
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Only yields records of `rel_type`.
    pub fn rel_type(mut self, rel_type: TypeId) -> Self {
        self.rel_type = Some(rel_type);
        self
    }

    fn advance(&mut self) -> Result<Option<RelationshipRecord>> {
        let mut record = RelationshipRecord::default();
        while let Some(id) = self.next.take() {
            if !self
                .loader
                .load_relationship(id, &mut record, RecordLoad::Check)?
            {
                return Ok(None);
            }
            let side = record
                .side_of(self.node)
                .ok_or(StrandError::ChainCorruption { rel: id, node: self.node })?;
            self.next = record.next(side);
            let type_ok = self.rel_type.map_or(true, |t| t == record.rel_type);
            if type_ok && self.direction.matches(&record, self.node) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

impl Iterator for ChainIter<'_> {
    type Item = Result<RelationshipRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(record) => record.map(Ok),
            Err(err) => {
                self.next = None;
                Some(Err(err))
            }
        }
    }
}

/// Counts `node`'s relationships of `rel_type` in `direction` by walking the
/// whole chain. Loops count once.
pub fn degree(
    loader: &mut dyn RecordLoader,
    node: NodeId,
    first_rel: Option<RelId>,
    direction: Direction,
    rel_type: TypeId,
) -> Result<u64> {
    let mut count = 0;
    for record in ChainIter::new(loader, node, first_rel)
        .direction(direction)
        .rel_type(rel_type)
    {
        record?;
        count += 1;
    }
    Ok(count)
}

/// Per-type relationship counts for one node. Loops are counted separately
/// from outgoing and incoming.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DegreeCounts {
    /// Relationships leaving the node, loops excluded.
    pub outgoing: u64,
    /// Relationships entering the node, loops excluded.
    pub incoming: u64,
    /// Relationships from the node to itself.
    pub loops: u64,
}

impl DegreeCounts {
    /// Relationships matching `direction`, loops included once.
    pub fn total(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Outgoing => self.outgoing + self.loops,
            Direction::Incoming => self.incoming + self.loops,
            Direction::Both => self.outgoing + self.incoming + self.loops,
        }
    }
}

/// Degree counts for every relationship type in a node's chain.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChainSummary {
    by_type: BTreeMap<TypeId, DegreeCounts>,
}

impl ChainSummary {
    /// Types present in the chain, ascending.
    pub fn types(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.by_type.keys().copied()
    }

    /// Counts for `rel_type`; zero when the type is absent.
    pub fn counts(&self, rel_type: TypeId) -> DegreeCounts {
        self.by_type.get(&rel_type).copied().unwrap_or_default()
    }

    /// Relationships of any type matching `direction`.
    pub fn total(&self, direction: Direction) -> u64 {
        self.by_type.values().map(|c| c.total(direction)).sum()
    }
}

/// Walks `node`'s chain once and tallies it per type.
pub fn summarize(
    loader: &mut dyn RecordLoader,
    node: NodeId,
    first_rel: Option<RelId>,
) -> Result<ChainSummary> {
    let mut summary = ChainSummary::default();
    for record in ChainIter::new(loader, node, first_rel) {
        let record = record?;
        let counts = summary.by_type.entry(record.rel_type).or_default();
        if record.is_loop() {
            counts.loops += 1;
        } else if record.first_node == node {
            counts.outgoing += 1;
        } else {
            counts.incoming += 1;
        }
    }
    Ok(summary)
}

/// Chooses, per relationship type, which direction to traverse.
pub trait RelationshipSelector {
    /// The direction to traverse `rel_type` in, or `None` to skip it.
    fn select(&self, rel_type: TypeId, counts: DegreeCounts) -> Option<Direction>;
}

impl<F> RelationshipSelector for F
where
    F: Fn(TypeId, DegreeCounts) -> Option<Direction>,
{
    fn select(&self, rel_type: TypeId, counts: DegreeCounts) -> Option<Direction> {
        self(rel_type, counts)
    }
}

/// Ids of `node`'s relationships the selector chose, in chain order.
pub fn select(
    loader: &mut dyn RecordLoader,
    node: NodeId,
    first_rel: Option<RelId>,
    selector: &dyn RelationshipSelector,
) -> Result<Vec<RelId>> {
    let summary = summarize(loader, node, first_rel)?;
    let chosen: BTreeMap<TypeId, Direction> = summary
        .types()
        .filter_map(|t| selector.select(t, summary.counts(t)).map(|d| (t, d)))
        .collect();
    if chosen.is_empty() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for record in ChainIter::new(loader, node, first_rel) {
        let record = record?;
        if let Some(direction) = chosen.get(&record.rel_type) {
            if direction.matches(&record, node) {
                ids.push(record.id);
            }
        }
    }
    Ok(ids)
}
