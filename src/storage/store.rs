//! Node and relationship stores.
//!
//! The relationship store is the write side of the chain layout: every new
//! relationship becomes the head of both endpoint chains, and the head's prev
//! slot carries the chain degree. Deletes unlink the record and move the
//! degree to the new head when the old head goes away.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::format::RecordFormat;
use super::loader::{write_record, RecordCursor, RecordLoad};
use super::metrics::StoreMetrics;
use super::options::StoreOptions;
use super::record::{ChainLink, NodeRecord, RelationshipRecord, Side};
use crate::primitives::pager::PagedFile;
use crate::types::{NodeId, RelId, Result, StrandError, TypeId};

/// Hands out record ids: freed ids first (when reuse is on), then the
/// high-water mark.
#[derive(Debug)]
struct IdAllocator {
    high_water: u64,
    free: Vec<u64>,
    reuse: bool,
    max: u64,
}

impl IdAllocator {
    fn new(reuse: bool, max: u64) -> Self {
        Self {
            high_water: 0,
            free: Vec::new(),
            reuse,
            max,
        }
    }

    fn allocate(&mut self) -> Result<u64> {
        if let Some(id) = self.free.pop() {
            return Ok(id);
        }
        if self.high_water > self.max {
            return Err(StrandError::Invalid("record id space exhausted"));
        }
        let id = self.high_water;
        self.high_water += 1;
        Ok(id)
    }

    fn release(&mut self, id: u64) {
        if self.reuse {
            self.free.push(id);
        }
    }

    /// Takes a specific id back out of circulation.
    fn claim(&mut self, id: u64) -> Result<()> {
        if id > self.max {
            return Err(StrandError::Invalid("record id space exhausted"));
        }
        if let Some(pos) = self.free.iter().position(|&free| free == id) {
            self.free.swap_remove(pos);
        } else if id >= self.high_water {
            self.free.extend(self.high_water..id);
            self.high_water = id + 1;
        }
        Ok(())
    }
}

/// Node records and the write lock shared by every chain mutation.
pub struct NodeStore {
    file: Arc<PagedFile>,
    format: RecordFormat,
    ids: Mutex<IdAllocator>,
    writer: Mutex<()>,
}

impl NodeStore {
    /// Opens an empty node store.
    pub fn open(options: &StoreOptions) -> Result<Self> {
        options.validate()?;
        let file = PagedFile::with_metrics(options.pager.clone(), Arc::clone(&options.metrics))?;
        let format = options.record_format;
        debug!(format = ?format, "store.node.open");
        Ok(Self {
            file,
            format,
            ids: Mutex::new(IdAllocator::new(options.reuse_ids, format.max_id())),
            writer: Mutex::new(()),
        })
    }

    /// Allocates and writes a new node with an empty chain.
    pub fn create(&self) -> Result<NodeId> {
        let _write = self.writer.lock();
        let id = NodeId(self.ids.lock().allocate()?);
        let record = NodeRecord {
            id,
            in_use: true,
            first_rel: None,
        };
        write_record(&self.file, self.format, &record)?;
        debug!(node = id.0, "store.node.create");
        Ok(id)
    }

    /// Loads a live node record.
    pub fn load(&self, id: NodeId) -> Result<NodeRecord> {
        let mut record = NodeRecord::default();
        self.cursor().next(id.0, &mut record, RecordLoad::Normal)?;
        Ok(record)
    }

    /// Whether `id` is a live node.
    pub fn exists(&self, id: NodeId) -> Result<bool> {
        let mut record = NodeRecord::default();
        self.cursor().next(id.0, &mut record, RecordLoad::Check)
    }

    /// Head of the node's relationship chain.
    pub fn first_rel(&self, id: NodeId) -> Result<Option<RelId>> {
        Ok(self.load(id)?.first_rel)
    }

    /// Frees a node. Nodes with relationships cannot be deleted.
    pub fn delete(&self, id: NodeId) -> Result<()> {
        let _write = self.writer.lock();
        let record = self.load(id)?;
        if record.first_rel.is_some() {
            return Err(StrandError::Invalid("node still has relationships"));
        }
        write_record(&self.file, self.format, &NodeRecord {
            id,
            ..NodeRecord::default()
        })?;
        self.ids.lock().release(id.0);
        debug!(node = id.0, "store.node.delete");
        Ok(())
    }

    /// Brings a deleted node back under its old id, with an empty chain.
    pub(crate) fn restore(&self, id: NodeId) -> Result<()> {
        let _write = self.writer.lock();
        if self.exists(id)? {
            return Err(StrandError::Invalid("node id is already in use"));
        }
        self.ids.lock().claim(id.0)?;
        write_record(&self.file, self.format, &NodeRecord {
            id,
            in_use: true,
            first_rel: None,
        })?;
        debug!(node = id.0, "store.node.restore");
        Ok(())
    }

    /// Opens a reusable node record reader.
    pub fn cursor(&self) -> RecordCursor<NodeRecord> {
        RecordCursor::new(Arc::clone(&self.file), self.format)
    }

    /// Record layout of this store.
    pub fn format(&self) -> RecordFormat {
        self.format
    }

    /// Paged file backing this store.
    pub fn file(&self) -> &Arc<PagedFile> {
        &self.file
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock()
    }

    fn set_first_rel(&self, id: NodeId, first_rel: Option<RelId>) -> Result<()> {
        let mut record = self.load(id)?;
        record.first_rel = first_rel;
        write_record(&self.file, self.format, &record)
    }
}

/// Relationship records linked into per-node chains.
pub struct RelationshipStore {
    file: Arc<PagedFile>,
    format: RecordFormat,
    ids: Mutex<IdAllocator>,
    metrics: Arc<dyn StoreMetrics>,
}

impl RelationshipStore {
    /// Opens an empty relationship store.
    pub fn open(options: &StoreOptions) -> Result<Self> {
        options.validate()?;
        let file = PagedFile::with_metrics(options.pager.clone(), Arc::clone(&options.metrics))?;
        let format = options.record_format;
        debug!(format = ?format, "store.relationship.open");
        Ok(Self {
            file,
            format,
            ids: Mutex::new(IdAllocator::new(options.reuse_ids, format.max_id())),
            metrics: Arc::clone(&options.metrics),
        })
    }

    /// Creates a relationship and links it at the head of both endpoint chains.
    pub fn create(
        &self,
        first: NodeId,
        second: NodeId,
        rel_type: TypeId,
        nodes: &NodeStore,
    ) -> Result<RelId> {
        if rel_type.0 > self.format.max_type() {
            return Err(StrandError::Invalid("relationship type exceeds the record format"));
        }
        let _write = nodes.write_lock();
        nodes.load(first)?;
        nodes.load(second)?;
        let id = RelId(self.ids.lock().allocate()?);
        self.link(id, first, second, rel_type, nodes)?;
        debug!(rel = id.0, first = first.0, second = second.0, rel_type = rel_type.0, "store.relationship.create");
        Ok(id)
    }

    /// Recreates a deleted relationship under its old id.
    pub(crate) fn restore(
        &self,
        id: RelId,
        first: NodeId,
        second: NodeId,
        rel_type: TypeId,
        nodes: &NodeStore,
    ) -> Result<()> {
        let _write = nodes.write_lock();
        nodes.load(first)?;
        nodes.load(second)?;
        let mut existing = RelationshipRecord::default();
        if self.cursor().next(id.0, &mut existing, RecordLoad::Check)? {
            return Err(StrandError::Invalid("relationship id is already in use"));
        }
        self.ids.lock().claim(id.0)?;
        self.link(id, first, second, rel_type, nodes)?;
        debug!(rel = id.0, "store.relationship.restore");
        Ok(())
    }

    // Caller holds the node store write lock.
    fn link(
        &self,
        id: RelId,
        first: NodeId,
        second: NodeId,
        rel_type: TypeId,
        nodes: &NodeStore,
    ) -> Result<()> {
        let mut record = RelationshipRecord::linking(id, first, second, rel_type);
        let sides: &[Side] = if record.is_loop() {
            &[Side::First]
        } else {
            &Side::BOTH
        };
        let mut heads = Vec::with_capacity(sides.len());
        for &side in sides {
            let node = record.node(side);
            let head = nodes.first_rel(node)?;
            let degree = match head {
                None => 0,
                Some(head) => self.head_degree(&self.load(head)?, node)?,
            };
            record.set_prev(side, ChainLink::Degree(degree + 1));
            record.set_next(side, head);
            heads.push((node, head));
        }
        if record.is_loop() {
            record.set_prev(Side::Second, record.prev(Side::First));
            record.set_next(Side::Second, record.next(Side::First));
        }
        // The new record is live before anything points at it.
        write_record(&self.file, self.format, &record)?;
        for (node, head) in heads {
            if let Some(head) = head {
                let mut old = self.load(head)?;
                let old_sides: Vec<Side> = old.sides_of(node).collect();
                for old_side in old_sides {
                    old.set_prev(old_side, ChainLink::Prev(id));
                }
                write_record(&self.file, self.format, &old)?;
            }
            nodes.set_first_rel(node, Some(id))?;
        }
        self.metrics.relationship_created();
        Ok(())
    }

    /// Unlinks a relationship from both chains and frees its record.
    pub fn delete(&self, id: RelId, nodes: &NodeStore) -> Result<()> {
        let _write = nodes.write_lock();
        let record = self.load(id)?;
        let sides: &[Side] = if record.is_loop() {
            &[Side::First]
        } else {
            &Side::BOTH
        };
        for &side in sides {
            let node = record.node(side);
            let next = record.next(side);
            match record.prev(side) {
                ChainLink::Degree(degree) => {
                    if let Some(next) = next {
                        self.relink(next, node, |rec, s| {
                            rec.set_prev(s, ChainLink::Degree(degree.saturating_sub(1)))
                        })?;
                    }
                    nodes.set_first_rel(node, next)?;
                }
                ChainLink::Prev(prev) => {
                    self.relink(prev, node, |rec, s| rec.set_next(s, next))?;
                    if let Some(next) = next {
                        self.relink(next, node, |rec, s| rec.set_prev(s, ChainLink::Prev(prev)))?;
                    }
                    let head = nodes
                        .first_rel(node)?
                        .ok_or(StrandError::ChainCorruption { rel: id, node })?;
                    let mut head_record = self.load(head)?;
                    let degree = self.head_degree(&head_record, node)?;
                    let head_sides: Vec<Side> = head_record.sides_of(node).collect();
                    for s in head_sides {
                        head_record.set_prev(s, ChainLink::Degree(degree.saturating_sub(1)));
                    }
                    write_record(&self.file, self.format, &head_record)?;
                }
            }
        }
        write_record(&self.file, self.format, &RelationshipRecord::new(id))?;
        self.ids.lock().release(id.0);
        self.metrics.relationship_deleted();
        debug!(rel = id.0, "store.relationship.delete");
        Ok(())
    }

    /// Loads a live relationship record.
    pub fn load(&self, id: RelId) -> Result<RelationshipRecord> {
        let mut record = RelationshipRecord::default();
        self.cursor().next(id.0, &mut record, RecordLoad::Normal)?;
        Ok(record)
    }

    /// Opens a reusable relationship record reader.
    pub fn cursor(&self) -> RecordCursor<RelationshipRecord> {
        RecordCursor::new(Arc::clone(&self.file), self.format)
    }

    /// Record layout of this store.
    pub fn format(&self) -> RecordFormat {
        self.format
    }

    /// Paged file backing this store.
    pub fn file(&self) -> &Arc<PagedFile> {
        &self.file
    }

    fn head_degree(&self, head: &RelationshipRecord, node: NodeId) -> Result<u64> {
        let side = head.side_of(node).ok_or(StrandError::ChainCorruption {
            rel: head.id,
            node,
        })?;
        head.prev(side).degree().ok_or_else(|| {
            warn!(rel = head.id.0, node = node.0, "store.chain.head_without_degree");
            StrandError::ChainCorruption {
                rel: head.id,
                node,
            }
        })
    }

    fn relink(
        &self,
        id: RelId,
        node: NodeId,
        update: impl Fn(&mut RelationshipRecord, Side),
    ) -> Result<()> {
        let mut record = self.load(id)?;
        let sides: Vec<Side> = record.sides_of(node).collect();
        if sides.is_empty() {
            warn!(rel = id.0, node = node.0, "store.chain.foreign_record");
            return Err(StrandError::ChainCorruption { rel: id, node });
        }
        for side in sides {
            update(&mut record, side);
        }
        write_record(&self.file, self.format, &record)
    }
}
