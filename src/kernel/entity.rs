//! Property values, entity read/write operations and the store-backed implementation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use parking_lot::RwLock;
use tracing::debug;

use super::error::{KernelError, Result};
use super::schema::IndexDescriptor;
use super::transaction::{Transaction, Undo};
use crate::primitives::bytes::ord;
use crate::storage::{
    chain, ChainIter, Direction, NodeStore, RelationshipRecord, RelationshipStore, StoreOptions,
};
use crate::types::{LabelId, NodeId, PropId, RelId, StrandError, TypeId};

/// A property value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    /// No value. Its canonical string is empty.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl PropValue {
    /// Canonical string form used to derive index entry lock ids.
    pub fn value_as_string(&self) -> String {
        self.to_string()
    }

    /// Whether this is [`PropValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, PropValue::Null)
    }

    /// Order-preserving index key: a type tag followed by the encoded value.
    pub fn index_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(16);
        match self {
            PropValue::Null => key.push(0),
            PropValue::Bool(v) => {
                key.push(1);
                key.push(u8::from(*v));
            }
            PropValue::Int(v) => {
                key.push(2);
                ord::push_i64(&mut key, *v);
            }
            PropValue::Float(v) => {
                key.push(3);
                ord::push_f64(&mut key, *v);
            }
            PropValue::Str(v) => {
                key.push(4);
                ord::push_str(&mut key, v);
            }
            PropValue::Bytes(v) => {
                key.push(5);
                ord::push_bytes(&mut key, v);
            }
        }
        key
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Null => Ok(()),
            PropValue::Bool(v) => write!(f, "{v}"),
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Float(v) => write!(f, "{v}"),
            PropValue::Str(v) => f.write_str(v),
            PropValue::Bytes(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_owned())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

/// A property key with its value.
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    /// Property key.
    pub key: PropId,
    /// Value.
    pub value: PropValue,
}

impl Property {
    /// Pairs `key` with `value`.
    pub fn new(key: PropId, value: impl Into<PropValue>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

/// Read side of entity access.
pub trait EntityRead: Send + Sync {
    /// Whether `node` exists.
    fn node_exists(&self, node: NodeId) -> Result<bool>;

    /// Labels on `node`, ascending.
    fn node_labels(&self, node: NodeId) -> Result<Vec<LabelId>>;

    /// Whether `node` has `label`.
    fn node_has_label(&self, node: NodeId, label: LabelId) -> Result<bool>;

    /// Value of `prop` on `node`, if set.
    fn node_property(&self, node: NodeId, prop: PropId) -> Result<Option<PropValue>>;

    /// Every property on `node`, by key.
    fn node_properties(&self, node: NodeId) -> Result<Vec<Property>>;

    /// The node indexed under `value` in `index`, if any.
    fn unique_index_lookup(&self, index: &IndexDescriptor, value: &PropValue) -> Result<Option<NodeId>>;

    /// Nodes carrying `label`, ascending.
    fn nodes_with_label(&self, label: LabelId) -> Result<Vec<NodeId>>;

    /// A live relationship record.
    fn relationship(&self, rel: RelId) -> Result<RelationshipRecord>;

    /// Relationships of `node` in `direction`, optionally of one type, in chain order.
    fn node_relationships(
        &self,
        node: NodeId,
        direction: Direction,
        rel_type: Option<TypeId>,
    ) -> Result<Vec<RelId>>;

    /// Number of `node`'s relationships of `rel_type` in `direction`.
    fn node_degree(&self, node: NodeId, direction: Direction, rel_type: TypeId) -> Result<u64>;
}

/// Write side of entity access. Every change is logged on the transaction.
pub trait EntityWrite: Send + Sync {
    /// Creates a node.
    fn node_create(&self, tx: &mut Transaction) -> Result<NodeId>;

    /// Deletes a node that has no relationships.
    fn node_delete(&self, tx: &mut Transaction, node: NodeId) -> Result<()>;

    /// Adds `label`; `false` when already present.
    fn node_add_label(&self, tx: &mut Transaction, node: NodeId, label: LabelId) -> Result<bool>;

    /// Removes `label`; `false` when absent.
    fn node_remove_label(&self, tx: &mut Transaction, node: NodeId, label: LabelId) -> Result<bool>;

    /// Sets a property, returning the previous value.
    fn node_set_property(
        &self,
        tx: &mut Transaction,
        node: NodeId,
        property: Property,
    ) -> Result<Option<PropValue>>;

    /// Removes a property, returning the removed value.
    fn node_remove_property(
        &self,
        tx: &mut Transaction,
        node: NodeId,
        prop: PropId,
    ) -> Result<Option<PropValue>>;

    /// Creates a relationship from `first` to `second`.
    fn relationship_create(
        &self,
        tx: &mut Transaction,
        rel_type: TypeId,
        first: NodeId,
        second: NodeId,
    ) -> Result<RelId>;

    /// Deletes a relationship.
    fn relationship_delete(&self, tx: &mut Transaction, rel: RelId) -> Result<()>;
}

/// Full entity access.
pub trait EntityOperations: EntityRead + EntityWrite {}

impl<T: EntityRead + EntityWrite> EntityOperations for T {}

type IndexKey = (LabelId, PropId, Vec<u8>);

#[derive(Debug, Default)]
struct EntityState {
    labels: HashMap<NodeId, BTreeSet<LabelId>>,
    props: HashMap<NodeId, BTreeMap<PropId, PropValue>>,
    index: BTreeMap<IndexKey, BTreeSet<NodeId>>,
}

impl EntityState {
    fn index_insert(&mut self, node: NodeId, label: LabelId, prop: PropId, value: &PropValue) {
        self.index
            .entry((label, prop, value.index_key()))
            .or_default()
            .insert(node);
    }

    fn index_remove(&mut self, node: NodeId, label: LabelId, prop: PropId, value: &PropValue) {
        let key = (label, prop, value.index_key());
        if let Some(nodes) = self.index.get_mut(&key) {
            nodes.remove(&node);
            if nodes.is_empty() {
                self.index.remove(&key);
            }
        }
    }

    fn node_props(&self, node: NodeId) -> Vec<(PropId, PropValue)> {
        self.props
            .get(&node)
            .map(|props| props.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default()
    }

    fn add_label(&mut self, node: NodeId, label: LabelId) -> bool {
        if !self.labels.entry(node).or_default().insert(label) {
            return false;
        }
        for (prop, value) in self.node_props(node) {
            self.index_insert(node, label, prop, &value);
        }
        true
    }

    fn remove_label(&mut self, node: NodeId, label: LabelId) -> bool {
        let removed = self
            .labels
            .get_mut(&node)
            .is_some_and(|labels| labels.remove(&label));
        if removed {
            for (prop, value) in self.node_props(node) {
                self.index_remove(node, label, prop, &value);
            }
        }
        removed
    }

    fn set_prop(&mut self, node: NodeId, prop: PropId, value: PropValue) -> Option<PropValue> {
        let previous = self.props.entry(node).or_default().insert(prop, value.clone());
        let labels: Vec<LabelId> = self.labels.get(&node).into_iter().flatten().copied().collect();
        for label in labels {
            if let Some(old) = &previous {
                self.index_remove(node, label, prop, old);
            }
            self.index_insert(node, label, prop, &value);
        }
        previous
    }

    fn remove_prop(&mut self, node: NodeId, prop: PropId) -> Option<PropValue> {
        let previous = self.props.get_mut(&node)?.remove(&prop)?;
        let labels: Vec<LabelId> = self.labels.get(&node).into_iter().flatten().copied().collect();
        for label in labels {
            self.index_remove(node, label, prop, &previous);
        }
        Some(previous)
    }

    fn forget(&mut self, node: NodeId) -> (Vec<LabelId>, Vec<(PropId, PropValue)>) {
        let props = self.node_props(node);
        let labels: Vec<LabelId> = self.labels.remove(&node).into_iter().flatten().collect();
        for &label in &labels {
            for (prop, value) in &props {
                self.index_remove(node, label, *prop, value);
            }
        }
        self.props.remove(&node);
        (labels, props)
    }
}

/// Entity operations over a node store and a relationship store, with
/// labels, properties and the property index held in memory.
pub struct StoreEntities {
    nodes: NodeStore,
    rels: RelationshipStore,
    state: RwLock<EntityState>,
}

impl StoreEntities {
    /// Opens empty stores with `options`.
    pub fn open(options: &StoreOptions) -> Result<Self> {
        Ok(Self {
            nodes: NodeStore::open(options)?,
            rels: RelationshipStore::open(options)?,
            state: RwLock::new(EntityState::default()),
        })
    }

    /// The node store.
    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    /// The relationship store.
    pub fn relationships(&self) -> &RelationshipStore {
        &self.rels
    }

    /// Reverts one logged change without logging anything.
    pub fn apply_undo(&self, change: Undo) -> Result<()> {
        debug!(change = ?change, "entity.undo");
        match change {
            Undo::NodeCreated(node) => {
                self.state.write().forget(node);
                self.nodes.delete(node)?;
            }
            Undo::NodeDeleted {
                node,
                labels,
                props,
            } => {
                self.nodes.restore(node)?;
                let mut state = self.state.write();
                for (prop, value) in props {
                    state.set_prop(node, prop, value);
                }
                for label in labels {
                    state.add_label(node, label);
                }
            }
            Undo::LabelAdded(node, label) => {
                self.state.write().remove_label(node, label);
            }
            Undo::LabelRemoved(node, label) => {
                self.state.write().add_label(node, label);
            }
            Undo::PropertyChanged {
                node,
                prop,
                previous,
            } => {
                let mut state = self.state.write();
                match previous {
                    Some(value) => {
                        state.set_prop(node, prop, value);
                    }
                    None => {
                        state.remove_prop(node, prop);
                    }
                }
            }
            Undo::RelationshipCreated(rel) => self.rels.delete(rel, &self.nodes)?,
            Undo::RelationshipDeleted {
                rel,
                first,
                second,
                rel_type,
            } => self.rels.restore(rel, first, second, rel_type, &self.nodes)?,
        }
        Ok(())
    }

    fn require_node(&self, node: NodeId) -> Result<()> {
        if self.nodes.exists(node)? {
            Ok(())
        } else {
            Err(KernelError::node_not_found(node))
        }
    }
}

fn entity_error(err: StrandError) -> KernelError {
    match err {
        StrandError::RecordNotInUse { kind, id } => KernelError::EntityNotFound { kind, id },
        other => KernelError::Core(other),
    }
}

impl EntityRead for StoreEntities {
    fn node_exists(&self, node: NodeId) -> Result<bool> {
        Ok(self.nodes.exists(node)?)
    }

    fn node_labels(&self, node: NodeId) -> Result<Vec<LabelId>> {
        self.require_node(node)?;
        let state = self.state.read();
        Ok(state.labels.get(&node).into_iter().flatten().copied().collect())
    }

    fn node_has_label(&self, node: NodeId, label: LabelId) -> Result<bool> {
        self.require_node(node)?;
        let state = self.state.read();
        Ok(state.labels.get(&node).is_some_and(|labels| labels.contains(&label)))
    }

    fn node_property(&self, node: NodeId, prop: PropId) -> Result<Option<PropValue>> {
        self.require_node(node)?;
        let state = self.state.read();
        Ok(state.props.get(&node).and_then(|props| props.get(&prop)).cloned())
    }

    fn node_properties(&self, node: NodeId) -> Result<Vec<Property>> {
        self.require_node(node)?;
        let state = self.state.read();
        Ok(state
            .node_props(node)
            .into_iter()
            .map(|(key, value)| Property { key, value })
            .collect())
    }

    fn unique_index_lookup(&self, index: &IndexDescriptor, value: &PropValue) -> Result<Option<NodeId>> {
        let state = self.state.read();
        let key = (index.label, index.prop, value.index_key());
        Ok(state
            .index
            .get(&key)
            .and_then(|nodes| nodes.iter().next().copied()))
    }

    fn nodes_with_label(&self, label: LabelId) -> Result<Vec<NodeId>> {
        let state = self.state.read();
        let mut nodes: Vec<NodeId> = state
            .labels
            .iter()
            .filter(|(_, labels)| labels.contains(&label))
            .map(|(node, _)| *node)
            .collect();
        nodes.sort_unstable();
        Ok(nodes)
    }

    fn relationship(&self, rel: RelId) -> Result<RelationshipRecord> {
        self.rels.load(rel).map_err(entity_error)
    }

    fn node_relationships(
        &self,
        node: NodeId,
        direction: Direction,
        rel_type: Option<TypeId>,
    ) -> Result<Vec<RelId>> {
        let first = self.nodes.first_rel(node).map_err(entity_error)?;
        let mut loader = self.rels.cursor();
        let mut iter = ChainIter::new(&mut loader, node, first).direction(direction);
        if let Some(rel_type) = rel_type {
            iter = iter.rel_type(rel_type);
        }
        let mut ids = Vec::new();
        for record in iter {
            ids.push(record?.id);
        }
        Ok(ids)
    }

    fn node_degree(&self, node: NodeId, direction: Direction, rel_type: TypeId) -> Result<u64> {
        let first = self.nodes.first_rel(node).map_err(entity_error)?;
        let mut loader = self.rels.cursor();
        Ok(chain::degree(&mut loader, node, first, direction, rel_type)?)
    }
}

impl EntityWrite for StoreEntities {
    fn node_create(&self, tx: &mut Transaction) -> Result<NodeId> {
        tx.ensure_open()?;
        let node = self.nodes.create()?;
        tx.record(Undo::NodeCreated(node));
        Ok(node)
    }

    fn node_delete(&self, tx: &mut Transaction, node: NodeId) -> Result<()> {
        tx.ensure_open()?;
        self.nodes.delete(node).map_err(entity_error)?;
        let (labels, props) = self.state.write().forget(node);
        tx.record(Undo::NodeDeleted {
            node,
            labels,
            props,
        });
        Ok(())
    }

    fn node_add_label(&self, tx: &mut Transaction, node: NodeId, label: LabelId) -> Result<bool> {
        tx.ensure_open()?;
        self.require_node(node)?;
        let added = self.state.write().add_label(node, label);
        if added {
            tx.record(Undo::LabelAdded(node, label));
            tx.touch(node);
        }
        Ok(added)
    }

    fn node_remove_label(&self, tx: &mut Transaction, node: NodeId, label: LabelId) -> Result<bool> {
        tx.ensure_open()?;
        self.require_node(node)?;
        let removed = self.state.write().remove_label(node, label);
        if removed {
            tx.record(Undo::LabelRemoved(node, label));
            tx.touch(node);
        }
        Ok(removed)
    }

    fn node_set_property(
        &self,
        tx: &mut Transaction,
        node: NodeId,
        property: Property,
    ) -> Result<Option<PropValue>> {
        tx.ensure_open()?;
        self.require_node(node)?;
        let previous = self
            .state
            .write()
            .set_prop(node, property.key, property.value);
        tx.record(Undo::PropertyChanged {
            node,
            prop: property.key,
            previous: previous.clone(),
        });
        tx.touch(node);
        Ok(previous)
    }

    fn node_remove_property(
        &self,
        tx: &mut Transaction,
        node: NodeId,
        prop: PropId,
    ) -> Result<Option<PropValue>> {
        tx.ensure_open()?;
        self.require_node(node)?;
        let removed = self.state.write().remove_prop(node, prop);
        if let Some(value) = &removed {
            tx.record(Undo::PropertyChanged {
                node,
                prop,
                previous: Some(value.clone()),
            });
            tx.touch(node);
        }
        Ok(removed)
    }

    fn relationship_create(
        &self,
        tx: &mut Transaction,
        rel_type: TypeId,
        first: NodeId,
        second: NodeId,
    ) -> Result<RelId> {
        tx.ensure_open()?;
        self.require_node(first)?;
        self.require_node(second)?;
        let rel = self.rels.create(first, second, rel_type, &self.nodes)?;
        tx.record(Undo::RelationshipCreated(rel));
        Ok(rel)
    }

    fn relationship_delete(&self, tx: &mut Transaction, rel: RelId) -> Result<()> {
        tx.ensure_open()?;
        let record = self.rels.load(rel).map_err(entity_error)?;
        self.rels.delete(rel, &self.nodes)?;
        tx.record(Undo::RelationshipDeleted {
            rel,
            first: record.first_node,
            second: record.second_node,
            rel_type: record.rel_type,
        });
        Ok(())
    }
}
