//! Uniqueness and property existence enforcement on the write path.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::entity::{EntityOperations, EntityRead, EntityWrite, PropValue, Property};
use super::error::{KernelError, Result};
use super::locks::{index_entry_resource_id, ResourceType};
use super::schema::{IndexDescriptor, IndexState, SchemaRead};
use super::transaction::Transaction;
use crate::storage::{Direction, RelationshipRecord};
use crate::types::{LabelId, NodeId, PropId, RelId, TypeId};

/// Wraps entity operations so label additions and property writes keep every
/// uniqueness constraint, and offers a get-or-create safe index lookup.
///
/// Validation holds an exclusive lock on the index entry until the
/// transaction ends, so a second writer of the same value waits and then
/// sees the first writer's node.
pub struct ConstraintEnforcingOperations<E> {
    inner: Arc<E>,
    schema: Arc<dyn SchemaRead>,
}

impl<E: EntityOperations> ConstraintEnforcingOperations<E> {
    /// Enforces `schema`'s constraints over `inner`.
    pub fn new(inner: Arc<E>, schema: Arc<dyn SchemaRead>) -> Self {
        Self { inner, schema }
    }

    /// The wrapped operations.
    pub fn inner(&self) -> &Arc<E> {
        &self.inner
    }

    /// Finds the node indexed under `value`, locking the index entry so a
    /// caller that gets `None` can create the node without racing another
    /// creator.
    ///
    /// A found node is returned with a shared lock held. `None` is returned
    /// with an exclusive lock held. Both last until the transaction ends.
    pub fn node_get_unique_from_index_lookup(
        &self,
        tx: &mut Transaction,
        index: &IndexDescriptor,
        value: &PropValue,
    ) -> Result<Option<NodeId>> {
        tx.ensure_open()?;
        self.assert_index_online(index)?;
        let resource = index_entry_resource_id(index.label, index.prop, value);
        let locks = tx.locks();

        locks.acquire_shared(ResourceType::IndexEntry, resource);
        if let Some(node) = self.inner.unique_index_lookup(index, value)? {
            return Ok(Some(node));
        }

        locks.release_shared(ResourceType::IndexEntry, resource);
        locks.acquire_exclusive(ResourceType::IndexEntry, resource);
        debug!(%index, resource, "constraints.lookup.escalated");
        let found = self.inner.unique_index_lookup(index, value)?;
        if found.is_some() {
            // Shared before exclusive is released, so the entry is never unlocked.
            locks.acquire_shared(ResourceType::IndexEntry, resource);
            locks.release_exclusive(ResourceType::IndexEntry, resource);
            debug!(%index, resource, "constraints.lookup.downgraded");
        }
        Ok(found)
    }

    /// Checks that no node other than `excluded` holds `value` under the
    /// uniqueness constraint on (`label`, `prop`).
    pub fn validate(
        &self,
        tx: &mut Transaction,
        label: LabelId,
        prop: PropId,
        value: &PropValue,
        excluded: NodeId,
    ) -> Result<()> {
        let index = IndexDescriptor { label, prop };
        self.assert_index_online(&index)
            .map_err(|cause| KernelError::ConstraintUnableToValidate(Box::new(cause)))?;

        let resource = index_entry_resource_id(label, prop, value);
        tx.locks().acquire_exclusive(ResourceType::IndexEntry, resource);

        match self.inner.unique_index_lookup(&index, value)? {
            Some(existing) if existing != excluded => {
                warn!(%label, %prop, %existing, node = %excluded, "constraints.unique.violation");
                Err(KernelError::UniqueConstraintViolation {
                    label,
                    prop,
                    value: value.clone(),
                    existing,
                })
            }
            _ => Ok(()),
        }
    }

    fn assert_index_online(&self, index: &IndexDescriptor) -> Result<()> {
        let cause = match self.schema.index_state(index)? {
            IndexState::Online => return Ok(()),
            IndexState::Populating => "index is still populating".to_owned(),
            IndexState::Failed => self.schema.index_failure(index)?,
        };
        Err(KernelError::IndexBroken {
            index: *index,
            cause,
        })
    }
}

impl<E: EntityOperations> EntityRead for ConstraintEnforcingOperations<E> {
    fn node_exists(&self, node: NodeId) -> Result<bool> {
        self.inner.node_exists(node)
    }

    fn node_labels(&self, node: NodeId) -> Result<Vec<LabelId>> {
        self.inner.node_labels(node)
    }

    fn node_has_label(&self, node: NodeId, label: LabelId) -> Result<bool> {
        self.inner.node_has_label(node, label)
    }

    fn node_property(&self, node: NodeId, prop: PropId) -> Result<Option<PropValue>> {
        self.inner.node_property(node, prop)
    }

    fn node_properties(&self, node: NodeId) -> Result<Vec<Property>> {
        self.inner.node_properties(node)
    }

    fn unique_index_lookup(&self, index: &IndexDescriptor, value: &PropValue) -> Result<Option<NodeId>> {
        self.inner.unique_index_lookup(index, value)
    }

    fn nodes_with_label(&self, label: LabelId) -> Result<Vec<NodeId>> {
        self.inner.nodes_with_label(label)
    }

    fn relationship(&self, rel: RelId) -> Result<RelationshipRecord> {
        self.inner.relationship(rel)
    }

    fn node_relationships(
        &self,
        node: NodeId,
        direction: Direction,
        rel_type: Option<TypeId>,
    ) -> Result<Vec<RelId>> {
        self.inner.node_relationships(node, direction, rel_type)
    }

    fn node_degree(&self, node: NodeId, direction: Direction, rel_type: TypeId) -> Result<u64> {
        self.inner.node_degree(node, direction, rel_type)
    }
}

impl<E: EntityOperations> EntityWrite for ConstraintEnforcingOperations<E> {
    fn node_create(&self, tx: &mut Transaction) -> Result<NodeId> {
        self.inner.node_create(tx)
    }

    fn node_delete(&self, tx: &mut Transaction, node: NodeId) -> Result<()> {
        self.inner.node_delete(tx, node)
    }

    fn node_add_label(&self, tx: &mut Transaction, node: NodeId, label: LabelId) -> Result<bool> {
        tx.ensure_open()?;
        for constraint in self.schema.uniqueness_constraints(label) {
            if let Some(value) = self.inner.node_property(node, constraint.prop)? {
                self.validate(tx, label, constraint.prop, &value, node)?;
            }
        }
        self.inner.node_add_label(tx, node, label)
    }

    fn node_remove_label(&self, tx: &mut Transaction, node: NodeId, label: LabelId) -> Result<bool> {
        self.inner.node_remove_label(tx, node, label)
    }

    fn node_set_property(
        &self,
        tx: &mut Transaction,
        node: NodeId,
        property: Property,
    ) -> Result<Option<PropValue>> {
        tx.ensure_open()?;
        for label in self.inner.node_labels(node)? {
            if self.schema.has_uniqueness_constraint(label, property.key) {
                self.validate(tx, label, property.key, &property.value, node)?;
            }
        }
        self.inner.node_set_property(tx, node, property)
    }

    fn node_remove_property(
        &self,
        tx: &mut Transaction,
        node: NodeId,
        prop: PropId,
    ) -> Result<Option<PropValue>> {
        self.inner.node_remove_property(tx, node, prop)
    }

    fn relationship_create(
        &self,
        tx: &mut Transaction,
        rel_type: TypeId,
        first: NodeId,
        second: NodeId,
    ) -> Result<RelId> {
        self.inner.relationship_create(tx, rel_type, first, second)
    }

    fn relationship_delete(&self, tx: &mut Transaction, rel: RelId) -> Result<()> {
        self.inner.relationship_delete(tx, rel)
    }
}

/// Commit-time check that labelled nodes carry their required properties.
pub struct PropertyExistenceEnforcer {
    schema: Arc<dyn SchemaRead>,
}

impl PropertyExistenceEnforcer {
    /// Checks against `schema`'s existence constraints.
    pub fn new(schema: Arc<dyn SchemaRead>) -> Self {
        Self { schema }
    }

    /// Fails on the first touched node that lacks a required property.
    /// Nodes deleted since they were touched are skipped.
    pub fn check(&self, entities: &dyn EntityRead, touched: &BTreeSet<NodeId>) -> Result<()> {
        for &node in touched {
            if !entities.node_exists(node)? {
                continue;
            }
            for label in entities.node_labels(node)? {
                for constraint in self.schema.existence_constraints(label) {
                    if entities.node_property(node, constraint.prop)?.is_none() {
                        warn!(%node, %label, prop = %constraint.prop, "constraints.existence.violation");
                        return Err(KernelError::PropertyExistenceViolation {
                            label,
                            prop: constraint.prop,
                            node,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
