//! Index and constraint definitions and the schema oracle.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use parking_lot::RwLock;
use tracing::debug;

use super::error::{KernelError, Result};
use crate::types::{LabelId, PropId};

/// A single-property index on a label.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct IndexDescriptor {
    /// Indexed label.
    pub label: LabelId,
    /// Indexed property key.
    pub prop: PropId,
}

impl fmt::Display for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":label[{}](prop[{}])", self.label, self.prop)
    }
}

/// Lifecycle state of an index.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IndexState {
    /// Usable for lookups.
    Online,
    /// Still being built.
    Populating,
    /// Building failed; see [`SchemaRead::index_failure`].
    Failed,
}

/// At most one node with `label` has a given value for `prop`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct UniquenessConstraint {
    /// Constrained label.
    pub label: LabelId,
    /// Constrained property key.
    pub prop: PropId,
}

impl UniquenessConstraint {
    /// Index backing the constraint.
    pub fn index(&self) -> IndexDescriptor {
        IndexDescriptor {
            label: self.label,
            prop: self.prop,
        }
    }
}

/// Every node with `label` must have `prop` when its transaction commits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PropertyExistenceConstraint {
    /// Constrained label.
    pub label: LabelId,
    /// Required property key.
    pub prop: PropId,
}

/// Read access to index states and constraint definitions.
pub trait SchemaRead: Send + Sync {
    /// Current state of `index`, or [`KernelError::IndexNotFound`].
    fn index_state(&self, index: &IndexDescriptor) -> Result<IndexState>;

    /// Recorded failure for `index`; empty when none was recorded.
    fn index_failure(&self, index: &IndexDescriptor) -> Result<String>;

    /// Uniqueness constraints on `label`.
    fn uniqueness_constraints(&self, label: LabelId) -> Vec<UniquenessConstraint>;

    /// Whether (`label`, `prop`) is under a uniqueness constraint.
    fn has_uniqueness_constraint(&self, label: LabelId, prop: PropId) -> bool {
        self.uniqueness_constraints(label)
            .iter()
            .any(|constraint| constraint.prop == prop)
    }

    /// Property existence constraints on `label`.
    fn existence_constraints(&self, label: LabelId) -> Vec<PropertyExistenceConstraint>;
}

#[derive(Debug)]
struct IndexEntry {
    state: IndexState,
    failure: Option<String>,
}

#[derive(Debug, Default)]
struct SchemaInner {
    indexes: HashMap<IndexDescriptor, IndexEntry>,
    unique: BTreeSet<UniquenessConstraint>,
    existence: BTreeSet<PropertyExistenceConstraint>,
}

/// In-memory schema.
#[derive(Debug, Default)]
pub struct SchemaState {
    inner: RwLock<SchemaInner>,
}

impl SchemaState {
    /// An empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines `index` in the populating state. Existing indexes are left alone.
    pub fn create_index(&self, index: IndexDescriptor) {
        self.inner
            .write()
            .indexes
            .entry(index)
            .or_insert(IndexEntry {
                state: IndexState::Populating,
                failure: None,
            });
        debug!(%index, "schema.index.create");
    }

    /// Moves `index` to `state`, clearing any failure unless the state is `Failed`.
    pub fn set_index_state(&self, index: &IndexDescriptor, state: IndexState) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .indexes
            .get_mut(index)
            .ok_or(KernelError::IndexNotFound(*index))?;
        entry.state = state;
        if state != IndexState::Failed {
            entry.failure = None;
        }
        debug!(%index, ?state, "schema.index.state");
        Ok(())
    }

    /// Marks `index` failed with `cause`.
    pub fn fail_index(&self, index: &IndexDescriptor, cause: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .indexes
            .get_mut(index)
            .ok_or(KernelError::IndexNotFound(*index))?;
        entry.state = IndexState::Failed;
        entry.failure = Some(cause.into());
        Ok(())
    }

    /// Drops `index`.
    pub fn drop_index(&self, index: &IndexDescriptor) -> bool {
        self.inner.write().indexes.remove(index).is_some()
    }

    /// Adds a uniqueness constraint with an online backing index.
    pub fn add_uniqueness_constraint(&self, label: LabelId, prop: PropId) -> UniquenessConstraint {
        let constraint = UniquenessConstraint { label, prop };
        let mut inner = self.inner.write();
        inner.unique.insert(constraint);
        inner.indexes.insert(
            constraint.index(),
            IndexEntry {
                state: IndexState::Online,
                failure: None,
            },
        );
        debug!(label = label.0, prop = prop.0, "schema.constraint.unique");
        constraint
    }

    /// Removes a uniqueness constraint, keeping its index.
    pub fn drop_uniqueness_constraint(&self, label: LabelId, prop: PropId) -> bool {
        self.inner
            .write()
            .unique
            .remove(&UniquenessConstraint { label, prop })
    }

    /// Adds a property existence constraint.
    pub fn add_existence_constraint(&self, label: LabelId, prop: PropId) -> PropertyExistenceConstraint {
        let constraint = PropertyExistenceConstraint { label, prop };
        self.inner.write().existence.insert(constraint);
        debug!(label = label.0, prop = prop.0, "schema.constraint.exists");
        constraint
    }
}

impl SchemaRead for SchemaState {
    fn index_state(&self, index: &IndexDescriptor) -> Result<IndexState> {
        self.inner
            .read()
            .indexes
            .get(index)
            .map(|entry| entry.state)
            .ok_or(KernelError::IndexNotFound(*index))
    }

    fn index_failure(&self, index: &IndexDescriptor) -> Result<String> {
        let inner = self.inner.read();
        let entry = inner
            .indexes
            .get(index)
            .ok_or(KernelError::IndexNotFound(*index))?;
        Ok(entry.failure.clone().unwrap_or_default())
    }

    fn uniqueness_constraints(&self, label: LabelId) -> Vec<UniquenessConstraint> {
        self.inner
            .read()
            .unique
            .iter()
            .filter(|constraint| constraint.label == label)
            .copied()
            .collect()
    }

    fn existence_constraints(&self, label: LabelId) -> Vec<PropertyExistenceConstraint> {
        self.inner
            .read()
            .existence
            .iter()
            .filter(|constraint| constraint.label == label)
            .copied()
            .collect()
    }
}
