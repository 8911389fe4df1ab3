//! Entity operations, transactions, locks and constraint enforcement over the
//! record stores.
//!
//! [`Kernel`] wires a [`StoreEntities`] to an in-memory [`SchemaState`], a
//! [`LockManager`] and the [`ConstraintEnforcingOperations`] decorator. Writes
//! go through [`Kernel::operations`] with an explicit [`Transaction`].

/// Uniqueness and existence constraint enforcement.
pub mod constraints;
/// Property values and entity operations.
pub mod entity;
/// Kernel error type.
pub mod error;
/// Transaction-scoped resource locks.
pub mod locks;
/// Indexes and constraint definitions.
pub mod schema;
/// Transactions.
pub mod transaction;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

pub use constraints::{ConstraintEnforcingOperations, PropertyExistenceEnforcer};
pub use entity::{EntityOperations, EntityRead, EntityWrite, PropValue, Property, StoreEntities};
pub use error::{KernelError, Result};
pub use locks::{
    index_entry_resource_id, LockClient, LockManager, LockMode, ManagedClient, Resource,
    ResourceType,
};
pub use schema::{
    IndexDescriptor, IndexState, PropertyExistenceConstraint, SchemaRead, SchemaState,
    UniquenessConstraint,
};
pub use transaction::{Transaction, TransactionHooks, Undo};

use crate::storage::StoreOptions;
use crate::types::NodeId;

struct KernelHooks {
    entities: Arc<StoreEntities>,
    existence: PropertyExistenceEnforcer,
}

impl TransactionHooks for KernelHooks {
    fn before_commit(&self, touched: &BTreeSet<NodeId>) -> Result<()> {
        self.existence.check(self.entities.as_ref(), touched)
    }

    fn undo(&self, change: Undo) -> Result<()> {
        self.entities.apply_undo(change)
    }
}

/// Stores, schema and locks behind constraint-enforcing entity operations.
pub struct Kernel {
    entities: Arc<StoreEntities>,
    schema: Arc<SchemaState>,
    locks: LockManager,
    operations: ConstraintEnforcingOperations<StoreEntities>,
    hooks: Arc<KernelHooks>,
}

impl Kernel {
    /// Opens empty stores with `options` and an empty schema.
    pub fn open(options: &StoreOptions) -> Result<Self> {
        let entities = Arc::new(StoreEntities::open(options)?);
        let schema = Arc::new(SchemaState::new());
        let locks = LockManager::with_metrics(Arc::clone(&options.metrics));
        let operations = ConstraintEnforcingOperations::new(Arc::clone(&entities), schema.clone());
        let hooks = Arc::new(KernelHooks {
            entities: Arc::clone(&entities),
            existence: PropertyExistenceEnforcer::new(schema.clone()),
        });
        debug!(format = ?options.record_format, "kernel.open");
        Ok(Self {
            entities,
            schema,
            locks,
            operations,
            hooks,
        })
    }

    /// Starts a transaction with a fresh client of the kernel's lock manager.
    pub fn begin(&self) -> Transaction {
        self.begin_with(Box::new(self.locks.client()))
    }

    /// Starts a transaction that locks through `locks`.
    pub fn begin_with(&self, locks: Box<dyn LockClient>) -> Transaction {
        Transaction::with_hooks(locks, self.hooks.clone())
    }

    /// Constraint-enforcing entity operations.
    pub fn operations(&self) -> &ConstraintEnforcingOperations<StoreEntities> {
        &self.operations
    }

    /// The schema.
    pub fn schema(&self) -> &Arc<SchemaState> {
        &self.schema
    }

    /// Unchecked entity operations.
    pub fn entities(&self) -> &Arc<StoreEntities> {
        &self.entities
    }

    /// The lock manager transactions draw clients from.
    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }
}
