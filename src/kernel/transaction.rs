//! Transactions: lock ownership, undo logging and commit checks.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::entity::PropValue;
use super::error::{KernelError, Result};
use super::locks::LockClient;
use crate::types::{LabelId, NodeId, PropId, RelId, TypeId};

/// One reversible change made by a transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum Undo {
    /// A node was created.
    NodeCreated(NodeId),
    /// A node was deleted along with its labels and properties.
    NodeDeleted {
        /// Deleted node.
        node: NodeId,
        /// Labels it had.
        labels: Vec<LabelId>,
        /// Properties it had.
        props: Vec<(PropId, PropValue)>,
    },
    /// A label was added.
    LabelAdded(NodeId, LabelId),
    /// A label was removed.
    LabelRemoved(NodeId, LabelId),
    /// A property was set or removed; `previous` is what to restore.
    PropertyChanged {
        /// Node whose property changed.
        node: NodeId,
        /// Property key.
        prop: PropId,
        /// Value before the change, `None` when absent.
        previous: Option<PropValue>,
    },
    /// A relationship was created.
    RelationshipCreated(RelId),
    /// A relationship was deleted.
    RelationshipDeleted {
        /// Deleted relationship.
        rel: RelId,
        /// Source node.
        first: NodeId,
        /// Target node.
        second: NodeId,
        /// Relationship type.
        rel_type: TypeId,
    },
}

/// Callbacks a transaction runs when it finishes.
pub trait TransactionHooks: Send + Sync {
    /// Checks commit-time constraints over the nodes the transaction touched.
    fn before_commit(&self, touched: &BTreeSet<NodeId>) -> Result<()>;

    /// Reverts one change.
    fn undo(&self, change: Undo) -> Result<()>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum TxState {
    Open,
    Committed,
    RolledBack,
}

/// A unit of work holding locks until it commits or rolls back.
///
/// Dropping an open transaction rolls it back.
pub struct Transaction {
    locks: Box<dyn LockClient>,
    undo: Vec<Undo>,
    touched: BTreeSet<NodeId>,
    hooks: Option<Arc<dyn TransactionHooks>>,
    state: TxState,
}

impl Transaction {
    /// A transaction with no commit checks; rollback only releases locks.
    pub fn new(locks: Box<dyn LockClient>) -> Self {
        Self {
            locks,
            undo: Vec::new(),
            touched: BTreeSet::new(),
            hooks: None,
            state: TxState::Open,
        }
    }

    /// A transaction that validates and undoes through `hooks`.
    pub fn with_hooks(locks: Box<dyn LockClient>, hooks: Arc<dyn TransactionHooks>) -> Self {
        let mut tx = Self::new(locks);
        tx.hooks = Some(hooks);
        tx
    }

    /// The transaction's lock client.
    pub fn locks(&mut self) -> &mut dyn LockClient {
        self.locks.as_mut()
    }

    /// Fails with [`KernelError::TransactionClosed`] once finished.
    pub fn ensure_open(&self) -> Result<()> {
        match self.state {
            TxState::Open => Ok(()),
            _ => Err(KernelError::TransactionClosed),
        }
    }

    /// Whether the transaction can still do work.
    pub fn is_open(&self) -> bool {
        self.state == TxState::Open
    }

    /// Logs a change for rollback.
    pub fn record(&mut self, change: Undo) {
        self.undo.push(change);
    }

    /// Marks `node` for commit-time constraint checks.
    pub fn touch(&mut self, node: NodeId) {
        self.touched.insert(node);
    }

    /// Nodes whose labels or properties changed.
    pub fn touched(&self) -> &BTreeSet<NodeId> {
        &self.touched
    }

    /// Number of logged changes.
    pub fn changes(&self) -> usize {
        self.undo.len()
    }

    /// Runs commit checks and releases every lock. A failed check rolls the
    /// transaction back and returns the check's error.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let Some(hooks) = self.hooks.clone() {
            if let Err(err) = hooks.before_commit(&self.touched) {
                warn!(error = %err, "tx.commit.rejected");
                self.rollback()?;
                return Err(err);
            }
        }
        self.undo.clear();
        self.finish(TxState::Committed);
        Ok(())
    }

    /// Reverts every logged change, newest first, and releases every lock.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mut first_error = None;
        if let Some(hooks) = self.hooks.clone() {
            while let Some(change) = self.undo.pop() {
                if let Err(err) = hooks.undo(change) {
                    warn!(error = %err, "tx.rollback.undo_failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        self.undo.clear();
        self.finish(TxState::RolledBack);
        first_error.map_or(Ok(()), Err)
    }

    fn finish(&mut self, state: TxState) {
        self.locks.release_all();
        self.touched.clear();
        self.state = state;
        debug!(state = ?state, "tx.finish");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(err) = self.rollback() {
                warn!(error = %err, "tx.drop.rollback_failed");
            }
        }
    }
}
