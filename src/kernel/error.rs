use thiserror::Error;

use super::entity::PropValue;
use super::schema::IndexDescriptor;
use crate::types::{EntityKind, LabelId, NodeId, PropId, StrandError};

/// Errors raised by entity operations and constraint enforcement.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The entity does not exist or has been deleted.
    #[error("{kind} {id} not found")]
    EntityNotFound {
        /// Entity kind.
        kind: EntityKind,
        /// Raw entity id.
        id: u64,
    },
    /// No index is defined for the descriptor.
    #[error("no index for {0}")]
    IndexNotFound(IndexDescriptor),
    /// The index exists but is not online.
    #[error("index {index} is not online: {cause}")]
    IndexBroken {
        /// Index that is not usable.
        index: IndexDescriptor,
        /// Failure message or state recorded for the index.
        cause: String,
    },
    /// A constraint could not be checked; retrying once the index is back may succeed.
    #[error("unable to validate constraint")]
    ConstraintUnableToValidate(#[source] Box<KernelError>),
    /// Another node already has the value under the constraint.
    #[error("node {existing} already has label {label} and property {prop} = {value}")]
    UniqueConstraintViolation {
        /// Constrained label.
        label: LabelId,
        /// Constrained property key.
        prop: PropId,
        /// Conflicting value.
        value: PropValue,
        /// Node that already holds the value.
        existing: NodeId,
    },
    /// A node with the label lacks a required property at commit.
    #[error("node {node} with label {label} must have property {prop}")]
    PropertyExistenceViolation {
        /// Constrained label.
        label: LabelId,
        /// Required property key.
        prop: PropId,
        /// Offending node.
        node: NodeId,
    },
    /// The transaction was already committed or rolled back.
    #[error("transaction is closed")]
    TransactionClosed,
    /// Storage-level error.
    #[error(transparent)]
    Core(#[from] StrandError),
}

/// Result alias for kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;

impl KernelError {
    pub(crate) fn node_not_found(node: NodeId) -> Self {
        KernelError::EntityNotFound {
            kind: EntityKind::Node,
            id: node.0,
        }
    }

    /// Whether retrying the operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            KernelError::ConstraintUnableToValidate(_) => true,
            KernelError::Core(err) => err.is_retryable(),
            _ => false,
        }
    }
}
