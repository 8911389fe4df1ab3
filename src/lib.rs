//! Strand: paged record storage for a property graph.
//!
//! The crate is layered bottom-up:
//!
//! - [`primitives`]: page latches, bounded page cursors over a paged file,
//!   and order-preserving byte encodings.
//! - [`storage`]: fixed-size node and relationship records, record loaders,
//!   stores that maintain per-node relationship chains, and the chain cursor.
//! - [`kernel`]: entity operations, transactions, transaction-scoped locks and
//!   uniqueness constraint enforcement.
//! - [`types`]: ids and the storage error type.

#![warn(missing_docs)]

pub mod kernel;
pub mod primitives;
pub mod storage;
pub mod types;
