//! Low-level primitives the record stores are built on.
//!
//! Includes order-preserving key encoders, page latches and the paged file
//! with its bounded cursors.

/// Order-preserving byte encoders for index keys.
pub mod bytes;

/// Page latches with optimistic read stamps.
pub mod concurrency;

/// Paged files and bounded page cursors.
pub mod pager;
