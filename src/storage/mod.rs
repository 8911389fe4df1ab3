//! Record storage: layouts, loaders, stores and chain walks.
//!
//! Relationships and nodes live in fixed-size records packed into the pages
//! of a [`PagedFile`](crate::primitives::pager::PagedFile). Reads go through
//! [`RecordCursor`], which validates every optimistic page read before
//! decoding. Writes go through [`NodeStore`] and [`RelationshipStore`], which
//! keep the per-node relationship chains and their degrees consistent.

/// Walking per-node relationship chains.
pub mod chain;

/// On-page record layouts.
pub mod format;

/// Record loading over a paged file.
pub mod loader;

/// In-memory relationship and node records.
pub mod record;

/// Node and relationship stores.
pub mod store;

mod metrics;
mod options;

pub use chain::{
    degree, select, summarize, ChainIter, ChainSummary, DegreeCounts, Direction,
    RelationshipCursor, RelationshipSelector,
};
pub use format::{RawNode, RawRelationship, RecordFormat};
pub use loader::{RecordCursor, RecordLoad, RecordLoader};
pub use record::{ChainLink, NodeRecord, Record, RelationshipRecord, Side};
pub use store::{NodeStore, RelationshipStore};

/// Metrics hooks.
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, StoreMetrics};

/// Store configuration.
pub use options::StoreOptions;
