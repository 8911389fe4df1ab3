#![forbid(unsafe_code)]

use std::sync::Once;

use proptest::prelude::*;
use strand::storage::{
    ChainIter, ChainLink, Direction, NodeRecord, NodeStore, RawNode, RawRelationship, Record,
    RecordFormat, RecordLoad, RelationshipCursor, RelationshipRecord, RelationshipStore, Side,
    StoreOptions,
};
use strand::types::{NodeId, RelId, Result, StrandError, TypeId};
use tracing_subscriber::EnvFilter;

const KNOWS: TypeId = TypeId(1);
const LIKES: TypeId = TypeId(2);

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("strand::storage=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

struct Graph {
    nodes: NodeStore,
    rels: RelationshipStore,
}

impl Graph {
    fn open(format: RecordFormat) -> Self {
        let options = StoreOptions::default().page_size(512).record_format(format);
        Self {
            nodes: NodeStore::open(&options).unwrap(),
            rels: RelationshipStore::open(&options).unwrap(),
        }
    }

    fn node(&self) -> NodeId {
        self.nodes.create().unwrap()
    }

    fn link(&self, first: NodeId, second: NodeId, rel_type: TypeId) -> RelId {
        self.rels.create(first, second, rel_type, &self.nodes).unwrap()
    }

    fn head(&self, node: NodeId) -> RelId {
        self.nodes.first_rel(node).unwrap().unwrap()
    }
}

#[test]
fn three_outgoing_relationships_then_terminator() -> Result<()> {
    init_tracing();
    let graph = Graph::open(RecordFormat::Standard);
    let n = graph.node();
    let targets: Vec<NodeId> = (0..3).map(|_| graph.node()).collect();
    let mut created: Vec<RelId> = targets.iter().map(|&t| graph.link(n, t, KNOWS)).collect();
    created.reverse();

    let mut loader = graph.rels.cursor();
    let mut cursor = RelationshipCursor::new();
    let degree = cursor.init(&mut loader, graph.head(n), n, Direction::Outgoing, KNOWS)?;
    assert_eq!(degree, 3);
    assert!(cursor.available());

    let mut visited = vec![cursor.id()];
    assert!(cursor.next_source(&mut loader)?);
    visited.push(cursor.id());
    assert!(cursor.next_source(&mut loader)?);
    visited.push(cursor.id());
    assert_eq!(visited, created.into_iter().map(Some).collect::<Vec<_>>());

    assert!(!cursor.next_source(&mut loader)?);
    assert!(!cursor.available());
    assert_eq!(cursor.id(), None);
    Ok(())
}

#[test]
fn init_skips_to_first_match_and_discounts_skipped_records() -> Result<()> {
    let graph = Graph::open(RecordFormat::Standard);
    let n = graph.node();
    let m = graph.node();
    let liked = graph.link(n, m, LIKES);
    graph.link(m, n, KNOWS);
    graph.link(n, m, LIKES);

    let mut loader = graph.rels.cursor();
    let mut cursor = RelationshipCursor::new();
    // Chain of n, newest first: LIKES out, KNOWS in, LIKES out.
    let degree = cursor.init(&mut loader, graph.head(n), n, Direction::Incoming, KNOWS)?;
    assert_eq!(degree, 2);
    assert_eq!((cursor.source(), cursor.target()), (m, n));
    assert!(cursor.next_target(&mut loader)?);
    assert_eq!(cursor.id(), Some(liked));

    assert_eq!(
        cursor.init(&mut loader, graph.head(n), n, Direction::Outgoing, TypeId(9))?,
        0
    );
    assert!(!cursor.available());
    assert_eq!(cursor.id(), None);
    Ok(())
}

#[test]
fn chain_head_has_no_prev_and_others_link_back() -> Result<()> {
    let graph = Graph::open(RecordFormat::Standard);
    let n = graph.node();
    let m = graph.node();
    let older = graph.link(n, m, KNOWS);
    let newer = graph.link(n, m, KNOWS);

    let mut loader = graph.rels.cursor();
    let mut cursor = RelationshipCursor::new();
    cursor.init(&mut loader, graph.head(n), n, Direction::Both, KNOWS)?;
    assert_eq!(cursor.id(), Some(newer));
    assert_eq!(cursor.source_prev(), None);
    assert_eq!(cursor.target_prev(), None);
    assert_eq!(cursor.record().prev(Side::First), ChainLink::Degree(2));
    assert!(!cursor.prev_source(&mut loader)?);

    assert!(cursor.jump(&mut loader, older)?);
    assert_eq!(cursor.source_prev(), Some(newer));
    assert_eq!(cursor.source_next(), None);
    assert!(cursor.prev_target(&mut loader)?);
    assert_eq!(cursor.id(), Some(newer));
    Ok(())
}

#[test]
fn deleted_start_yields_empty_walk() -> Result<()> {
    let graph = Graph::open(RecordFormat::Standard);
    let n = graph.node();
    let m = graph.node();
    let rel = graph.link(n, m, KNOWS);
    graph.rels.delete(rel, &graph.nodes)?;

    let mut loader = graph.rels.cursor();
    let mut cursor = RelationshipCursor::new();
    assert_eq!(cursor.init(&mut loader, rel, n, Direction::Outgoing, KNOWS)?, 0);
    assert!(!cursor.available());
    assert!(!cursor.next_source(&mut loader)?);
    Ok(())
}

#[test]
fn superseded_head_asks_for_retry_and_strangers_are_corruption() {
    let graph = Graph::open(RecordFormat::Standard);
    let n = graph.node();
    let m = graph.node();
    let older = graph.link(n, m, KNOWS);
    graph.link(n, m, KNOWS);

    let mut loader = graph.rels.cursor();
    let mut cursor = RelationshipCursor::new();
    let err = cursor
        .init(&mut loader, older, n, Direction::Outgoing, KNOWS)
        .unwrap_err();
    assert!(matches!(err, StrandError::StaleChainHead { rel, node } if rel == older && node == n));
    assert!(err.is_retryable());
    assert_eq!(
        cursor.init(&mut loader, graph.head(n), n, Direction::Outgoing, KNOWS).unwrap(),
        2
    );

    let stranger = graph.node();
    assert!(matches!(
        cursor.init(&mut loader, graph.head(n), stranger, Direction::Outgoing, KNOWS),
        Err(StrandError::ChainCorruption { .. })
    ));
}

#[test]
fn loops_walk_once_in_high_limit_format() -> Result<()> {
    let graph = Graph::open(RecordFormat::HighLimit);
    let n = graph.node();
    let m = graph.node();
    graph.link(n, m, TypeId(70_000));
    let looped = graph.link(n, n, TypeId(70_000));

    let mut loader = graph.rels.cursor();
    let mut cursor = RelationshipCursor::new();
    let degree = cursor.init(&mut loader, graph.head(n), n, Direction::Both, TypeId(70_000))?;
    assert_eq!(degree, 2);
    assert_eq!(cursor.id(), Some(looped));
    assert_eq!(cursor.source(), cursor.target());

    let walked: Vec<RelId> = ChainIter::new(&mut loader, n, Some(graph.head(n)))
        .map(|record| record.map(|record| record.id))
        .collect::<Result<_>>()?;
    assert_eq!(walked.len(), 2);
    Ok(())
}

#[test]
fn records_load_through_the_public_record_api() -> Result<()> {
    let graph = Graph::open(RecordFormat::Standard);
    let n = graph.node();
    let m = graph.node();
    let rel = graph.link(n, m, KNOWS);

    let mut nodes = graph.nodes.cursor();
    let mut record = NodeRecord::default();
    assert_eq!(record.id, NodeId(0));
    assert!(nodes.next(n.0, &mut record, RecordLoad::Normal)?);
    assert_eq!((record.id, record.first_rel), (n, Some(rel)));

    let raw: <NodeRecord as Record>::Raw = RawNode::default();
    assert_eq!(raw.first_rel, 0);
    let raw: <RelationshipRecord as Record>::Raw = RawRelationship::default();
    assert_eq!(raw.rel_type, 0);
    assert_eq!(<RelationshipRecord as Record>::size(RecordFormat::HighLimit), 64);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn degree_matches_reachable_records(count in 1usize..40) {
        let graph = Graph::open(RecordFormat::Standard);
        let n = graph.node();
        let m = graph.node();
        for _ in 0..count {
            graph.link(n, m, KNOWS);
        }
        let mut loader = graph.rels.cursor();
        let mut cursor = RelationshipCursor::new();
        let degree = cursor
            .init(&mut loader, graph.head(n), n, Direction::Outgoing, KNOWS)
            .unwrap();
        prop_assert_eq!(degree, count as u64);
        for _ in 1..count {
            prop_assert!(cursor.next_source(&mut loader).unwrap());
        }
        prop_assert!(!cursor.next_source(&mut loader).unwrap());
        prop_assert!(!cursor.available());
    }
}
