#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Once};
use std::thread;

use strand::primitives::pager::{PageAccess, PagedFile, PagerOptions};
use strand::storage::{
    degree, CounterMetrics, Direction, NodeStore, RecordLoad, RelationshipCursor,
    RelationshipRecord, RelationshipStore, StoreMetrics, StoreOptions,
};
use strand::types::{PageId, RelId, Result, TypeId};
use tracing_subscriber::EnvFilter;

const READERS: usize = 4;
const WRITES: u64 = 2_000;
const WORDS: usize = 16;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strand=info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

#[test]
fn validated_page_reads_are_never_torn() -> Result<()> {
    init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let file = PagedFile::with_metrics(
        PagerOptions::default().page_size(256).initial_pages(1),
        metrics.clone(),
    )?;
    let barrier = Arc::new(Barrier::new(READERS + 1));
    let done = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..READERS {
        let file = Arc::clone(&file);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        readers.push(thread::spawn(move || -> Result<u64> {
            barrier.wait();
            let mut last = 0;
            let mut reads = 0;
            let mut words = [0u64; WORDS];
            loop {
                let finished = done.load(Ordering::Acquire);
                let mut cursor = file.io(PageId(0), PageAccess::Read);
                assert!(cursor.next()?);
                loop {
                    cursor.get_u64s(0, &mut words)?;
                    if !cursor.should_retry()? {
                        break;
                    }
                }
                assert!(words.iter().all(|&w| w == words[0]), "torn page: {words:?}");
                assert!(words[0] >= last, "went backwards: {} < {last}", words[0]);
                last = words[0];
                reads += 1;
                if finished {
                    break;
                }
            }
            assert_eq!(last, WRITES);
            Ok(reads)
        }));
    }

    barrier.wait();
    let mut writer = file.io(PageId(0), PageAccess::Write);
    for value in 1..=WRITES {
        assert!(writer.next_page(PageId(0))?);
        for slot in 0..WORDS {
            writer.put_u64(slot * 8, value)?;
        }
    }
    writer.close();
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().unwrap()? > 0);
    }
    assert!(CounterMetrics::get(&metrics.write_binds) >= WRITES);
    Ok(())
}

#[test]
fn chain_walks_see_growing_consistent_chains() -> Result<()> {
    init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let shared: Arc<dyn StoreMetrics> = metrics.clone();
    let options = StoreOptions::default().page_size(256).metrics(shared);
    let nodes = Arc::new(NodeStore::open(&options)?);
    let rels = Arc::new(RelationshipStore::open(&options)?);
    let hub = nodes.create()?;
    let spokes: Vec<_> = (0..8).map(|_| nodes.create()).collect::<Result<_>>()?;
    let barrier = Arc::new(Barrier::new(READERS + 1));
    let done = Arc::new(AtomicBool::new(false));
    let links = 400u64;

    let mut readers = Vec::new();
    for _ in 0..READERS {
        let nodes = Arc::clone(&nodes);
        let rels = Arc::clone(&rels);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        readers.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            let mut loader = rels.cursor();
            let mut last = 0;
            while !done.load(Ordering::Acquire) {
                let head = nodes.first_rel(hub)?;
                let seen = degree(&mut loader, hub, head, Direction::Outgoing, TypeId(0))?;
                assert!(seen >= last, "degree went backwards: {seen} < {last}");
                last = seen;
                if let Some(head) = head {
                    let mut record = RelationshipRecord::default();
                    assert!(loader.next(head.0, &mut record, RecordLoad::Normal)?);
                    assert_eq!(record.first_node, hub);
                }
            }
            Ok(())
        }));
    }

    barrier.wait();
    for i in 0..links {
        let spoke = spokes[(i % spokes.len() as u64) as usize];
        rels.create(hub, spoke, TypeId(0), &nodes)?;
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap()?;
    }

    let mut loader = rels.cursor();
    let head = nodes.first_rel(hub)?;
    assert_eq!(head, Some(RelId(links - 1)));
    assert_eq!(
        degree(&mut loader, hub, head, Direction::Outgoing, TypeId(0))?,
        links
    );
    assert_eq!(CounterMetrics::get(&metrics.relationships_created), links);
    Ok(())
}

#[test]
fn cursor_init_retries_superseded_heads_under_a_writer() -> Result<()> {
    init_tracing();
    let options = StoreOptions::default().page_size(512);
    let nodes = Arc::new(NodeStore::open(&options)?);
    let rels = Arc::new(RelationshipStore::open(&options)?);
    let hub = nodes.create()?;
    let spokes: Vec<_> = (0..4).map(|_| nodes.create()).collect::<Result<_>>()?;
    let barrier = Arc::new(Barrier::new(READERS + 1));
    let done = Arc::new(AtomicBool::new(false));
    let links = 1_500u64;

    let mut readers = Vec::new();
    for _ in 0..READERS {
        let nodes = Arc::clone(&nodes);
        let rels = Arc::clone(&rels);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        readers.push(thread::spawn(move || -> Result<(u64, u64)> {
            barrier.wait();
            let mut loader = rels.cursor();
            let mut cursor = RelationshipCursor::new();
            let (mut walks, mut retries, mut last) = (0u64, 0u64, 0u64);
            loop {
                let finished = done.load(Ordering::Acquire);
                if let Some(head) = nodes.first_rel(hub)? {
                    match cursor.init(&mut loader, head, hub, Direction::Outgoing, TypeId(0)) {
                        Ok(found) => {
                            assert!(found >= last, "degree went backwards: {found} < {last}");
                            last = found;
                            for _ in 1..found {
                                assert!(cursor.next_source(&mut loader)?);
                            }
                            assert!(!cursor.next_source(&mut loader)?);
                            assert_eq!(cursor.id(), None);
                            walks += 1;
                        }
                        Err(err) if err.is_retryable() => retries += 1,
                        Err(err) => return Err(err),
                    }
                }
                if finished {
                    break;
                }
            }
            assert_eq!(last, links);
            Ok((walks, retries))
        }));
    }

    barrier.wait();
    for i in 0..links {
        let spoke = spokes[(i % spokes.len() as u64) as usize];
        rels.create(hub, spoke, TypeId(0), &nodes)?;
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        let (walks, retries) = reader.join().unwrap()?;
        assert!(walks > 0);
        tracing::debug!(walks, retries, "chain.concurrent_init");
    }
    Ok(())
}
