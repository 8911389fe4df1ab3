#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{mpsc, Arc, Once};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use strand::kernel::{
    index_entry_resource_id, EntityWrite, IndexDescriptor, Kernel, LockClient, ManagedClient,
    PropValue, Property, ResourceType, Result,
};
use strand::storage::{CounterMetrics, StoreMetrics, StoreOptions};
use strand::types::{LabelId, NodeId, PropId};
use tracing_subscriber::EnvFilter;

const PERSON: LabelId = LabelId(3);
const EMAIL: PropId = PropId(4);
const INDEX: IndexDescriptor = IndexDescriptor {
    label: PERSON,
    prop: EMAIL,
};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("strand::kernel=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Step {
    AcquireShared,
    AcquireExclusive,
    ReleaseShared,
    ReleaseExclusive,
}

/// Lock client that tracks its own holds and records every step.
struct Instrumented {
    inner: ManagedClient,
    holds: HashMap<(ResourceType, u64), (u32, u32)>,
    log: Arc<Mutex<Vec<(Step, u32, u32)>>>,
}

impl Instrumented {
    fn new(inner: ManagedClient) -> (Self, Arc<Mutex<Vec<(Step, u32, u32)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let client = Self {
            inner,
            holds: HashMap::new(),
            log: Arc::clone(&log),
        };
        (client, log)
    }

    fn step(&mut self, kind: ResourceType, id: u64, step: Step) {
        let holds = self.holds.entry((kind, id)).or_insert((0, 0));
        match step {
            Step::AcquireShared => holds.0 += 1,
            Step::AcquireExclusive => holds.1 += 1,
            Step::ReleaseShared => holds.0 -= 1,
            Step::ReleaseExclusive => {
                // An exclusive hold is only ever given up under a shared one.
                assert!(holds.0 > 0, "exclusive released with no shared hold");
                holds.1 -= 1;
            }
        }
        self.log.lock().push((step, holds.0, holds.1));
    }
}

impl LockClient for Instrumented {
    fn acquire_shared(&mut self, kind: ResourceType, id: u64) {
        self.inner.acquire_shared(kind, id);
        self.step(kind, id, Step::AcquireShared);
    }

    fn acquire_exclusive(&mut self, kind: ResourceType, id: u64) {
        self.inner.acquire_exclusive(kind, id);
        self.step(kind, id, Step::AcquireExclusive);
    }

    fn release_shared(&mut self, kind: ResourceType, id: u64) {
        self.inner.release_shared(kind, id);
        self.step(kind, id, Step::ReleaseShared);
    }

    fn release_exclusive(&mut self, kind: ResourceType, id: u64) {
        self.inner.release_exclusive(kind, id);
        self.step(kind, id, Step::ReleaseExclusive);
    }

    fn release_all(&mut self) {
        self.inner.release_all();
        self.holds.clear();
    }
}

fn kernel(metrics: Arc<CounterMetrics>) -> Arc<Kernel> {
    let shared: Arc<dyn StoreMetrics> = metrics;
    let kernel = Kernel::open(&StoreOptions::default().page_size(1024).metrics(shared)).unwrap();
    kernel.schema().add_uniqueness_constraint(PERSON, EMAIL);
    Arc::new(kernel)
}

fn wait_for(counter: &AtomicU64, at_least: u64) {
    for _ in 0..2_000 {
        if CounterMetrics::get(counter) >= at_least {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("counter never reached {at_least}");
}

fn entry(value: &str) -> u64 {
    index_entry_resource_id(PERSON, EMAIL, &PropValue::from(value))
}

#[test]
fn creator_blocks_readers_until_commit() -> Result<()> {
    init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let kernel = kernel(metrics.clone());
    let ops = kernel.operations();
    let value = PropValue::from("x@y.com");

    let mut r1 = kernel.begin();
    assert_eq!(ops.node_get_unique_from_index_lookup(&mut r1, &INDEX, &value)?, None);
    assert_eq!(
        kernel.lock_manager().holds(ResourceType::IndexEntry, entry("x@y.com")),
        (0, 1)
    );
    let created = ops.node_create(&mut r1)?;
    ops.node_add_label(&mut r1, created, PERSON)?;
    ops.node_set_property(&mut r1, created, Property::new(EMAIL, "x@y.com"))?;

    let (granted, seen) = mpsc::channel();
    let r2 = {
        let kernel = Arc::clone(&kernel);
        let value = value.clone();
        thread::spawn(move || -> Result<Option<NodeId>> {
            let mut tx = kernel.begin();
            let found = kernel
                .operations()
                .node_get_unique_from_index_lookup(&mut tx, &INDEX, &value)?;
            granted.send(()).unwrap();
            let holds = kernel
                .lock_manager()
                .holds(ResourceType::IndexEntry, entry("x@y.com"));
            assert_eq!(holds, (1, 0));
            tx.commit()?;
            Ok(found)
        })
    };

    wait_for(&metrics.shared_lock_waits, 1);
    assert!(seen.try_recv().is_err());
    r1.commit()?;

    assert_eq!(r2.join().unwrap()?, Some(created));
    assert_eq!(
        kernel.lock_manager().holds(ResourceType::IndexEntry, entry("x@y.com")),
        (0, 0)
    );
    Ok(())
}

#[test]
fn found_value_is_returned_under_shared_lock() -> Result<()> {
    let kernel = kernel(Arc::new(CounterMetrics::default()));
    let ops = kernel.operations();
    let mut setup = kernel.begin();
    let node = ops.node_create(&mut setup)?;
    ops.node_add_label(&mut setup, node, PERSON)?;
    ops.node_set_property(&mut setup, node, Property::new(EMAIL, "known"))?;
    setup.commit()?;

    let (client, log) = Instrumented::new(kernel.lock_manager().client());
    let mut tx = kernel.begin_with(Box::new(client));
    let found = ops.node_get_unique_from_index_lookup(&mut tx, &INDEX, &"known".into())?;
    assert_eq!(found, Some(node));
    assert_eq!(*log.lock(), vec![(Step::AcquireShared, 1, 0)]);
    Ok(())
}

#[test]
fn losing_the_creation_race_downgrades_without_a_gap() -> Result<()> {
    init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let kernel = kernel(metrics.clone());
    let resource = entry("race");

    // A reader holding the entry shared keeps the escalating lookup waiting.
    let mut blocker = kernel.begin();
    blocker.locks().acquire_shared(ResourceType::IndexEntry, resource);

    let (client, log) = Instrumented::new(kernel.lock_manager().client());
    let escalating = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || -> Result<Option<NodeId>> {
            let mut tx = kernel.begin_with(Box::new(client));
            let found = kernel.operations().node_get_unique_from_index_lookup(
                &mut tx,
                &INDEX,
                &"race".into(),
            )?;
            let holds = kernel.lock_manager().holds(ResourceType::IndexEntry, resource);
            assert_eq!(holds, (1, 0));
            tx.commit()?;
            Ok(found)
        })
    };

    wait_for(&metrics.exclusive_lock_waits, 1);
    let ops = kernel.operations();
    let winner = ops.node_create(&mut blocker)?;
    ops.node_add_label(&mut blocker, winner, PERSON)?;
    ops.node_set_property(&mut blocker, winner, Property::new(EMAIL, "race"))?;
    blocker.commit()?;

    assert_eq!(escalating.join().unwrap()?, Some(winner));
    let steps: Vec<Step> = log.lock().iter().map(|(step, _, _)| *step).collect();
    assert_eq!(
        steps,
        vec![
            Step::AcquireShared,
            Step::ReleaseShared,
            Step::AcquireExclusive,
            Step::AcquireShared,
            Step::ReleaseExclusive,
        ]
    );
    // From the exclusive acquire on, the entry is always held in some mode.
    for &(_, shared, exclusive) in log.lock().iter().skip(2) {
        assert!(shared + exclusive > 0);
    }
    Ok(())
}

#[test]
fn null_value_locks_the_empty_string_entry() -> Result<()> {
    let kernel = kernel(Arc::new(CounterMetrics::default()));
    let ops = kernel.operations();
    let mut tx = kernel.begin();
    assert_eq!(ops.node_get_unique_from_index_lookup(&mut tx, &INDEX, &PropValue::Null)?, None);
    assert_eq!(
        kernel.lock_manager().holds(ResourceType::IndexEntry, entry("")),
        (0, 1)
    );
    Ok(())
}
