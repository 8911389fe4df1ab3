#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Once};
use std::thread;
use std::time::Duration;

use strand::kernel::{
    EntityRead, EntityWrite, IndexDescriptor, Kernel, KernelError, PropValue, Property, Result,
};
use strand::storage::{CounterMetrics, StoreMetrics, StoreOptions};
use strand::types::{LabelId, NodeId, PropId};
use tracing_subscriber::EnvFilter;

const PERSON: LabelId = LabelId(1);
const EMAIL: PropId = PropId(1);

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

fn kernel_with(metrics: Arc<CounterMetrics>) -> Arc<Kernel> {
    let shared: Arc<dyn StoreMetrics> = metrics;
    let kernel = Kernel::open(&StoreOptions::default().page_size(1024).metrics(shared)).unwrap();
    kernel.schema().add_uniqueness_constraint(PERSON, EMAIL);
    Arc::new(kernel)
}

fn wait_for(counter: &std::sync::atomic::AtomicU64, at_least: u64) {
    for _ in 0..2_000 {
        if CounterMetrics::get(counter) >= at_least {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("counter never reached {at_least}");
}

fn person(kernel: &Kernel, email: &str) -> Result<(NodeId, strand::kernel::Transaction)> {
    let ops = kernel.operations();
    let mut tx = kernel.begin();
    let node = ops.node_create(&mut tx)?;
    ops.node_add_label(&mut tx, node, PERSON)?;
    ops.node_set_property(&mut tx, node, Property::new(EMAIL, email))?;
    Ok((node, tx))
}

#[test]
fn second_writer_waits_then_sees_violation() -> Result<()> {
    init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let kernel = kernel_with(metrics.clone());

    let (first, mut tx_a) = person(&kernel, "a@b.com")?;

    let (started, ready) = mpsc::channel();
    let contender = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || -> Result<()> {
            let ops = kernel.operations();
            let mut tx_b = kernel.begin();
            let node = ops.node_create(&mut tx_b)?;
            ops.node_add_label(&mut tx_b, node, PERSON)?;
            started.send(()).unwrap();
            let outcome = ops.node_set_property(&mut tx_b, node, Property::new(EMAIL, "a@b.com"));
            tx_b.rollback()?;
            outcome.map(|_| ())
        })
    };

    ready.recv().unwrap();
    wait_for(&metrics.exclusive_lock_waits, 1);
    tx_a.commit()?;

    match contender.join().unwrap() {
        Err(KernelError::UniqueConstraintViolation {
            label,
            prop,
            value,
            existing,
        }) => {
            assert_eq!((label, prop, existing), (PERSON, EMAIL, first));
            assert_eq!(value, PropValue::from("a@b.com"));
        }
        other => panic!("expected a uniqueness violation, got {other:?}"),
    }

    let index = IndexDescriptor {
        label: PERSON,
        prop: EMAIL,
    };
    let ops = kernel.operations();
    assert_eq!(ops.unique_index_lookup(&index, &"a@b.com".into())?, Some(first));
    assert_eq!(ops.nodes_with_label(PERSON)?, vec![first]);
    Ok(())
}

#[test]
fn second_writer_proceeds_after_first_rolls_back() -> Result<()> {
    init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let kernel = kernel_with(metrics.clone());

    let (_, mut tx_a) = person(&kernel, "x@y.com")?;
    let contender = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || -> Result<NodeId> {
            let (node, mut tx) = person(&kernel, "x@y.com")?;
            tx.commit()?;
            Ok(node)
        })
    };
    wait_for(&metrics.exclusive_lock_waits, 1);
    tx_a.rollback()?;

    let winner = contender.join().unwrap()?;
    let index = IndexDescriptor {
        label: PERSON,
        prop: EMAIL,
    };
    assert_eq!(
        kernel.operations().unique_index_lookup(&index, &"x@y.com".into())?,
        Some(winner)
    );
    Ok(())
}

#[test]
fn racing_writers_admit_exactly_one() -> Result<()> {
    init_tracing();
    const WRITERS: usize = 8;
    let kernel = kernel_with(Arc::new(CounterMetrics::default()));
    let barrier = Arc::new(Barrier::new(WRITERS));
    let winners = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WRITERS)
        .map(|_| {
            let kernel = Arc::clone(&kernel);
            let barrier = Arc::clone(&barrier);
            let winners = Arc::clone(&winners);
            let violations = Arc::clone(&violations);
            thread::spawn(move || -> Result<()> {
                barrier.wait();
                match person(&kernel, "same@example.com") {
                    Ok((_, mut tx)) => {
                        tx.commit()?;
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(KernelError::UniqueConstraintViolation { .. }) => {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(other) => return Err(other),
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap()?;
    }

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert_eq!(violations.load(Ordering::SeqCst), WRITERS - 1);
    assert_eq!(kernel.operations().nodes_with_label(PERSON)?.len(), 1);
    Ok(())
}

#[test]
fn distinct_values_do_not_contend() -> Result<()> {
    let kernel = kernel_with(Arc::new(CounterMetrics::default()));
    let (a, tx_a) = person(&kernel, "one")?;
    let (b, tx_b) = person(&kernel, "two")?;
    assert_ne!(a, b);
    drop((tx_a, tx_b));
    // Both dropped unfinished, so both were rolled back.
    assert!(kernel.operations().nodes_with_label(PERSON)?.is_empty());
    Ok(())
}

#[test]
fn adding_label_checks_existing_value() -> Result<()> {
    let kernel = kernel_with(Arc::new(CounterMetrics::default()));
    let (first, mut tx) = person(&kernel, "dup")?;
    tx.commit()?;

    let ops = kernel.operations();
    let mut tx = kernel.begin();
    let other = ops.node_create(&mut tx)?;
    ops.node_set_property(&mut tx, other, Property::new(EMAIL, "dup"))?;
    assert!(matches!(
        ops.node_add_label(&mut tx, other, PERSON),
        Err(KernelError::UniqueConstraintViolation { existing, .. }) if existing == first
    ));
    assert!(!ops.node_has_label(other, PERSON)?);
    Ok(())
}
