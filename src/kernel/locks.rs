//! Transaction-scoped shared/exclusive locks on logical resources.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};
use xxhash_rust::xxh64::Xxh64;

use super::entity::PropValue;
use crate::storage::{default_metrics, StoreMetrics};
use crate::types::{LabelId, PropId};

/// Namespace of a lockable resource id.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResourceType {
    /// A (label, property, value) entry of a unique index.
    IndexEntry,
    /// A node.
    Node,
    /// A relationship.
    Relationship,
    /// The schema as a whole.
    Schema,
}

/// Lock mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LockMode {
    /// Many holders at once; excludes exclusive holders of other clients.
    Shared,
    /// One holder; excludes every other client.
    Exclusive,
}

/// A lockable resource.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Resource {
    /// Namespace.
    pub kind: ResourceType,
    /// Id within the namespace.
    pub id: u64,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.id)
    }
}

/// Lock operations available to one transaction.
///
/// Acquisition blocks until granted. Locks are re-entrant: each acquire must
/// be matched by a release of the same mode, or by [`LockClient::release_all`].
pub trait LockClient: Send {
    /// Takes a shared lock.
    fn acquire_shared(&mut self, kind: ResourceType, id: u64);

    /// Takes an exclusive lock.
    fn acquire_exclusive(&mut self, kind: ResourceType, id: u64);

    /// Drops one shared hold.
    fn release_shared(&mut self, kind: ResourceType, id: u64);

    /// Drops one exclusive hold.
    fn release_exclusive(&mut self, kind: ResourceType, id: u64);

    /// Drops every hold this client has.
    fn release_all(&mut self);
}

/// Lock id for the unique index entry (`label`, `prop`, `value`).
///
/// Hashes the label and key ids and the value's canonical string, so equal
/// values always map to the same resource.
pub fn index_entry_resource_id(label: LabelId, prop: PropId, value: &PropValue) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.update(&label.0.to_be_bytes());
    hasher.update(&prop.0.to_be_bytes());
    hasher.update(value.value_as_string().as_bytes());
    hasher.digest()
}

type ClientId = u64;

#[derive(Debug, Default)]
struct Holders {
    shared: HashMap<ClientId, u32>,
    exclusive: Option<(ClientId, u32)>,
}

impl Holders {
    fn grants(&self, client: ClientId, mode: LockMode) -> bool {
        let exclusive_ok = self.exclusive.map_or(true, |(holder, _)| holder == client);
        match mode {
            LockMode::Shared => exclusive_ok,
            LockMode::Exclusive => exclusive_ok && self.shared.keys().all(|&holder| holder == client),
        }
    }

    fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }
}

#[derive(Default)]
struct LockTable {
    resources: Mutex<HashMap<Resource, Holders>>,
    released: Condvar,
    next_client: AtomicU64,
}

/// In-process lock manager.
///
/// A client holding a resource exclusively may also take it shared, and a
/// client that is the only shared holder may take it exclusively. Waiting
/// has no timeout; deadlocks are not detected.
#[derive(Clone)]
pub struct LockManager {
    table: Arc<LockTable>,
    metrics: Arc<dyn StoreMetrics>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    /// A lock manager with no metrics.
    pub fn new() -> Self {
        Self::with_metrics(default_metrics())
    }

    /// A lock manager reporting waits to `metrics`.
    pub fn with_metrics(metrics: Arc<dyn StoreMetrics>) -> Self {
        Self {
            table: Arc::new(LockTable::default()),
            metrics,
        }
    }

    /// A new client. Dropping it releases everything it holds.
    pub fn client(&self) -> ManagedClient {
        ManagedClient {
            id: self.table.next_client.fetch_add(1, Ordering::Relaxed),
            manager: self.clone(),
            held: HashMap::new(),
        }
    }

    /// Number of shared and exclusive holds on a resource, across all clients.
    pub fn holds(&self, kind: ResourceType, id: u64) -> (u32, u32) {
        let resources = self.table.resources.lock();
        resources
            .get(&Resource { kind, id })
            .map_or((0, 0), |holders| {
                (
                    holders.shared.values().sum(),
                    holders.exclusive.map_or(0, |(_, count)| count),
                )
            })
    }

    fn acquire(&self, client: ClientId, resource: Resource, mode: LockMode) {
        let mut resources = self.table.resources.lock();
        let mut waited = false;
        while !resources.entry(resource).or_default().grants(client, mode) {
            if !waited {
                waited = true;
                self.metrics.lock_wait(mode == LockMode::Exclusive);
                debug!(client, %resource, ?mode, "locks.wait");
            }
            self.table.released.wait(&mut resources);
        }
        let holders = resources.entry(resource).or_default();
        match mode {
            LockMode::Shared => *holders.shared.entry(client).or_insert(0) += 1,
            LockMode::Exclusive => {
                let count = holders.exclusive.map_or(0, |(_, count)| count);
                holders.exclusive = Some((client, count + 1));
            }
        }
    }

    fn release(&self, client: ClientId, resource: Resource, mode: LockMode, count: u32) {
        let mut resources = self.table.resources.lock();
        let Some(holders) = resources.get_mut(&resource) else {
            return;
        };
        match mode {
            LockMode::Shared => {
                if let Some(held) = holders.shared.get_mut(&client) {
                    *held = held.saturating_sub(count);
                    if *held == 0 {
                        holders.shared.remove(&client);
                    }
                }
            }
            LockMode::Exclusive => {
                if let Some((holder, held)) = holders.exclusive {
                    if holder == client {
                        let left = held.saturating_sub(count);
                        holders.exclusive = (left > 0).then_some((holder, left));
                    }
                }
            }
        }
        if holders.is_empty() {
            resources.remove(&resource);
        }
        drop(resources);
        self.table.released.notify_all();
    }
}

/// A [`LockManager`] client bound to one transaction.
pub struct ManagedClient {
    id: ClientId,
    manager: LockManager,
    held: HashMap<(Resource, LockMode), u32>,
}

impl ManagedClient {
    /// Holds this client has on a resource in `mode`.
    pub fn held(&self, kind: ResourceType, id: u64, mode: LockMode) -> u32 {
        self.held
            .get(&(Resource { kind, id }, mode))
            .copied()
            .unwrap_or(0)
    }

    fn take(&mut self, resource: Resource, mode: LockMode) {
        self.manager.acquire(self.id, resource, mode);
        *self.held.entry((resource, mode)).or_insert(0) += 1;
    }

    fn give_back(&mut self, resource: Resource, mode: LockMode) {
        let key = (resource, mode);
        match self.held.get_mut(&key) {
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    self.held.remove(&key);
                }
                self.manager.release(self.id, resource, mode, 1);
            }
            None => warn!(client = self.id, %resource, ?mode, "locks.release_unheld"),
        }
    }
}

impl LockClient for ManagedClient {
    fn acquire_shared(&mut self, kind: ResourceType, id: u64) {
        self.take(Resource { kind, id }, LockMode::Shared);
    }

    fn acquire_exclusive(&mut self, kind: ResourceType, id: u64) {
        self.take(Resource { kind, id }, LockMode::Exclusive);
    }

    fn release_shared(&mut self, kind: ResourceType, id: u64) {
        self.give_back(Resource { kind, id }, LockMode::Shared);
    }

    fn release_exclusive(&mut self, kind: ResourceType, id: u64) {
        self.give_back(Resource { kind, id }, LockMode::Exclusive);
    }

    fn release_all(&mut self) {
        for ((resource, mode), count) in self.held.drain() {
            self.manager.release(self.id, resource, mode, count);
        }
    }
}

impl Drop for ManagedClient {
    fn drop(&mut self) {
        self.release_all();
    }
}
