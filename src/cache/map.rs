//! Unbounded in-memory backend.
//!
//! Entries and the group index live under one `RwLock`, so a store and its
//! group bookkeeping are observed atomically. Expired entries are evicted
//! lazily on load and in bulk by a periodic pruner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, trace};

use super::backend::{CacheBackend, Startable};
use super::error::CacheError;
use super::group::GroupIndex;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use super::representation::CachedRepresentation;
use super::worker::BackgroundWorker;

const SOURCE: &str = "cache::map";
const METRIC_EVICT: &str = "repcache_evict_total";

pub const DEFAULT_PRUNE_FREQUENCY: Duration = Duration::from_secs(10);

type Entries = HashMap<CacheKey, Arc<CachedRepresentation>>;

#[derive(Default)]
struct MapState {
    entries: Entries,
    groups: GroupIndex,
}

/// `(group, key) -> expiration` for members still stored under that group.
fn member_of(entries: &Entries) -> impl FnMut(&str, &CacheKey) -> Option<OffsetDateTime> + '_ {
    move |group: &str, key: &CacheKey| {
        entries
            .get(key)
            .filter(|rep| rep.in_group(group))
            .map(|rep| rep.expiration())
    }
}

#[derive(Default)]
struct MapShared {
    state: RwLock<MapState>,
    evictions: AtomicU64,
}

impl MapShared {
    fn record_evictions(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        counter!(METRIC_EVICT, "backend" => "map").increment(count as u64);
    }

    fn prune(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let mut state = rw_write(&self.state, SOURCE, "prune");
        let MapState { entries, groups } = &mut *state;

        let before = entries.len();
        entries.retain(|_, rep| !rep.expired_at(now));
        let removed = before - entries.len();
        let dropped_groups = groups.prune_all(&mut member_of(entries));
        drop(state);

        self.record_evictions(removed);
        if removed > 0 || dropped_groups > 0 {
            debug!(cache = "map", removed, dropped_groups, "pruned expired entries");
        }
        removed
    }
}

pub struct MapBackend {
    shared: Arc<MapShared>,
    pruner: Arc<MapPruner>,
}

impl MapBackend {
    pub fn new() -> Self {
        Self::with_prune_frequency(DEFAULT_PRUNE_FREQUENCY)
    }

    pub fn with_prune_frequency(frequency: Duration) -> Self {
        let shared = Arc::new(MapShared::default());
        let pruner = Arc::new(MapPruner {
            worker: BackgroundWorker::new("map-pruner"),
            shared: Arc::clone(&shared),
            frequency,
        });
        Self { shared, pruner }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.shared.state, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live members in `group`, pruning it first.
    pub fn group_len(&self, group: &str) -> usize {
        let mut state = rw_write(&self.shared.state, SOURCE, "group_len");
        let MapState { entries, groups } = &mut *state;
        if !groups.prune(group, &mut member_of(entries)) {
            return 0;
        }
        groups.get(group).map_or(0, |entry| entry.keys().len())
    }

    /// Latest member expiration of `group`, after pruning it.
    pub fn group_expiration(&self, group: &str) -> Option<OffsetDateTime> {
        let mut state = rw_write(&self.shared.state, SOURCE, "group_expiration");
        let MapState { entries, groups } = &mut *state;
        if !groups.prune(group, &mut member_of(entries)) {
            return None;
        }
        groups.get(group).map(|entry| entry.expiration())
    }

    /// Expired entries evicted so far, lazily or by the pruner.
    pub fn evictions(&self) -> u64 {
        self.shared.evictions.load(Ordering::Relaxed)
    }

    /// Sweep expired entries and stale groups now.
    pub fn prune(&self) -> usize {
        self.shared.prune()
    }
}

impl Default for MapBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for MapBackend {
    fn load_representation(&self, key: &CacheKey) -> Option<Arc<CachedRepresentation>> {
        {
            let state = rw_read(&self.shared.state, SOURCE, "load");
            let rep = state.entries.get(key)?;
            if !rep.expired() {
                trace!(cache = "map", key = %key, outcome = "hit");
                return Some(Arc::clone(rep));
            }
        }

        // Another loader may have evicted or replaced the entry in between.
        let mut state = rw_write(&self.shared.state, SOURCE, "load.evict");
        let still_expired = state.entries.get(key).is_some_and(|rep| rep.expired());
        if still_expired {
            state.entries.remove(key);
            drop(state);
            self.shared.record_evictions(1);
            debug!(cache = "map", key = %key, "evicted expired entry on load");
        }
        None
    }

    fn store_representation(&self, key: CacheKey, representation: Arc<CachedRepresentation>) {
        let mut state = rw_write(&self.shared.state, SOURCE, "store");
        let MapState { entries, groups } = &mut *state;

        let expiration = representation.expiration();
        let names: Vec<String> = representation.groups().iter().cloned().collect();
        entries.insert(key.clone(), representation);
        for name in &names {
            groups.add(name, &key, expiration, &mut member_of(entries));
        }
        trace!(cache = "map", key = %key, groups = names.len(), "stored");
    }

    fn delete_representation(&self, key: &CacheKey) {
        let removed = rw_write(&self.shared.state, SOURCE, "delete")
            .entries
            .remove(key)
            .is_some();
        if removed {
            trace!(cache = "map", key = %key, "deleted");
        }
    }

    fn delete_group(&self, group: &str) {
        let mut state = rw_write(&self.shared.state, SOURCE, "delete_group");
        let MapState { entries, groups } = &mut *state;
        let keys = groups.take(group, &mut member_of(entries));
        for key in &keys {
            entries.remove(key);
        }
        debug!(cache = "map", group, removed = keys.len(), "deleted group");
    }

    fn startables(&self) -> Vec<Arc<dyn Startable>> {
        vec![Arc::clone(&self.pruner) as Arc<dyn Startable>]
    }
}

/// Periodic sweep of a [`MapBackend`].
struct MapPruner {
    worker: BackgroundWorker,
    shared: Arc<MapShared>,
    frequency: Duration,
}

#[async_trait]
impl Startable for MapPruner {
    fn name(&self) -> &'static str {
        self.worker.name()
    }

    async fn start(&self) -> Result<(), CacheError> {
        if self.frequency.is_zero() {
            return Err(CacheError::invalid_config(
                "prune_frequency",
                "must be greater than zero",
            ));
        }
        let shared = Arc::clone(&self.shared);
        self.worker.spawn_periodic(self.frequency, move || {
            shared.prune();
        })
    }

    async fn stop(&self) {
        self.worker.shutdown().await;
    }
}
