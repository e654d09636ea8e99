//! Size-bounded backend on top of `moka`.
//!
//! Admission and eviction are weighted by [`CachedRepresentation::size`] and
//! each entry expires at its own expiration. Stores are queued on a bounded
//! write buffer and applied by a writer task; when the buffer is full the
//! store is dropped. Group membership is recorded by the writer after the
//! insert, so it is weakly consistent: a `delete_group` racing a queued
//! store may miss that store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use moka::Expiry;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use super::backend::{CacheBackend, Startable};
use super::error::CacheError;
use super::group::GroupIndex;
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::map::DEFAULT_PRUNE_FREQUENCY;
use super::representation::CachedRepresentation;
use super::worker::BackgroundWorker;

const SOURCE: &str = "cache::bounded";
const METRIC_EVICT: &str = "repcache_evict_total";
const METRIC_STORE_DROPPED: &str = "repcache_store_dropped_total";
/// Upper bound on the entries moka pre-allocates for.
const MAX_INITIAL_CAPACITY: usize = 1 << 16;

pub const DEFAULT_WRITE_BUFFER: usize = 1024;

type Store = Cache<CacheKey, Arc<CachedRepresentation>>;

#[derive(Debug, Clone)]
pub struct BoundedOptions {
    /// Total weight admitted, in bytes of [`CachedRepresentation::size`].
    pub max_size: u64,
    /// Expected entry size, used only to pre-size the table.
    pub average_size: u64,
    pub write_buffer: usize,
    /// Interval of group index maintenance in the writer task.
    pub prune_frequency: Duration,
}

impl BoundedOptions {
    pub fn new(max_size: u64, average_size: u64) -> Self {
        Self {
            max_size,
            average_size,
            write_buffer: DEFAULT_WRITE_BUFFER,
            prune_frequency: DEFAULT_PRUNE_FREQUENCY,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), CacheError> {
        if self.max_size == 0 {
            return Err(CacheError::invalid_config(
                "max_size",
                "must be greater than zero",
            ));
        }
        if self.average_size == 0 {
            return Err(CacheError::invalid_config(
                "average_size",
                "must be greater than zero",
            ));
        }
        if self.average_size > self.max_size {
            return Err(CacheError::invalid_config(
                "average_size",
                "must not exceed max_size",
            ));
        }
        if self.write_buffer == 0 {
            return Err(CacheError::invalid_config(
                "write_buffer",
                "must be greater than zero",
            ));
        }
        if self.prune_frequency.is_zero() {
            return Err(CacheError::invalid_config(
                "prune_frequency",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Per-entry lifetime taken from the representation's own expiration.
struct RepresentationExpiry;

impl Expiry<CacheKey, Arc<CachedRepresentation>> for RepresentationExpiry {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &Arc<CachedRepresentation>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.time_to_live())
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &Arc<CachedRepresentation>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.time_to_live())
    }
}

enum WriteOp {
    Store(CacheKey, Arc<CachedRepresentation>),
    Barrier(oneshot::Sender<()>),
}

/// `(group, key) -> expiration` for members still live in `store`.
fn member_of(store: &Store) -> impl FnMut(&str, &CacheKey) -> Option<OffsetDateTime> + '_ {
    move |group: &str, key: &CacheKey| {
        store
            .get(key)
            .filter(|rep| rep.in_group(group) && !rep.expired())
            .map(|rep| rep.expiration())
    }
}

struct BoundedShared {
    store: Store,
    groups: Mutex<GroupIndex>,
    sender: mpsc::Sender<WriteOp>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<WriteOp>>,
    dropped: AtomicU64,
    /// True from writer start until its final drain has finished.
    writing: watch::Sender<bool>,
}

impl BoundedShared {
    fn apply_store(&self, key: CacheKey, rep: Arc<CachedRepresentation>) {
        let expiration = rep.expiration();
        let names: Vec<String> = rep.groups().iter().cloned().collect();
        self.store.insert(key.clone(), rep);

        if names.is_empty() {
            return;
        }
        let mut groups = mutex_lock(&self.groups, SOURCE, "apply_store");
        for name in &names {
            groups.add(name, &key, expiration, &mut member_of(&self.store));
        }
    }

    fn apply(&self, op: WriteOp) {
        match op {
            WriteOp::Store(key, rep) => self.apply_store(key, rep),
            WriteOp::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    fn maintain(&self) {
        self.store.run_pending_tasks();
        let dropped = mutex_lock(&self.groups, SOURCE, "maintain")
            .prune_all(&mut member_of(&self.store));
        if dropped > 0 {
            debug!(cache = "bounded", dropped_groups = dropped, "pruned stale groups");
        }
    }
}

pub struct BoundedBackend {
    shared: Arc<BoundedShared>,
    writer: Arc<BoundedWriter>,
}

impl BoundedBackend {
    pub fn new(options: BoundedOptions) -> Result<Self, CacheError> {
        options.validate()?;

        let initial_capacity = usize::try_from(options.max_size / options.average_size)
            .unwrap_or(usize::MAX)
            .min(MAX_INITIAL_CAPACITY);
        let store: Store = Cache::builder()
            .max_capacity(options.max_size)
            .initial_capacity(initial_capacity)
            .weigher(|_key: &CacheKey, rep: &Arc<CachedRepresentation>| -> u32 {
                u32::try_from(rep.size()).unwrap_or(u32::MAX)
            })
            .expire_after(RepresentationExpiry)
            .eviction_listener(
                |key: Arc<CacheKey>, _rep: Arc<CachedRepresentation>, cause: RemovalCause| {
                    if cause.was_evicted() {
                        trace!(cache = "bounded", key = %key, cause = ?cause, "evicted");
                        counter!(METRIC_EVICT, "backend" => "bounded").increment(1);
                    }
                },
            )
            .build();

        let (sender, receiver) = mpsc::channel(options.write_buffer);
        let shared = Arc::new(BoundedShared {
            store,
            groups: Mutex::new(GroupIndex::new()),
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            dropped: AtomicU64::new(0),
            writing: watch::Sender::new(false),
        });
        let writer = Arc::new(BoundedWriter {
            worker: BackgroundWorker::new("bounded-writer"),
            shared: Arc::clone(&shared),
            prune_frequency: options.prune_frequency,
        });
        Ok(Self { shared, writer })
    }

    /// Resolve once every store queued before this call has been applied.
    ///
    /// Returns as soon as the writer is not running, including when it stops
    /// while this call is pending.
    pub async fn wait(&self) {
        let writing = self.shared.writing.subscribe();
        if !*writing.borrow() {
            return;
        }
        let barrier = async {
            let (done, applied) = oneshot::channel();
            if self.shared.sender.send(WriteOp::Barrier(done)).await.is_ok() {
                let _ = applied.await;
            }
        };
        tokio::select! {
            _ = barrier => {}
            _ = writer_stopped(writing) => {}
        }
    }

    /// Stores discarded because the write buffer was full.
    pub fn dropped_writes(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Groups currently indexed; members are only verified on access.
    pub fn group_count(&self) -> usize {
        mutex_lock(&self.shared.groups, SOURCE, "group_count").len()
    }

    /// Approximate entry count after running pending maintenance.
    pub fn entry_count(&self) -> u64 {
        self.shared.store.run_pending_tasks();
        self.shared.store.entry_count()
    }

    /// Approximate total weight after running pending maintenance.
    pub fn weighted_size(&self) -> u64 {
        self.shared.store.run_pending_tasks();
        self.shared.store.weighted_size()
    }
}

impl CacheBackend for BoundedBackend {
    fn load_representation(&self, key: &CacheKey) -> Option<Arc<CachedRepresentation>> {
        let rep = self.shared.store.get(key)?;
        if rep.expired() {
            self.shared.store.invalidate(key);
            return None;
        }
        trace!(cache = "bounded", key = %key, outcome = "hit");
        Some(rep)
    }

    fn store_representation(&self, key: CacheKey, representation: Arc<CachedRepresentation>) {
        match self.shared.sender.try_send(WriteOp::Store(key, representation)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(METRIC_STORE_DROPPED, "backend" => "bounded").increment(1);
                trace!(cache = "bounded", "write buffer full; store dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(cache = "bounded", "write buffer closed; store dropped");
            }
        }
    }

    fn delete_representation(&self, key: &CacheKey) {
        self.shared.store.invalidate(key);
    }

    fn delete_group(&self, group: &str) {
        let keys = mutex_lock(&self.shared.groups, SOURCE, "delete_group")
            .take(group, &mut member_of(&self.shared.store));
        for key in &keys {
            self.shared.store.invalidate(key);
        }
        debug!(cache = "bounded", group, removed = keys.len(), "deleted group");
    }

    fn startables(&self) -> Vec<Arc<dyn Startable>> {
        vec![Arc::clone(&self.writer) as Arc<dyn Startable>]
    }
}

async fn writer_stopped(mut writing: watch::Receiver<bool>) {
    while *writing.borrow_and_update() {
        if writing.changed().await.is_err() {
            return;
        }
    }
}

/// Applies queued stores and keeps the group index tidy.
struct BoundedWriter {
    worker: BackgroundWorker,
    shared: Arc<BoundedShared>,
    prune_frequency: Duration,
}

#[async_trait]
impl Startable for BoundedWriter {
    fn name(&self) -> &'static str {
        self.worker.name()
    }

    async fn start(&self) -> Result<(), CacheError> {
        let shared = Arc::clone(&self.shared);
        let period = self.prune_frequency;
        self.shared.writing.send_replace(true);
        self.worker.spawn(move |mut stop| async move {
            let mut receiver = shared.receiver.lock().await;
            let mut maintenance = tokio::time::interval(period);
            maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);
            maintenance.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = maintenance.tick() => shared.maintain(),
                    op = receiver.recv() => match op {
                        Some(op) => shared.apply(op),
                        None => break,
                    },
                }
            }

            while let Ok(op) = receiver.try_recv() {
                shared.apply(op);
            }
            shared.maintain();
            shared.writing.send_replace(false);
        })
    }

    async fn stop(&self) {
        self.worker.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::EncodingType;

    fn key(path: &str) -> CacheKey {
        CacheKey::new(path, "application/json", "", "")
    }

    fn rep(ttl: Duration, groups: &[&str], body: &'static [u8]) -> Arc<CachedRepresentation> {
        Arc::new(
            CachedRepresentation::with_ttl(ttl)
                .with_groups(groups.iter().copied())
                .with_body(EncodingType::Identity, body),
        )
    }

    async fn started(options: BoundedOptions) -> (BoundedBackend, Arc<dyn Startable>) {
        let backend = BoundedBackend::new(options).expect("backend");
        let writer = backend.startables().pop().expect("writer");
        writer.start().await.expect("start writer");
        (backend, writer)
    }

    #[test]
    fn invalid_options_are_rejected() {
        for options in [
            BoundedOptions::new(0, 1),
            BoundedOptions::new(10, 0),
            BoundedOptions::new(10, 20),
            BoundedOptions {
                write_buffer: 0,
                ..BoundedOptions::new(10, 1)
            },
            BoundedOptions {
                prune_frequency: Duration::ZERO,
                ..BoundedOptions::new(10, 1)
            },
        ] {
            assert!(matches!(
                BoundedBackend::new(options),
                Err(CacheError::InvalidConfig { .. })
            ));
        }
    }

    #[tokio::test]
    async fn stores_become_visible_after_wait() {
        let (backend, writer) = started(BoundedOptions::new(1 << 20, 64)).await;
        backend.store_representation(key("/a"), rep(Duration::from_secs(60), &[], b"hello"));
        backend.wait().await;

        let loaded = backend.load_representation(&key("/a")).expect("hit");
        assert_eq!(
            loaded.get_body(EncodingType::Identity).expect("body").0.as_ref(),
            b"hello"
        );
        writer.stop().await;
    }

    #[tokio::test]
    async fn delete_is_immediate() {
        let (backend, writer) = started(BoundedOptions::new(1 << 20, 64)).await;
        backend.store_representation(key("/a"), rep(Duration::from_secs(60), &[], b"x"));
        backend.wait().await;

        backend.delete_representation(&key("/a"));
        assert!(backend.load_representation(&key("/a")).is_none());
        writer.stop().await;
    }

    #[tokio::test]
    async fn full_write_buffer_drops_stores() {
        let backend = BoundedBackend::new(BoundedOptions {
            write_buffer: 2,
            ..BoundedOptions::new(1 << 20, 64)
        })
        .expect("backend");

        for index in 0..5 {
            backend.store_representation(
                key(&format!("/{index}")),
                rep(Duration::from_secs(60), &[], b"x"),
            );
        }
        assert_eq!(backend.dropped_writes(), 3);

        let writer = backend.startables().pop().expect("writer");
        writer.start().await.expect("start");
        backend.wait().await;
        assert!(backend.load_representation(&key("/0")).is_some());
        assert!(backend.load_representation(&key("/1")).is_some());
        assert!(backend.load_representation(&key("/4")).is_none());
        writer.stop().await;
    }

    #[tokio::test]
    async fn entries_heavier_than_capacity_are_not_retained() {
        let (backend, writer) = started(BoundedOptions::new(16, 8)).await;
        backend.store_representation(
            key("/big"),
            rep(Duration::from_secs(60), &[], b"this body is far larger than sixteen bytes"),
        );
        backend.wait().await;

        assert_eq!(backend.entry_count(), 0);
        assert!(backend.load_representation(&key("/big")).is_none());
        writer.stop().await;
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let (backend, writer) = started(BoundedOptions::new(1 << 20, 64)).await;
        backend.store_representation(key("/a"), rep(Duration::from_millis(20), &[], b"x"));
        backend.wait().await;
        assert!(backend.load_representation(&key("/a")).is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(backend.load_representation(&key("/a")).is_none());
        writer.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_queued_stores() {
        let (backend, writer) = started(BoundedOptions::new(1 << 20, 64)).await;
        for index in 0..20 {
            backend.store_representation(
                key(&format!("/{index}")),
                rep(Duration::from_secs(60), &["all"], b"x"),
            );
        }
        writer.stop().await;

        for index in 0..20 {
            assert!(backend.load_representation(&key(&format!("/{index}"))).is_some());
        }
        assert_eq!(backend.group_count(), 1);
        backend.delete_group("all");
        assert_eq!(backend.group_count(), 0);
        assert_eq!(backend.entry_count(), 0);
    }

    #[test]
    fn presize_is_capped_for_tiny_average_sizes() {
        let backend = BoundedBackend::new(BoundedOptions::new(1 << 36, 1)).expect("backend");
        assert_eq!(backend.entry_count(), 0);
    }

    #[tokio::test]
    async fn wait_returns_when_writer_stops_before_barrier_is_read() {
        let backend = BoundedBackend::new(BoundedOptions::new(1 << 20, 64)).expect("backend");
        // Writer reported as running, but nothing reads the buffer.
        backend.shared.writing.send_replace(true);

        let shared = Arc::clone(&backend.shared);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shared.writing.send_replace(false);
        });

        tokio::time::timeout(Duration::from_secs(5), backend.wait())
            .await
            .expect("wait should give up once the writer stops");
        stopper.await.expect("stopper");
    }

    #[tokio::test]
    async fn wait_after_stop_returns() {
        let (backend, writer) = started(BoundedOptions::new(1 << 20, 64)).await;
        writer.stop().await;
        tokio::time::timeout(Duration::from_secs(5), backend.wait())
            .await
            .expect("wait after stop");
    }

    #[tokio::test]
    async fn wait_without_writer_returns_immediately() {
        let backend = BoundedBackend::new(BoundedOptions::new(1 << 20, 64)).expect("backend");
        backend.store_representation(key("/a"), rep(Duration::from_secs(60), &[], b"x"));
        backend.wait().await;
        assert!(backend.load_representation(&key("/a")).is_none());
    }
}
