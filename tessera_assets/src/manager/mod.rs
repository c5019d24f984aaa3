//! Asynchronous resource loading with deduplication, caching and fallbacks.
//!
//! A [`ResourceManager`] is a cloneable handle on shared state:
//!
//! - `pending` tracks every load in flight, one slot per key, stamped with a generation
//! - `cache` holds finished resources under the configured [`Reclaim`](crate::Reclaim) policy
//! - a dispatch thread receives [`Completion`]s from workers and promotes them into the cache
//!
//! Locks are always taken in the order pending, cache, failures.

use crate::config::ManagerConfig;
use crate::error::{KeyError, LoadError, ResourceError};
use crate::key::{ResourceKey, ResourceType};
use crate::loader::{Loader, LoaderRegistry};
use crate::pool::WorkerPool;
use crate::registry::Registry;
use crate::resource::{Resource, downcast_arc};
use crate::source::{ByteSource, ByteStream};
use crate::state::LoadState;
use crate::task::{LoadResult, Task};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use derivative::Derivative;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tessera_containers::error::ContainerErrors;
use tessera_containers::prelude::{CacheMap, ConcurrentCache, Pinned};


const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

/// Resolves once the load it belongs to has an outcome
type Signal = Shared<BoxFuture<'static, LoadResult>>;

fn signal(key: ResourceKey, outcome_recv: tokio::sync::oneshot::Receiver<LoadResult>) -> Signal {
    outcome_recv
        .map(move |received| received.unwrap_or_else(|_| Err(LoadError::Aborted { key })))
        .boxed()
        .shared()
}

/// One load in flight
#[derive(Derivative, Clone)]
#[derivative(Debug)]
struct Pending {
    generation: u64,
    /// [`QUEUED`], [`RUNNING`] or [`CANCELLED`]
    state: Arc<AtomicU8>,
    #[derivative(Debug = "ignore")]
    signal: Signal,
}

/// Posted by a worker once a task has an outcome
#[derive(Debug)]
struct Completion {
    key: ResourceKey,
    generation: u64,
    outcome: LoadResult,
}

#[derive(Debug, Default)]
struct Counters {
    requested: AtomicUsize,
    loaded: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn record(&self, outcome: &LoadResult) {
        match outcome {
            Ok(_) => self.loaded.fetch_add(1, Ordering::SeqCst),
            Err(_) => self.failed.fetch_add(1, Ordering::SeqCst),
        };
    }
}

/// Owns everything a queued load needs, reports it as aborted if dropped before running
struct Job {
    key: ResourceKey,
    generation: u64,
    state: Arc<AtomicU8>,
    counters: Arc<Counters>,
    outcome_send: Option<tokio::sync::oneshot::Sender<LoadResult>>,
    completion_send: crossbeam_channel::Sender<Completion>,
}

impl Job {
    fn run(mut self, mut task: Task) {
        if self
            .state
            .compare_exchange(QUEUED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // aborted and already counted
            return;
        }
        tracing::trace!("Loading {}", self.key);
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| task.call()))
            .unwrap_or_else(|_| Err(LoadError::initialization(&self.key, "decoder panicked")));
        drop(task);
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: LoadResult) {
        self.counters.record(&outcome);
        if let Err(e) = &outcome {
            tracing::warn!("Failed to load resource {e}");
        }
        let _ = self.completion_send.send(Completion {
            key: self.key.clone(),
            generation: self.generation,
            outcome: outcome.clone(),
        });
        if let Some(outcome_send) = self.outcome_send.take() {
            let _ = outcome_send.send(outcome);
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if self
            .state
            .compare_exchange(QUEUED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.finish(Err(LoadError::Aborted {
                key: self.key.clone(),
            }));
        }
    }
}

/// How [`ResourceManager::get`] obtains its outcome
enum Claim {
    Wait(Pending),
    Inline {
        generation: u64,
        outcome_send: tokio::sync::oneshot::Sender<LoadResult>,
    },
}

#[derive(Derivative)]
#[derivative(Debug)]
struct ManagerInner {
    config: ManagerConfig,
    registry: Registry,
    loaders: LoaderRegistry,
    fallbacks: DashMap<ResourceType, Arc<dyn Resource>>,
    pending: DashMap<ResourceKey, Pending>,
    /// Last error of keys that failed without a fallback
    failures: DashMap<ResourceKey, LoadError>,
    cache: ConcurrentCache<ResourceKey, dyn Resource>,
    #[derivative(Debug = "ignore")]
    source: Box<dyn ByteSource>,
    pool: WorkerPool,
    counters: Arc<Counters>,
    generation: AtomicU64,
    completion_send: crossbeam_channel::Sender<Completion>,
}

/// Loads, deduplicates and caches resources
///
/// Cloning hands out another handle on the same manager.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    inner: Arc<ManagerInner>,
}

impl ResourceManager {
    pub fn new(source: impl ByteSource) -> Self {
        Self::with_config(source, ManagerConfig::default())
    }

    pub fn with_config(source: impl ByteSource, config: ManagerConfig) -> Self {
        Self::with_registry(Registry::new(), source, config)
    }

    /// Build a manager interning keys through an existing `registry`
    pub fn with_registry(registry: Registry, source: impl ByteSource, config: ManagerConfig) -> Self {
        let (completion_send, completion_recv) = crossbeam_channel::unbounded();
        let inner = Arc::new(ManagerInner {
            pool: WorkerPool::new(
                config.workers,
                config.idle_timeout,
                config.thread_name.clone(),
            ),
            cache: CacheMap::new(config.cache),
            config,
            registry,
            loaders: LoaderRegistry::new(),
            fallbacks: DashMap::new(),
            pending: DashMap::new(),
            failures: DashMap::new(),
            source: Box::new(source),
            counters: Arc::default(),
            generation: AtomicU64::new(0),
            completion_send,
        });

        let weak = Arc::downgrade(&inner);
        let spawned = std::thread::Builder::new()
            .name(format!("{}-dispatch", inner.config.thread_name))
            .spawn(move || dispatch(weak, completion_recv));
        if let Err(e) = spawned {
            // blocked gets still promote their own results
            tracing::error!("Unable to spawn resource dispatch thread: {e}");
        }
        Self { inner }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn loaders(&self) -> &LoaderRegistry {
        &self.inner.loaders
    }

    /// Intern `path` through this manager's registry
    pub fn key(&self, path: &str) -> Result<ResourceKey, KeyError> {
        self.inner.registry.key(path)
    }

    pub fn resource_type(&self, ext: &str) -> ResourceType {
        self.inner.registry.resource_type(ext)
    }

    pub fn register_loader(&self, loader: Arc<dyn Loader>) {
        self.inner.loaders.register(loader);
    }

    pub fn register_loader_for(&self, loader: Arc<dyn Loader>, types: &[ResourceType]) {
        self.inner.loaders.register_for(loader, types);
    }

    /// Substitute `fallback` whenever a resource of one of `types` fails to load
    pub fn set_fallback(&self, fallback: Arc<dyn Resource>, types: &[ResourceType]) {
        for ty in types {
            self.inner.fallbacks.insert(ty.clone(), fallback.clone());
        }
    }

    pub fn fallback(&self, ty: &ResourceType) -> Option<Arc<dyn Resource>> {
        self.inner.fallback(ty)
    }

    /// Start loading `key` in the background.
    ///
    /// Does nothing if the key is already cached or in flight, unless `force_reload` is set.
    /// Failures are never returned: they are counted and either replaced by the fallback for
    /// the key's type or surfaced by the next [`ResourceManager::get`].
    pub fn request(&self, key: &ResourceKey, force_reload: bool) -> ResourceKey {
        let inner = &self.inner;
        if !force_reload && (inner.cache.contains_key(key) || inner.pending.contains_key(key)) {
            return key.clone();
        }
        // sources and loaders run before any map entry is locked
        let prepared = inner.prepare(key);

        let entry = inner.pending.entry(key.clone());
        if !force_reload && (matches!(entry, Entry::Occupied(_)) || inner.cache.contains_key(key))
        {
            drop(entry);
            tracing::trace!("Dropped surplus load of {key}");
            return key.clone();
        }

        inner.counters.requested.fetch_add(1, Ordering::SeqCst);
        inner.failures.remove(key);
        let generation = inner.next_generation();
        match prepared {
            Ok(task) => {
                let (job, pending) = inner.job(key, generation);
                entry.insert(pending);
                inner.pool.submit(move || job.run(task));
                tracing::trace!("Dispatched {key} at generation {generation}");
            }
            Err(e) => {
                drop(entry);
                inner.counters.failed.fetch_add(1, Ordering::SeqCst);
                inner.fail(key, e);
            }
        }
        key.clone()
    }

    pub fn request_all(&self, keys: &[ResourceKey], force_reload: bool) {
        for key in keys {
            self.request(key, force_reload);
        }
    }

    pub fn request_path(&self, path: &str) -> Result<ResourceKey, KeyError> {
        let key = self.key(path)?;
        Ok(self.request(&key, false))
    }

    /// Intern and request every path, stopping at the first malformed one
    pub fn request_paths(&self, paths: &[&str]) -> Result<Vec<ResourceKey>, KeyError> {
        paths.iter().map(|path| self.request_path(path)).collect()
    }

    /// The resource for `key`, blocking until it is available.
    ///
    /// Served from the cache, from a load already in flight, or by loading inline on the
    /// calling thread. On failure the fallback for the key's type is returned if there is one.
    pub fn get(&self, key: &ResourceKey) -> LoadResult {
        let inner = &self.inner;
        if let Some(resource) = inner.cache.get(key) {
            return Ok(resource);
        }

        let claim = match inner.pending.entry(key.clone()) {
            Entry::Occupied(occupied) => Claim::Wait(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                if let Some(resource) = inner.cache.get(key) {
                    return Ok(resource);
                }
                inner.counters.requested.fetch_add(1, Ordering::SeqCst);
                inner.failures.remove(key);
                let generation = inner.next_generation();
                let (outcome_send, outcome_recv) = tokio::sync::oneshot::channel();
                vacant.insert(Pending {
                    generation,
                    state: Arc::new(AtomicU8::new(RUNNING)),
                    signal: signal(key.clone(), outcome_recv),
                });
                Claim::Inline {
                    generation,
                    outcome_send,
                }
            }
        };

        match claim {
            Claim::Wait(pending) => {
                let outcome = futures::executor::block_on(pending.signal);
                inner.resolve(key, pending.generation, outcome)
            }
            Claim::Inline {
                generation,
                outcome_send,
            } => {
                tracing::trace!("Loading {key} inline");
                let outcome = inner.prepare(key).and_then(|task| {
                    std::panic::catch_unwind(AssertUnwindSafe(|| task.load_inline()))
                        .unwrap_or_else(|_| Err(LoadError::initialization(key, "decoder panicked")))
                });
                inner.counters.record(&outcome);
                if let Err(e) = &outcome {
                    tracing::warn!("Failed to load resource {e}");
                }
                let _ = outcome_send.send(outcome.clone());
                inner.resolve(key, generation, outcome)
            }
        }
    }

    /// [`ResourceManager::get`] every key, stopping at the first failure
    pub fn get_all(&self, keys: &[ResourceKey]) -> Result<Vec<Arc<dyn Resource>>, LoadError> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    pub fn get_path(&self, path: &str) -> Result<Arc<dyn Resource>, ResourceError> {
        let key = self.key(path)?;
        Ok(self.get(&key)?)
    }

    /// [`ResourceManager::get`] downcast to `T`
    pub fn get_as<T: Resource>(&self, key: &ResourceKey) -> Result<Arc<T>, LoadError> {
        let resource = self.get(key)?;
        downcast_arc::<T>(resource).ok_or_else(|| LoadError::TypeMismatch {
            key: key.clone(),
            expected: std::any::type_name::<T>(),
        })
    }

    /// Hold the cached resource for `key` in place.
    ///
    /// Under [`Reclaim::Phantom`](crate::Reclaim::Phantom) this is the only way a cached resource is ever evicted: the
    /// entry goes once it has been pinned and every [`Pinned`] for it is dropped.
    pub fn pin(&self, key: &ResourceKey) -> Result<Pinned<ResourceKey, dyn Resource>, ContainerErrors> {
        self.inner.cache.pin(key)
    }

    /// Open the raw bytes behind `key`
    pub fn stream(&self, key: &ResourceKey) -> Result<ByteStream, LoadError> {
        self.inner.source.open(key)
    }

    pub fn state(&self, key: &ResourceKey) -> LoadState {
        let inner = &self.inner;
        if inner.pending.contains_key(key) {
            LoadState::Pending
        } else if inner.cache.contains_key(key) {
            LoadState::Cached
        } else if inner.failures.contains_key(key) {
            LoadState::Failed
        } else {
            LoadState::Unrequested
        }
    }

    /// Cancel every load that has not started yet, running decodes are left alone
    pub fn abort(&self) {
        let inner = &self.inner;
        let mut aborted = 0;
        inner.pending.retain(|key, pending| {
            let cancelled = pending
                .state
                .compare_exchange(QUEUED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if cancelled {
                inner.counters.failed.fetch_add(1, Ordering::SeqCst);
                inner.failures.insert(
                    key.clone(),
                    LoadError::Aborted { key: key.clone() },
                );
                aborted += 1;
            }
            !cancelled
        });
        inner.pool.purge();
        if aborted > 0 {
            tracing::debug!("{aborted} resource loading task(s) have been aborted.");
        }
    }

    /// Zero the requested, loaded and failed counters
    pub fn reset(&self) {
        let counters = &self.inner.counters;
        counters.requested.store(0, Ordering::SeqCst);
        counters.loaded.store(0, Ordering::SeqCst);
        counters.failed.store(0, Ordering::SeqCst);
    }

    /// Drop every cached resource and remembered failure, keys stay valid
    pub fn clear(&self) {
        self.inner.cache.clear();
        self.inner.failures.clear();
        tracing::debug!("Resource cache has been cleared");
    }

    /// [`ResourceManager::abort`], [`ResourceManager::reset`] then [`ResourceManager::clear`]
    pub fn restart(&self) {
        self.abort();
        self.reset();
        self.clear();
    }

    pub fn requested(&self) -> usize {
        self.inner.counters.requested.load(Ordering::SeqCst)
    }

    pub fn loaded(&self) -> usize {
        self.inner.counters.loaded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.inner.counters.failed.load(Ordering::SeqCst)
    }

    /// Share of requested loads that finished, `1.0` when nothing is outstanding
    pub fn progress(&self) -> f32 {
        let requested = self.requested();
        if requested == 0 {
            return 1.0;
        }
        let done = self.loaded() + self.failed();
        (done as f32 / requested as f32).min(1.0)
    }

    pub fn is_loading(&self) -> bool {
        self.loaded() + self.failed() < self.requested()
    }

    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    /// Cached resources of type `ty`
    pub fn cache_len_of(&self, ty: &ResourceType) -> usize {
        self.inner.cache.sweep();
        self.inner
            .cache
            .keys()
            .iter()
            .filter(|key| key.resource_type() == ty)
            .count()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn pool_size(&self) -> usize {
        self.inner.pool.pool_size()
    }

    pub fn active_workers(&self) -> usize {
        self.inner.pool.active()
    }
}

impl ManagerInner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst)
    }

    fn fallback(&self, ty: &ResourceType) -> Option<Arc<dyn Resource>> {
        self.fallbacks.get(ty).map(|entry| entry.value().clone())
    }

    /// Resolve the loader and open the stream for `key`
    fn prepare(&self, key: &ResourceKey) -> Result<Task, LoadError> {
        let ty = key.resource_type();
        let loader = self
            .loaders
            .get(ty)
            .ok_or_else(|| LoadError::UnsupportedType {
                key: key.clone(),
                ty: ty.clone(),
            })?;
        let stream = self.source.open(key)?;
        loader.new_task(key, stream)
    }

    /// The job reporting the load of `key` at `generation`, and the slot waiters listen on
    fn job(&self, key: &ResourceKey, generation: u64) -> (Job, Pending) {
        let (outcome_send, outcome_recv) = tokio::sync::oneshot::channel();
        let state = Arc::new(AtomicU8::new(QUEUED));
        let job = Job {
            key: key.clone(),
            generation,
            state: state.clone(),
            counters: self.counters.clone(),
            outcome_send: Some(outcome_send),
            completion_send: self.completion_send.clone(),
        };
        let pending = Pending {
            generation,
            state,
            signal: signal(key.clone(), outcome_recv),
        };
        (job, pending)
    }

    /// Install the fallback for a failed key, or remember the failure
    fn fail(&self, key: &ResourceKey, error: LoadError) -> Option<Arc<dyn Resource>> {
        match self.fallback(key.resource_type()) {
            Some(fallback) => {
                tracing::warn!("Substituting fallback for {key}: {error}");
                self.cache.put(key.clone(), fallback.clone());
                Some(fallback)
            }
            None => {
                if !matches!(error, LoadError::Aborted { .. }) {
                    tracing::warn!("No fallback registered for {}", key.resource_type());
                }
                self.failures.insert(key.clone(), error);
                None
            }
        }
    }

    /// Promote an outcome if it belongs to the current pending slot of `key`
    fn settle(&self, key: &ResourceKey, generation: u64, outcome: &LoadResult) {
        match self.pending.entry(key.clone()) {
            Entry::Occupied(occupied) if occupied.get().generation == generation => {
                match outcome {
                    Ok(resource) => {
                        self.cache.put(key.clone(), resource.clone());
                        self.failures.remove(key);
                    }
                    Err(e) => {
                        self.fail(key, e.clone());
                    }
                }
                occupied.remove();
                tracing::trace!("Promoted {key} at generation {generation}");
            }
            _ => tracing::trace!("Discarded stale completion of {key} at generation {generation}"),
        }
    }

    fn resolve(&self, key: &ResourceKey, generation: u64, outcome: LoadResult) -> LoadResult {
        self.settle(key, generation, &outcome);
        outcome.or_else(|e| self.fallback(key.resource_type()).ok_or(e))
    }
}

/// Promotes completions until the manager is gone
fn dispatch(inner: Weak<ManagerInner>, completion_recv: crossbeam_channel::Receiver<Completion>) {
    while let Ok(completion) = completion_recv.recv() {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.settle(&completion.key, completion.generation, &completion.outcome);
    }
    tracing::trace!("Resource dispatch thread stopped");
}
