//! A key/value cache whose entries are reclaimed once they stop being referenced.
//!
//! Each [`CacheMap`] is built with a [`Reclaim`] policy deciding when an entry is dead:
//!
//! - [`Reclaim::Soft`] keeps a strong reference and only evicts entries nobody else holds,
//!   once they have sat idle for longer than `idle` or the cache grew past `capacity`
//!   (least recently used first).
//! - [`Reclaim::Weak`] keeps a [`Weak`] reference, the entry dies with the last external
//!   [`Arc`].
//! - [`Reclaim::Phantom`] keeps a strong reference plus an explicit pin count, the entry is
//!   evicted once every [`Pinned`] holder has been released.
//!
//! Liveness is wired through [`ReleaseTicket`]s. Dropping a ticket posts a notice on the
//! cache's release queue which is drained on the next access. Tickets are stamped with the
//! generation of the entry they belong to, so a ticket from an entry that has since been
//! replaced or cleared can never evict its successor.

use crate::error::ContainerErrors;
use crate::traits::{Backing, LocalMap};
use dashmap::DashMap;
use derivative::Derivative;
use std::fmt::{Debug, Formatter};
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// When an entry becomes eligible for eviction
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Reclaim {
    /// Evict entries without outside holders after `idle`, or once over `capacity`
    Soft { capacity: usize, idle: Duration },
    /// Evict as soon as no outside [`Arc`] survives
    Weak,
    /// Evict once every pin has been released
    Phantom,
}

impl Default for Reclaim {
    fn default() -> Self {
        Reclaim::Soft {
            capacity: 1024,
            idle: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub reclaim: Reclaim,
    /// Upper bound between two full liveness scans triggered by regular access
    pub scan_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reclaim: Reclaim::default(),
            scan_interval: Duration::from_secs(1),
        }
    }
}

impl From<Reclaim> for CacheConfig {
    fn from(reclaim: Reclaim) -> Self {
        Self {
            reclaim,
            ..Default::default()
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ReleaseKind {
    /// Posted when a stored value goes away
    Value,
    /// Posted when a [`Pinned`] holder goes away
    Pin,
}

#[derive(Debug)]
struct ReleaseNotice<K> {
    key: K,
    generation: u64,
    kind: ReleaseKind,
}

/// Liveness wire of one cache entry, posts a release notice when dropped
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ReleaseTicket<K> {
    key: Option<K>,
    generation: u64,
    #[derivative(Debug = "ignore")]
    kind: ReleaseKind,
    #[derivative(Debug = "ignore")]
    release_send: crossbeam_channel::Sender<ReleaseNotice<K>>,
}

impl<K> ReleaseTicket<K> {
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<K> Drop for ReleaseTicket<K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            // cache already gone, nothing to release
            let _ = self.release_send.send(ReleaseNotice {
                key,
                generation: self.generation,
                kind: self.kind,
            });
        }
    }
}

/// An explicit holder of a cached value
#[derive(Derivative)]
#[derivative(Debug(bound = "K: Debug, V: Debug"))]
pub struct Pinned<K, V: ?Sized> {
    value: Arc<V>,
    ticket: ReleaseTicket<K>,
}

impl<K, V: ?Sized> Pinned<K, V> {
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    pub fn generation(&self) -> u64 {
        self.ticket.generation
    }
}

impl<K, V: ?Sized> Deref for Pinned<K, V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

enum Referent<V: ?Sized> {
    Strong(Arc<V>),
    Weak(Weak<V>),
}

/// One incarnation of a cached value
pub struct CacheEntry<V: ?Sized> {
    referent: Referent<V>,
    generation: u64,
    pins: AtomicUsize,
    pinned_once: AtomicBool,
    /// Nanoseconds since the cache origin
    last_used: AtomicU64,
}

impl<V: ?Sized> CacheEntry<V> {
    fn new(reclaim: &Reclaim, value: &Arc<V>, generation: u64, now: u64) -> Self {
        let referent = match reclaim {
            Reclaim::Weak => Referent::Weak(Arc::downgrade(value)),
            Reclaim::Soft { .. } | Reclaim::Phantom => Referent::Strong(value.clone()),
        };
        Self {
            referent,
            generation,
            pins: AtomicUsize::new(0),
            pinned_once: AtomicBool::new(false),
            last_used: AtomicU64::new(now),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pins(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    fn upgrade(&self) -> Option<Arc<V>> {
        match &self.referent {
            Referent::Strong(arc) => Some(arc.clone()),
            Referent::Weak(weak) => weak.upgrade(),
        }
    }

    fn touch(&self, now: u64) {
        self.last_used.fetch_max(now, Ordering::Relaxed);
    }

    /// Whether someone outside the cache still holds the value
    fn held_externally(&self) -> bool {
        match &self.referent {
            Referent::Strong(arc) => Arc::strong_count(arc) > 1,
            Referent::Weak(weak) => weak.strong_count() > 0,
        }
    }

    fn pin(&self) {
        self.pinned_once.store(true, Ordering::Release);
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    fn unpin(&self) {
        let _ = self
            .pins
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pins| {
                pins.checked_sub(1)
            });
    }

    fn is_live(&self, reclaim: &Reclaim, now: u64) -> bool {
        match reclaim {
            Reclaim::Weak => self.held_externally(),
            Reclaim::Phantom => self.pins() > 0 || !self.pinned_once.load(Ordering::Acquire),
            Reclaim::Soft { idle, .. } => {
                let idle = u64::try_from(idle.as_nanos()).unwrap_or(u64::MAX);
                self.held_externally()
                    || now.saturating_sub(self.last_used.load(Ordering::Relaxed)) <= idle
            }
        }
    }
}

/// Cache of `K` to `Arc<V>` with a [`Reclaim`] policy, backed by `M`
pub struct CacheMap<K, V: ?Sized, M = DashMap<K, CacheEntry<V>>>
where
    M: Backing<K, CacheEntry<V>>,
{
    entries: M,
    config: CacheConfig,
    origin: Instant,
    next_generation: AtomicU64,
    last_scan: AtomicU64,
    release_send: crossbeam_channel::Sender<ReleaseNotice<K>>,
    release_recv: crossbeam_channel::Receiver<ReleaseNotice<K>>,
    _marker: PhantomData<fn() -> Arc<V>>,
}

/// Single threaded cache
pub type LocalCache<K, V> = CacheMap<K, V, LocalMap<K, CacheEntry<V>>>;

/// Cache safe for concurrent access
pub type ConcurrentCache<K, V> = CacheMap<K, V, DashMap<K, CacheEntry<V>>>;

impl<K, V: ?Sized, M> Debug for CacheMap<K, V, M>
where
    M: Backing<K, CacheEntry<V>>,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheMap")
            .field("reclaim", &self.config.reclaim)
            .field("entries", &self.entries.len())
            .field("pending_releases", &self.release_recv.len())
            .finish()
    }
}

impl<K, V: ?Sized, M> CacheMap<K, V, M>
where
    K: Eq + Hash + Clone,
    M: Backing<K, CacheEntry<V>>,
{
    pub fn new(reclaim: Reclaim) -> Self {
        Self::with_config(CacheConfig::from(reclaim))
    }

    pub fn with_config(config: CacheConfig) -> Self {
        let (release_send, release_recv) = crossbeam_channel::unbounded();
        Self {
            entries: M::new(),
            config,
            origin: Instant::now(),
            next_generation: AtomicU64::new(0),
            last_scan: AtomicU64::new(0),
            release_send,
            release_recv,
            _marker: PhantomData,
        }
    }

    pub fn reclaim(&self) -> Reclaim {
        self.config.reclaim
    }

    /// Number of release notices waiting to be processed
    pub fn release_pending(&self) -> usize {
        self.release_recv.len()
    }

    /// Store `value` under `key`, returning the value it replaced.
    ///
    /// The replaced entry's tickets and pins are severed and will not affect the new entry.
    pub fn put(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        self.refresh();
        let now = self.now();
        let entry = CacheEntry::new(&self.config.reclaim, &value, self.generation(), now);
        self.entries
            .insert(key, entry)
            .and_then(|previous| previous.upgrade())
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.refresh();
        let now = self.now();
        let found = self
            .entries
            .with(key, |entry| {
                entry.touch(now);
                entry.upgrade().ok_or(entry.generation)
            })?;
        match found {
            Ok(value) => Some(value),
            Err(generation) => {
                // weak referent is gone, drop the husk
                self.entries
                    .remove_if(key, |entry| entry.generation == generation);
                None
            }
        }
    }

    /// Return the live value for `key`, or store the one built by `make`.
    ///
    /// Exactly one value wins per key even under concurrent calls. `make` receives the
    /// [`ReleaseTicket`] of the new entry, a value that owns its ticket gets evicted promptly
    /// once it is dropped. `make` runs while the key is locked and must not touch this cache.
    pub fn get_or_insert_with<F>(&self, key: K, make: F) -> Arc<V>
    where
        F: FnOnce(ReleaseTicket<K>) -> Arc<V>,
    {
        self.refresh();
        let now = self.now();
        let reclaim = self.config.reclaim;
        let ticket_key = key.clone();
        self.entries.upsert(
            key,
            |entry| {
                let value = entry.upgrade()?;
                entry.touch(now);
                Some(value)
            },
            move || {
                let generation = self.generation();
                let value = make(ReleaseTicket {
                    key: Some(ticket_key),
                    generation,
                    kind: ReleaseKind::Value,
                    release_send: self.release_send.clone(),
                });
                (CacheEntry::new(&reclaim, &value, generation, now), value)
            },
        )
    }

    /// Pin the value under `key`, it will not be reclaimed while the [`Pinned`] is alive
    pub fn pin(&self, key: &K) -> Result<Pinned<K, V>, ContainerErrors> {
        self.refresh();
        let now = self.now();
        let (value, generation) = self
            .entries
            .with(key, |entry| {
                entry.touch(now);
                entry.upgrade().map(|value| {
                    entry.pin();
                    (value, entry.generation)
                })
            })
            .ok_or(ContainerErrors::NonexistentEntry)?
            .ok_or(ContainerErrors::StaleEntry)?;
        Ok(Pinned {
            value,
            ticket: ReleaseTicket {
                key: Some(key.clone()),
                generation,
                kind: ReleaseKind::Pin,
                release_send: self.release_send.clone(),
            },
        })
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.entries.remove(key).and_then(|entry| entry.upgrade())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.refresh();
        self.entries
            .with(key, |entry| match &entry.referent {
                Referent::Strong(_) => true,
                Referent::Weak(weak) => weak.strong_count() > 0,
            })
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.sweep();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently stored, including entries not yet swept
    pub fn keys(&self) -> Vec<K> {
        self.entries.keys()
    }

    /// Remove every entry.
    ///
    /// Generations are never reused, so tickets handed out before the clear are stale from
    /// here on.
    pub fn clear(&self) {
        while self.release_recv.try_recv().is_ok() {}
        self.entries.clear();
    }

    /// Process all release notices then scan every entry for liveness
    pub fn sweep(&self) {
        self.drain_releases();
        self.scan();
    }

    fn now(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Cheap sweep run on every access, a full scan only once `scan_interval` has passed
    fn refresh(&self) {
        self.drain_releases();
        let now = self.now();
        let interval = u64::try_from(self.config.scan_interval.as_nanos()).unwrap_or(u64::MAX);
        let last = self.last_scan.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= interval
            && self
                .last_scan
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            self.scan();
        }
    }

    fn drain_releases(&self) {
        let now = self.now();
        let reclaim = self.config.reclaim;
        while let Ok(notice) = self.release_recv.try_recv() {
            self.entries.remove_if(&notice.key, |entry| {
                if entry.generation != notice.generation {
                    return false;
                }
                if notice.kind == ReleaseKind::Pin {
                    entry.unpin();
                }
                !entry.is_live(&reclaim, now)
            });
        }
    }

    fn scan(&self) {
        let now = self.now();
        self.last_scan.store(now, Ordering::Relaxed);
        let reclaim = self.config.reclaim;
        self.entries.retain(|_, entry| entry.is_live(&reclaim, now));

        if let Reclaim::Soft { capacity, .. } = reclaim {
            self.trim(capacity);
        }
    }

    /// Evict the least recently used unheld entries until at most `capacity` remain
    fn trim(&self, capacity: usize) {
        let excess = self.entries.len().saturating_sub(capacity);
        if excess == 0 {
            return;
        }
        let mut candidates: Vec<(u64, u64, K)> = self
            .entries
            .keys()
            .into_iter()
            .filter_map(|key| {
                self.entries
                    .with(&key, |entry| {
                        (!entry.held_externally()).then(|| {
                            (
                                entry.last_used.load(Ordering::Relaxed),
                                entry.generation,
                            )
                        })
                    })
                    .flatten()
                    .map(|(last_used, generation)| (last_used, generation, key))
            })
            .collect();
        candidates.sort_unstable_by_key(|(last_used, _, _)| *last_used);
        for (_, generation, key) in candidates.into_iter().take(excess) {
            self.entries.remove_if(&key, |entry| {
                entry.generation == generation && !entry.held_externally()
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soft(capacity: usize, idle: Duration) -> Reclaim {
        Reclaim::Soft { capacity, idle }
    }

    #[test]
    fn test_put_and_get() {
        let cache: ConcurrentCache<&'static str, u32> = CacheMap::new(Reclaim::default());
        assert!(cache.put("a", Arc::new(1)).is_none());
        assert_eq!(cache.get(&"a").as_deref(), Some(&1));
        assert!(cache.contains_key(&"a"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_replaces_and_returns_previous() {
        let cache: LocalCache<&'static str, u32> = CacheMap::new(Reclaim::default());
        cache.put("a", Arc::new(1));
        let previous = cache.put("a", Arc::new(2));
        assert_eq!(previous.as_deref(), Some(&1));
        assert_eq!(cache.get(&"a").as_deref(), Some(&2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache: ConcurrentCache<u32, u32> = CacheMap::new(Reclaim::default());
        for i in 0..8 {
            cache.put(i, Arc::new(i * 2));
        }
        assert_eq!(cache.remove(&3).as_deref(), Some(&6));
        assert!(!cache.contains_key(&3));
        assert_eq!(cache.len(), 7);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&1).is_none());
    }

    #[test]
    fn test_weak_entry_dies_with_last_holder() {
        let cache: ConcurrentCache<&'static str, String> = CacheMap::new(Reclaim::Weak);
        let value = Arc::new(String::from("held"));
        cache.put("a", value.clone());
        assert_eq!(cache.get(&"a").as_deref().map(String::as_str), Some("held"));
        drop(value);
        assert!(cache.get(&"a").is_none());
        assert!(!cache.contains_key(&"a"));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_weak_unheld_put_is_dead_on_arrival() {
        let cache: LocalCache<u32, u32> = CacheMap::new(Reclaim::Weak);
        cache.put(1, Arc::new(1));
        assert!(cache.get(&1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_soft_keeps_held_entries() {
        let cache: ConcurrentCache<u32, u32> = CacheMap::new(soft(16, Duration::ZERO));
        let held = Arc::new(7);
        cache.put(1, held.clone());
        cache.put(2, Arc::new(8));
        std::thread::sleep(Duration::from_millis(2));
        cache.sweep();
        assert!(cache.contains_key(&1));
        assert!(!cache.contains_key(&2));
        drop(held);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_soft_keeps_recently_used_entries() {
        let cache: ConcurrentCache<u32, u32> =
            CacheMap::new(soft(16, Duration::from_secs(3600)));
        cache.put(1, Arc::new(1));
        cache.sweep();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_soft_capacity_evicts_least_recently_used() {
        let cache: LocalCache<u32, u32> = CacheMap::new(soft(2, Duration::from_secs(3600)));
        cache.put(1, Arc::new(1));
        std::thread::sleep(Duration::from_millis(1));
        cache.put(2, Arc::new(2));
        std::thread::sleep(Duration::from_millis(1));
        cache.put(3, Arc::new(3));
        std::thread::sleep(Duration::from_millis(1));
        // 1 becomes the most recent
        assert!(cache.get(&1).is_some());
        assert_eq!(cache.len(), 2);
        assert!(cache.contains_key(&1));
        assert!(!cache.contains_key(&2));
        assert!(cache.contains_key(&3));
    }

    #[test]
    fn test_soft_capacity_never_evicts_held_entries() {
        let cache: LocalCache<u32, u32> = CacheMap::new(soft(1, Duration::from_secs(3600)));
        let a = Arc::new(1);
        let b = Arc::new(2);
        cache.put(1, a.clone());
        cache.put(2, b.clone());
        assert_eq!(cache.len(), 2);
        drop(a);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key(&2));
    }

    #[test]
    fn test_phantom_evicts_after_last_pin_released() {
        let cache: ConcurrentCache<&'static str, u32> = CacheMap::new(Reclaim::Phantom);
        cache.put("a", Arc::new(5));
        // never pinned, stays
        cache.sweep();
        assert!(cache.contains_key(&"a"));

        let first = cache.pin(&"a").unwrap();
        let second = cache.pin(&"a").unwrap();
        assert_eq!(*first, 5);
        drop(first);
        assert!(cache.contains_key(&"a"));
        drop(second);
        assert!(!cache.contains_key(&"a"));
    }

    #[test]
    fn test_pin_missing_entry() {
        let cache: ConcurrentCache<u32, u32> = CacheMap::new(Reclaim::Phantom);
        assert_eq!(
            cache.pin(&1).unwrap_err(),
            ContainerErrors::NonexistentEntry
        );
    }

    #[test]
    fn test_stale_pin_does_not_evict_replacement() {
        let cache: ConcurrentCache<&'static str, u32> = CacheMap::new(Reclaim::Phantom);
        cache.put("a", Arc::new(1));
        let old_pin = cache.pin(&"a").unwrap();
        cache.put("a", Arc::new(2));
        let new_pin = cache.pin(&"a").unwrap();
        drop(old_pin);
        assert_eq!(cache.get(&"a").as_deref(), Some(&2));
        drop(new_pin);
        assert!(cache.get(&"a").is_none());
    }

    #[test]
    fn test_clear_severs_outstanding_tickets() {
        let cache: ConcurrentCache<&'static str, u32> = CacheMap::new(Reclaim::Phantom);
        cache.put("a", Arc::new(1));
        let pin = cache.pin(&"a").unwrap();
        cache.clear();
        cache.put("a", Arc::new(2));
        let fresh = cache.pin(&"a").unwrap();
        drop(pin);
        assert_eq!(cache.get(&"a").as_deref(), Some(&2));
        drop(fresh);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_get_or_insert_with_ticket_release() {
        #[derive(Debug)]
        struct Interned {
            _ticket: ReleaseTicket<String>,
            text: String,
        }

        let cache: ConcurrentCache<String, Interned> = CacheMap::new(Reclaim::Weak);
        let first = cache.get_or_insert_with("a".to_string(), |ticket| {
            Arc::new(Interned {
                _ticket: ticket,
                text: "a".to_string(),
            })
        });
        let second = cache.get_or_insert_with("a".to_string(), |_| unreachable!());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.text, "a");

        drop(first);
        drop(second);
        assert_eq!(cache.release_pending(), 1);
        // the drop notice alone is enough to purge the entry
        assert!(!cache.contains_key(&"a".to_string()));
        assert_eq!(cache.keys().len(), 0);
    }

    #[test]
    fn test_get_or_insert_with_is_atomic_across_threads() {
        let cache: ConcurrentCache<u32, u32> = CacheMap::new(Reclaim::default());
        let built = AtomicUsize::new(0);
        let barrier = std::sync::Barrier::new(8);
        let results: Vec<Arc<u32>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let cache = &cache;
                    let built = &built;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        cache.get_or_insert_with(42, |_| {
                            built.fetch_add(1, Ordering::SeqCst);
                            Arc::new(i)
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_unsized_values() {
        let cache: ConcurrentCache<u32, dyn Debug + Send + Sync> =
            CacheMap::new(Reclaim::default());
        cache.put(1, Arc::new("text"));
        cache.put(2, Arc::new(5u8));
        assert_eq!(format!("{:?}", cache.get(&1).unwrap()), "\"text\"");
        assert_eq!(format!("{:?}", cache.get(&2).unwrap()), "5");
    }
}
