use dashmap::DashMap;
use dashmap::mapref::entry::Entry as DashEntry;
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::hash_map::Entry as HashEntry;
use std::hash::Hash;

/// Map discipline backing a [`crate::cache_map::CacheMap`]
///
/// All methods take `&self`, so each implementation brings its own interior mutability.
/// Closures handed to a backing run while the entry is locked and must not call back into
/// the same map.
pub trait Backing<K, E> {
    fn new() -> Self;

    /// Insert an entry, returning the one it replaced
    fn insert(&self, key: K, entry: E) -> Option<E>;

    fn remove(&self, key: &K) -> Option<E>;

    /// Remove the entry only if `predicate` accepts it
    fn remove_if<F: FnOnce(&E) -> bool>(&self, key: &K, predicate: F) -> Option<E>;

    /// Pass the entry for `key` to `func`
    fn with<R, F: FnOnce(&E) -> R>(&self, key: &K, func: F) -> Option<R>;

    /// Keep the current entry when `keep` yields a value, otherwise store the entry built by
    /// `make`. The decision and the store happen under the same lock.
    fn upsert<R, Keep, Make>(&self, key: K, keep: Keep, make: Make) -> R
    where
        Keep: FnOnce(&E) -> Option<R>,
        Make: FnOnce() -> (E, R);

    fn contains_key(&self, key: &K) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Filters with a predicate function
    fn retain<F: FnMut(&K, &E) -> bool>(&self, predicate: F);

    fn clear(&self);

    fn keys(&self) -> Vec<K>;
}

/// Single threaded backing, a [`HashMap`] behind a [`RefCell`]
#[derive(Debug)]
pub struct LocalMap<K, E> {
    map: RefCell<HashMap<K, E>>,
}

impl<K: Eq + Hash, E> Default for LocalMap<K, E> {
    fn default() -> Self {
        Self {
            map: RefCell::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, E> Backing<K, E> for LocalMap<K, E> {
    fn new() -> Self {
        Self::default()
    }

    fn insert(&self, key: K, entry: E) -> Option<E> {
        self.map.borrow_mut().insert(key, entry)
    }

    fn remove(&self, key: &K) -> Option<E> {
        self.map.borrow_mut().remove(key)
    }

    fn remove_if<F: FnOnce(&E) -> bool>(&self, key: &K, predicate: F) -> Option<E> {
        let mut map = self.map.borrow_mut();
        if map.get(key).is_some_and(predicate) {
            map.remove(key)
        } else {
            None
        }
    }

    fn with<R, F: FnOnce(&E) -> R>(&self, key: &K, func: F) -> Option<R> {
        self.map.borrow().get(key).map(func)
    }

    fn upsert<R, Keep, Make>(&self, key: K, keep: Keep, make: Make) -> R
    where
        Keep: FnOnce(&E) -> Option<R>,
        Make: FnOnce() -> (E, R),
    {
        match self.map.borrow_mut().entry(key) {
            HashEntry::Occupied(mut occupied) => {
                if let Some(found) = keep(occupied.get()) {
                    return found;
                }
                let (entry, out) = make();
                occupied.insert(entry);
                out
            }
            HashEntry::Vacant(vacant) => {
                let (entry, out) = make();
                vacant.insert(entry);
                out
            }
        }
    }

    fn contains_key(&self, key: &K) -> bool {
        self.map.borrow().contains_key(key)
    }

    fn len(&self) -> usize {
        self.map.borrow().len()
    }

    fn retain<F: FnMut(&K, &E) -> bool>(&self, mut predicate: F) {
        self.map
            .borrow_mut()
            .retain(|key, entry| predicate(key, entry));
    }

    fn clear(&self) {
        // dropped outside the borrow so entry destructors may touch the map again
        let drained = std::mem::take(&mut *self.map.borrow_mut());
        drop(drained);
    }

    fn keys(&self) -> Vec<K> {
        self.map.borrow().keys().cloned().collect()
    }
}

impl<K: Eq + Hash + Clone, E> Backing<K, E> for DashMap<K, E> {
    fn new() -> Self {
        DashMap::new()
    }

    fn insert(&self, key: K, entry: E) -> Option<E> {
        DashMap::insert(self, key, entry)
    }

    fn remove(&self, key: &K) -> Option<E> {
        DashMap::remove(self, key).map(|(_key, entry)| entry)
    }

    fn remove_if<F: FnOnce(&E) -> bool>(&self, key: &K, predicate: F) -> Option<E> {
        DashMap::remove_if(self, key, |_key, entry| predicate(entry)).map(|(_key, entry)| entry)
    }

    fn with<R, F: FnOnce(&E) -> R>(&self, key: &K, func: F) -> Option<R> {
        DashMap::get(self, key).map(|entry| func(entry.value()))
    }

    fn upsert<R, Keep, Make>(&self, key: K, keep: Keep, make: Make) -> R
    where
        Keep: FnOnce(&E) -> Option<R>,
        Make: FnOnce() -> (E, R),
    {
        match DashMap::entry(self, key) {
            DashEntry::Occupied(mut occupied) => {
                if let Some(found) = keep(occupied.get()) {
                    return found;
                }
                let (entry, out) = make();
                occupied.insert(entry);
                out
            }
            DashEntry::Vacant(vacant) => {
                let (entry, out) = make();
                vacant.insert(entry);
                out
            }
        }
    }

    fn contains_key(&self, key: &K) -> bool {
        DashMap::contains_key(self, key)
    }

    fn len(&self) -> usize {
        DashMap::len(self)
    }

    fn retain<F: FnMut(&K, &E) -> bool>(&self, mut predicate: F) {
        DashMap::retain(self, |key, entry| predicate(key, entry));
    }

    fn clear(&self) {
        DashMap::clear(self);
    }

    fn keys(&self) -> Vec<K> {
        self.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise<M: Backing<&'static str, u32>>() {
        let map = M::new();
        assert!(map.is_empty());
        assert_eq!(map.insert("a", 1), None);
        assert_eq!(map.insert("a", 2), Some(1));
        assert_eq!(map.with(&"a", |v| *v * 10), Some(20));

        // kept
        let kept = map.upsert("a", |v| Some(*v), || (99, 99));
        assert_eq!(kept, 2);
        // replaced
        let replaced = map.upsert("a", |_| None, || (3, 3));
        assert_eq!(replaced, 3);
        assert_eq!(map.with(&"a", |v| *v), Some(3));

        assert_eq!(map.remove_if(&"a", |v| *v == 4), None);
        assert_eq!(map.remove_if(&"a", |v| *v == 3), Some(3));
        assert!(!map.contains_key(&"a"));

        map.insert("b", 1);
        map.insert("c", 2);
        map.retain(|_, v| *v > 1);
        assert_eq!(map.keys(), vec!["c"]);
        map.clear();
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_local_map() {
        exercise::<LocalMap<&'static str, u32>>();
    }

    #[test]
    fn test_dash_map() {
        exercise::<DashMap<&'static str, u32>>();
    }
}
