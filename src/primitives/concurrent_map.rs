#![forbid(unsafe_code)]
//! Sharded concurrent map with short-lived pinning accessors.
//!
//! Callers never touch the map directly: `access` yields an accessor through
//! which lookup, insert-if-absent, removal and snapshot iteration run. Values
//! are cloned out of the shards (shared ownership is expected, e.g.
//! `Arc<CachedPlan>`), so an entry obtained through a live accessor stays
//! usable after a concurrent `remove`. An epoch-reclamation scheme would give
//! the same guarantee without the clone; at current value sizes the clone is
//! an `Arc` bump.

use std::hash::{Hash, Hasher};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};

const SHARD_COUNT: usize = 16;

pub struct ConcurrentMap<K, V> {
    shards: Box<[RwLock<FxHashMap<K, V>>]>,
}

impl<K, V> Default for ConcurrentMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| RwLock::new(FxHashMap::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards }
    }

    /// Opens a short-lived accessor. Accessors pin nothing globally, so
    /// holding one across blocking work is cheap but pointless; scope them to
    /// a single lookup/update burst.
    pub fn access(&self) -> Accessor<'_, K, V> {
        Accessor { map: self }
    }

    fn shard(&self, key: &K) -> &RwLock<FxHashMap<K, V>> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }
}

pub struct Accessor<'a, K, V> {
    map: &'a ConcurrentMap<K, V>,
}

impl<K, V> Accessor<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn find(&self, key: &K) -> Option<V> {
        self.map.shard(key).read().get(key).cloned()
    }

    /// Insert-if-absent. Returns the winning value and whether this call
    /// inserted it; a racing insert keeps the first writer's value.
    pub fn insert(&self, key: K, value: V) -> (V, bool) {
        let shard = self.map.shard(&key);
        let mut guard = shard.write();
        match guard.get(&key) {
            Some(existing) => (existing.clone(), false),
            None => {
                guard.insert(key, value.clone());
                (value, true)
            }
        }
    }

    /// Removes the entry. Returns whether a mapping existed.
    pub fn remove(&self, key: &K) -> bool {
        self.map.shard(key).write().remove(key).is_some()
    }

    /// Snapshot of the entries at the time of the call, shard by shard.
    /// Entries inserted concurrently may or may not appear; removal while
    /// iterating the snapshot is permitted.
    pub fn iter(&self) -> impl Iterator<Item = (K, V)> {
        let mut entries = Vec::new();
        for shard in self.map.shards.iter() {
            let guard = shard.read();
            entries.extend(guard.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::ConcurrentMap;

    #[test]
    fn insert_is_first_writer_wins() {
        let map = ConcurrentMap::new();
        let accessor = map.access();
        let (value, inserted) = accessor.insert(1u64, "a");
        assert!(inserted);
        assert_eq!(value, "a");
        let (value, inserted) = accessor.insert(1u64, "b");
        assert!(!inserted);
        assert_eq!(value, "a");
    }

    #[test]
    fn find_after_remove() {
        let map = ConcurrentMap::new();
        let accessor = map.access();
        accessor.insert(7u64, "x");
        assert!(accessor.remove(&7));
        assert!(!accessor.remove(&7));
        assert!(accessor.find(&7).is_none());
    }

    #[test]
    fn entry_survives_concurrent_remove() {
        let map = ConcurrentMap::new();
        let accessor = map.access();
        accessor.insert(3u64, Arc::new(vec![1, 2, 3]));
        let pinned = accessor.find(&3).unwrap();
        accessor.remove(&3);
        assert_eq!(*pinned, vec![1, 2, 3]);
    }

    #[test]
    fn iteration_allows_removal() {
        let map = ConcurrentMap::new();
        let accessor = map.access();
        for key in 0u64..100 {
            accessor.insert(key, key * 2);
        }
        for (key, _) in accessor.iter() {
            accessor.remove(&key);
        }
        assert_eq!(map.access().iter().count(), 0);
    }

    #[test]
    fn concurrent_inserts_land() {
        let map = Arc::new(ConcurrentMap::new());
        let mut handles = Vec::new();
        for t in 0u64..8 {
            let map = Arc::clone(&map);
            handles.push(thread::spawn(move || {
                let accessor = map.access();
                for i in 0..250 {
                    accessor.insert(t * 1000 + i, t);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(map.access().iter().count(), 8 * 250);
    }
}
