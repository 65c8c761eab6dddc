use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Mutex-guarded map with atomic per-key operations and snapshot iteration.
///
/// Iteration never holds the lock: callers get a point-in-time snapshot and
/// do their I/O against that, so a slow socket write can never block lookups
/// or other writers.
pub struct SharedMap<K, V> {
    inner: RwLock<HashMap<K, Arc<V>>>,
}

impl<K, V> SharedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        SharedMap {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn load(&self, key: &K) -> Option<Arc<V>> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.read().contains_key(key)
    }

    pub fn insert(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        self.write().insert(key, value)
    }

    /// Inserts only when the key is vacant; returns whether it was inserted.
    pub fn insert_if_absent(&self, key: K, value: Arc<V>) -> bool {
        let mut map = self.write();
        if map.contains_key(&key) {
            false
        } else {
            map.insert(key, value);
            true
        }
    }

    pub fn load_and_delete(&self, key: &K) -> Option<Arc<V>> {
        self.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<V>> {
        self.read().values().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(K, Arc<V>)> {
        self.read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<K, Arc<V>>> {
        self.inner.read().expect("shared map lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<K, Arc<V>>> {
        self.inner.write().expect("shared map lock poisoned")
    }
}

impl<K, V> Default for SharedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        SharedMap::new()
    }
}

/// Milliseconds since the unix epoch, wall clock.
pub fn ms_since_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_key_operations() {
        let map: SharedMap<u32, &str> = SharedMap::new();
        assert!(map.is_empty());

        assert!(map.insert_if_absent(1, Arc::new("a")));
        assert!(!map.insert_if_absent(1, Arc::new("b")));
        assert_eq!(map.load(&1).as_deref(), Some(&"a"));

        let removed = map.load_and_delete(&1);
        assert_eq!(removed.as_deref(), Some(&"a"));
        assert!(map.load_and_delete(&1).is_none());
    }

    #[test]
    fn snapshot_is_point_in_time() {
        let map: SharedMap<u32, u32> = SharedMap::new();
        map.insert(1, Arc::new(10));
        map.insert(2, Arc::new(20));

        let snap = map.snapshot();
        map.insert(3, Arc::new(30));

        assert_eq!(snap.len(), 2);
        assert_eq!(map.len(), 3);
    }
}
