//! Registry of reference-counted handles.
//!
//! Device and peer contexts are shared between the worker that owns them
//! and callers reading link/channel state from other tasks. Instead of
//! manual get/put reference counting, the registry stores `Arc<V>` and
//! hands out clones:
//!
//! - `acquire()` returns `Option<Arc<V>>` and never creates entries
//! - `insert()` refuses to overwrite a live entry
//! - a removed entry stays alive until the last outstanding handle drops

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;

/// Error type for HandleMap operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleMapError {
    #[error("Key already registered")]
    AlreadyExists,
}

/// Internally synchronized map of `Arc` handles.
///
/// # Example
///
/// ```
/// use mlo_common::HandleMap;
///
/// let map: HandleMap<u16, String> = HandleMap::new();
/// assert!(map.acquire(&1).is_none());
///
/// map.insert(1, "mld1".to_string()).unwrap();
/// let handle = map.acquire(&1).unwrap();
/// assert_eq!(handle.as_str(), "mld1");
/// assert_eq!(map.outstanding_handles(&1), Some(1));
/// ```
#[derive(Debug)]
pub struct HandleMap<K, V> {
    inner: RwLock<HashMap<K, Arc<V>>>,
}

impl<K, V> HandleMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the number of registered entries.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Returns true if the key is registered.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.read().contains_key(key)
    }

    /// Registers a value and returns the first handle to it.
    pub fn insert(&self, key: K, value: V) -> Result<Arc<V>, HandleMapError> {
        let mut inner = self.inner.write();
        if inner.contains_key(&key) {
            return Err(HandleMapError::AlreadyExists);
        }
        let handle = Arc::new(value);
        inner.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Acquires a handle to a registered value.
    ///
    /// Returns `None` if the key is not registered.
    /// **This never creates entries.**
    pub fn acquire(&self, key: &K) -> Option<Arc<V>> {
        self.inner.read().get(key).cloned()
    }

    /// Unregisters a value.
    ///
    /// The value itself is dropped once every outstanding handle is gone.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.inner.write().remove(key)
    }

    /// Returns handles to every registered value.
    pub fn snapshot(&self) -> Vec<Arc<V>> {
        self.inner.read().values().cloned().collect()
    }

    /// Returns every registered key.
    pub fn keys(&self) -> Vec<K> {
        self.inner.read().keys().cloned().collect()
    }

    /// Returns the first value matching the predicate.
    pub fn find<F>(&self, mut pred: F) -> Option<Arc<V>>
    where
        F: FnMut(&V) -> bool,
    {
        self.inner.read().values().find(|v| pred(v)).cloned()
    }

    /// Number of handles held outside the registry for the given key.
    pub fn outstanding_handles(&self, key: &K) -> Option<usize> {
        self.inner
            .read()
            .get(key)
            .map(|v| Arc::strong_count(v).saturating_sub(1))
    }

    /// Unregisters everything.
    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

impl<K, V> Default for HandleMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_acquire_never_creates() {
        let map: HandleMap<u16, u32> = HandleMap::new();
        assert!(map.acquire(&7).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let map: HandleMap<u16, u32> = HandleMap::new();
        map.insert(1, 10).unwrap();
        assert_eq!(map.insert(1, 20), Err(HandleMapError::AlreadyExists));
        assert_eq!(*map.acquire(&1).unwrap(), 10);
    }

    #[test]
    fn test_handle_outlives_removal() {
        let map: HandleMap<u16, String> = HandleMap::new();
        map.insert(1, "peer".to_string()).unwrap();

        let handle = map.acquire(&1).unwrap();
        assert_eq!(map.outstanding_handles(&1), Some(1));

        let removed = map.remove(&1).unwrap();
        assert!(map.acquire(&1).is_none());
        assert_eq!(handle.as_str(), "peer");
        assert_eq!(Arc::strong_count(&removed), 2);
    }

    #[test]
    fn test_find_and_snapshot() {
        let map: HandleMap<u16, u32> = HandleMap::new();
        map.insert(1, 10).unwrap();
        map.insert(2, 20).unwrap();

        assert_eq!(map.find(|v| *v == 20).map(|v| *v), Some(20));
        assert!(map.find(|v| *v == 30).is_none());

        let mut values: Vec<u32> = map.snapshot().iter().map(|v| **v).collect();
        values.sort();
        assert_eq!(values, vec![10, 20]);
    }
}
