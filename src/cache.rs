//! In-memory object stores backing the reconcilers.
//!
//! Two stores exist per watched kind:
//!
//! - the [`ResourceCache`], an eventually-consistent mirror of the API server
//!   written only by the informer as watch events arrive
//! - the fallback [`Store`], written only by the reconciler after each
//!   successful sync, and read when an object has already vanished from the
//!   cache so its deletion can still be processed
//!
//! An object present in the fallback store but absent from the cache is being
//! deleted; the reconciler removes it from the fallback store once teardown
//! is done.

use std::sync::Arc;

use dashmap::DashMap;
use kube::Resource;
use tokio::sync::watch;

use crate::key::ObjectKey;
use crate::Error;

/// Concurrent map of objects by key
#[derive(Debug)]
pub struct Store<K> {
    objects: DashMap<ObjectKey, Arc<K>>,
}

impl<K> Default for Store<K> {
    fn default() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }
}

impl<K> Store<K> {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an object
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.objects.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Insert or replace an object, returning the previous copy
    pub fn insert(&self, key: ObjectKey, obj: K) -> Option<Arc<K>> {
        self.objects.insert(key, Arc::new(obj))
    }

    /// Remove an object, returning the removed copy
    pub fn remove(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.objects.remove(key).map(|(_, obj)| obj)
    }

    /// Returns true if the key is present
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    /// Snapshot of all keys
    pub fn keys(&self) -> Vec<ObjectKey> {
        self.objects.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the store holds nothing
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Authoritative mirror of the API server for one resource kind
#[derive(Debug)]
pub struct ResourceCache<K> {
    store: Store<K>,
    synced: watch::Sender<bool>,
}

impl<K> Default for ResourceCache<K> {
    fn default() -> Self {
        Self {
            store: Store::new(),
            synced: watch::Sender::new(false),
        }
    }
}

impl<K> ResourceCache<K> {
    /// Create an empty, unsynced cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an object.
    ///
    /// `Ok(None)` is authoritative only once the cache has synced; before
    /// that a miss could just mean the initial list has not arrived, so it is
    /// reported as a retryable error instead.
    pub fn lookup(&self, key: &ObjectKey) -> Result<Option<Arc<K>>, Error> {
        match self.store.get(key) {
            Some(obj) => Ok(Some(obj)),
            None if self.has_synced() => Ok(None),
            None => Err(Error::internal(
                "cache",
                format!("cache not synced, cannot resolve {key}"),
            )),
        }
    }

    /// Underlying store (written by the informer)
    pub fn store(&self) -> &Store<K> {
        &self.store
    }

    /// Returns true once the first full list has been applied
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Mark the cache as holding a complete list
    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    /// Wait until the first full list has been applied
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives as long as `self`, so this only ends once synced
        let _ = rx.wait_for(|synced| *synced).await;
    }
}

/// The cache and fallback store for one resource kind
#[derive(Debug)]
pub struct ResourceStores<K> {
    /// Authoritative cache fed by watch events
    pub cache: Arc<ResourceCache<K>>,
    /// Last successfully reconciled copy of each object
    pub fallback: Arc<Store<K>>,
}

impl<K> Default for ResourceStores<K> {
    fn default() -> Self {
        Self {
            cache: Arc::new(ResourceCache::new()),
            fallback: Arc::new(Store::new()),
        }
    }
}

impl<K> Clone for ResourceStores<K> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            fallback: Arc::clone(&self.fallback),
        }
    }
}

impl<K> ResourceStores<K> {
    /// Create empty stores
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K: Resource> ResourceStores<K> {
    /// Fallback entry for `key` if it belongs to an earlier object than `live`
    ///
    /// An object deleted and re-created under the same name between two
    /// reconciles is only visible as a UID change; the old one still needs
    /// its teardown.
    pub fn superseded(&self, key: &ObjectKey, live: &K) -> Option<Arc<K>> {
        self.fallback
            .get(key)
            .filter(|old| old.meta().uid.is_some() && old.meta().uid != live.meta().uid)
    }
}
