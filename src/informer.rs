//! Watch notifications to cache updates and queue keys
//!
//! The [`EventRouter`] is pure routing: it applies a notification to the
//! authoritative cache and enqueues the object's key. It never reconciles.
//!
//! The [`Reflector`] adapts a `kube::runtime::watcher` stream to router
//! notifications. Initial lists and relists are buffered until complete, so
//! the cache only ever sees whole snapshots. Objects that vanished while the
//! watch was broken are reported as [`DeletedObject::FinalStateUnknown`]
//! tombstones carrying the last copy the cache held.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::watcher::{self, watcher};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, info, trace, warn};

use crate::cache::ResourceCache;
use crate::key::ObjectKey;
use crate::queue::WorkQueue;

/// Payload of a delete notification
#[derive(Clone, Debug, PartialEq)]
pub enum DeletedObject<K> {
    /// The object as it was when deleted
    Object(K),
    /// The delete was inferred after the fact; `obj` is the last known copy
    FinalStateUnknown {
        /// Key the object was stored under
        key: String,
        /// Last known state, if any was kept
        obj: Option<K>,
    },
}

/// A watch notification for one object
#[derive(Clone, Debug, PartialEq)]
pub enum Notification<K> {
    /// Object appeared
    Added(K),
    /// Object changed
    Modified(K),
    /// Object disappeared
    Deleted(DeletedObject<K>),
}

/// Applies notifications to a cache and enqueues keys
pub struct EventRouter<K> {
    kind: &'static str,
    cache: Arc<ResourceCache<K>>,
    queue: Arc<WorkQueue<String>>,
}

impl<K> Clone for EventRouter<K> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            cache: Arc::clone(&self.cache),
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<K> EventRouter<K>
where
    K: Resource + Clone + Debug,
{
    /// Route notifications for `kind` into `cache` and `queue`
    pub fn new(kind: &'static str, cache: Arc<ResourceCache<K>>, queue: Arc<WorkQueue<String>>) -> Self {
        Self { kind, cache, queue }
    }

    /// Cache this router writes to
    pub fn cache(&self) -> &Arc<ResourceCache<K>> {
        &self.cache
    }

    /// Apply one notification
    pub fn handle(&self, notification: Notification<K>) {
        match notification {
            Notification::Added(obj) | Notification::Modified(obj) => {
                let Some(key) = ObjectKey::for_object(&obj) else {
                    warn!(kind = self.kind, "ignoring object without a name");
                    return;
                };
                self.cache.store().insert(key.clone(), obj);
                self.enqueue(&key);
            }
            Notification::Deleted(deleted) => {
                let Some(key) = self.deleted_key(deleted) else {
                    return;
                };
                self.cache.store().remove(&key);
                self.enqueue(&key);
            }
        }
    }

    fn deleted_key(&self, deleted: DeletedObject<K>) -> Option<ObjectKey> {
        match deleted {
            DeletedObject::Object(obj) => ObjectKey::for_object(&obj),
            DeletedObject::FinalStateUnknown { obj: Some(obj), .. } => ObjectKey::for_object(&obj),
            DeletedObject::FinalStateUnknown { key, obj: None } => match key.parse() {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(kind = self.kind, error = %e, "dropping tombstone with malformed key");
                    None
                }
            },
        }
    }

    fn enqueue(&self, key: &ObjectKey) {
        trace!(kind = self.kind, key = %key, "enqueue");
        self.queue.add(key.to_string());
    }
}

/// Turns watcher events into router notifications
pub struct Reflector<K> {
    router: EventRouter<K>,
    /// Objects of a list in progress
    pending: Option<Vec<K>>,
}

impl<K> Reflector<K>
where
    K: Resource + Clone + Debug,
{
    /// Create a reflector feeding `router`
    pub fn new(router: EventRouter<K>) -> Self {
        Self {
            router,
            pending: None,
        }
    }

    /// Apply one watcher event
    pub fn apply(&mut self, event: watcher::Event<K>) {
        match event {
            watcher::Event::Apply(obj) => {
                let known = ObjectKey::for_object(&obj)
                    .is_some_and(|key| self.router.cache.store().contains(&key));
                if known {
                    self.router.handle(Notification::Modified(obj));
                } else {
                    self.router.handle(Notification::Added(obj));
                }
            }
            watcher::Event::Delete(obj) => {
                self.router
                    .handle(Notification::Deleted(DeletedObject::Object(obj)));
            }
            watcher::Event::Init => {
                self.pending = Some(Vec::new());
            }
            watcher::Event::InitApply(obj) => {
                self.pending.get_or_insert_with(Vec::new).push(obj);
            }
            watcher::Event::InitDone => {
                let listed = self.pending.take().unwrap_or_default();
                self.finish_list(listed);
            }
        }
    }

    fn finish_list(&mut self, listed: Vec<K>) {
        let store = self.router.cache.store();
        let listed_keys: HashSet<ObjectKey> =
            listed.iter().filter_map(ObjectKey::for_object).collect();

        for key in store.keys() {
            if listed_keys.contains(&key) {
                continue;
            }
            let last_known = store.get(&key).map(|obj| obj.as_ref().clone());
            debug!(kind = self.router.kind, key = %key, "object vanished across relist");
            self.router
                .handle(Notification::Deleted(DeletedObject::FinalStateUnknown {
                    key: key.to_string(),
                    obj: last_known,
                }));
        }

        let count = listed.len();
        for obj in listed {
            self.apply(watcher::Event::Apply(obj));
        }

        if !self.router.cache.has_synced() {
            info!(kind = self.router.kind, objects = count, "cache synced");
            self.router.cache.mark_synced();
        }
    }
}

/// Watch `api` until the stream ends, feeding `router`
pub async fn run<K>(api: Api<K>, router: EventRouter<K>)
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    let kind = router.kind;
    let mut reflector = Reflector::new(router);
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => reflector.apply(event),
            Err(e) => warn!(kind, error = %e, "watch error"),
        }
    }
    warn!(kind, "watch stream ended");
}

/// Re-enqueue every cached key each `period` until the queue shuts down
pub async fn resync<K>(cache: Arc<ResourceCache<K>>, queue: Arc<WorkQueue<String>>, period: Duration) {
    if period.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        ticker.tick().await;
        if queue.is_shutting_down() {
            return;
        }
        let keys = cache.store().keys();
        debug!(queue = queue.name(), keys = keys.len(), "periodic resync");
        for key in keys {
            queue.add(key.to_string());
        }
    }
}
