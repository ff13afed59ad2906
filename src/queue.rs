//! Deduplicating, rate-limited work queue of object keys.
//!
//! The queue is the single serialization point between watch notifications
//! and reconcile workers:
//!
//! - `add` collapses repeated notifications for a key into one pending item
//! - `get` hands a key to exactly one worker and marks it in-flight; an `add`
//!   for an in-flight key is parked and re-queued when the worker calls `done`
//! - `add_rate_limited` re-adds a key after its per-key backoff delay
//! - `forget` resets the key's backoff to the floor
//!
//! No two workers ever hold the same key at the same time, so reconcile code
//! needs no per-key locking of its own.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

use crate::retry::{ItemBackoff, RetryConfig, MAX_RETRY_INTERVAL};

#[derive(Debug)]
struct QueueState<T> {
    /// Keys waiting to be handed out, in FIFO order
    queue: VecDeque<T>,
    /// Keys that need processing (queued, or re-added while in-flight)
    dirty: HashSet<T>,
    /// Keys currently held by a worker
    processing: HashSet<T>,
    shutting_down: bool,
}

/// Work queue with per-key dedup, in-flight tracking and exponential backoff
#[derive(Debug)]
pub struct WorkQueue<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    notify: Notify,
    backoff: ItemBackoff<T>,
}

impl<T> WorkQueue<T>
where
    T: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    /// Create an empty queue using the given retry policy
    pub fn new(name: impl Into<String>, retry: RetryConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            backoff: ItemBackoff::new(retry),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue name, used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue `item` unless it is already pending
    pub fn add(&self, item: T) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            trace!(queue = %self.name, ?item, "key in flight, deferring");
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next key and mark it in-flight.
    ///
    /// Returns `None` once the queue is shut down and drained of waiters.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on so idle workers pick up the rest
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Mark `item` as no longer in-flight, re-queueing it if it was re-added
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueue `item` after `delay`
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = Arc::clone(self);
        let deadline = tokio::time::Instant::now() + delay.min(MAX_RETRY_INTERVAL);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            queue.add(item);
        });
    }

    /// Enqueue `item` after its backoff delay, and bump its failure count
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = self.backoff.next_delay(&item);
        trace!(queue = %self.name, ?item, ?delay, "requeue with backoff");
        self.add_after(item, delay);
    }

    /// Reset the backoff of `item` to the floor
    pub fn forget(&self, item: &T) {
        self.backoff.forget(item);
    }

    /// Consecutive failures recorded for `item`
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.backoff.failures(item)
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Returns true if no keys are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys; all blocked and future `get` calls return `None`
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Returns true once `shut_down` has been called
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}
