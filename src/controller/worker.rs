//! Worker pools draining the per-kind queues
//!
//! Every reconcile attempt runs inside a span carrying the kind, the key and
//! a fresh correlation id, so all log lines of one attempt can be grouped.
//! The worker is the only place an outcome becomes a queue action:
//!
//! | outcome           | action                               |
//! |-------------------|--------------------------------------|
//! | success           | forget (reset backoff)               |
//! | validation error  | forget; waits for a spec change      |
//! | any other error   | requeue with backoff                 |

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{process_access, process_claim, Context};
use crate::config::ControllerConfig;
use crate::crd::{BucketAccess, BucketClaim};
use crate::informer::{self, EventRouter};
use crate::queue::WorkQueue;
use crate::Error;

/// Resource kinds with a reconciler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    /// BucketClaim
    Claim,
    /// BucketAccess
    Access,
}

impl ResourceKind {
    /// Kind name used in logs and queue names
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claim => "BucketClaim",
            Self::Access => "BucketAccess",
        }
    }

    async fn process(self, ctx: &Context, key: &str) -> Result<(), Error> {
        match self {
            Self::Claim => process_claim(ctx, key).await,
            Self::Access => process_access(ctx, key).await,
        }
    }

    fn has_synced(self, ctx: &Context) -> bool {
        match self {
            Self::Claim => ctx.claims.cache.has_synced(),
            Self::Access => ctx.accesses.cache.has_synced(),
        }
    }

    async fn wait_synced(self, ctx: &Context) {
        match self {
            Self::Claim => ctx.claims.cache.wait_synced().await,
            Self::Access => ctx.accesses.cache.wait_synced().await,
        }
    }
}

/// Take one key off `queue` and reconcile it
///
/// Returns false once the queue has shut down.
pub async fn process_next(ctx: &Context, kind: ResourceKind, queue: &Arc<WorkQueue<String>>) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };

    let span = info_span!(
        "reconcile",
        kind = kind.as_str(),
        key = %key,
        correlation_id = %Uuid::new_v4(),
    );
    async {
        match kind.process(ctx, &key).await {
            Ok(()) => {
                debug!("reconciled");
                queue.forget(&key);
            }
            Err(e) if !e.is_retryable() => {
                warn!(error = %e, "invalid resource, not retrying until it changes");
                queue.forget(&key);
            }
            Err(e) => {
                warn!(error = %e, requeues = queue.num_requeues(&key), "reconcile failed, requeueing with backoff");
                queue.add_rate_limited(key.clone());
            }
        }
    }
    .instrument(span)
    .await;

    queue.done(&key);
    true
}

async fn worker(ctx: Arc<Context>, kind: ResourceKind, queue: Arc<WorkQueue<String>>, id: usize) {
    debug!(kind = kind.as_str(), worker = id, "worker started");
    while process_next(&ctx, kind, &queue).await {}
    debug!(kind = kind.as_str(), worker = id, "worker stopped");
}

/// Owns the queues and worker pools of both reconcilers
pub struct Runner {
    ctx: Arc<Context>,
    config: ControllerConfig,
    claims: Arc<WorkQueue<String>>,
    accesses: Arc<WorkQueue<String>>,
}

impl Runner {
    /// Create a runner; nothing starts until [`run`](Self::run)
    pub fn new(ctx: Arc<Context>, config: ControllerConfig) -> Self {
        let claims = WorkQueue::new(ResourceKind::Claim.as_str(), config.retry.clone());
        let accesses = WorkQueue::new(ResourceKind::Access.as_str(), config.retry.clone());
        Self {
            ctx,
            config,
            claims,
            accesses,
        }
    }

    /// Router feeding claim notifications into the claim cache and queue
    pub fn claim_router(&self) -> EventRouter<BucketClaim> {
        EventRouter::new(
            ResourceKind::Claim.as_str(),
            Arc::clone(&self.ctx.claims.cache),
            Arc::clone(&self.claims),
        )
    }

    /// Router feeding access notifications into the access cache and queue
    pub fn access_router(&self) -> EventRouter<BucketAccess> {
        EventRouter::new(
            ResourceKind::Access.as_str(),
            Arc::clone(&self.ctx.accesses.cache),
            Arc::clone(&self.accesses),
        )
    }

    fn queue(&self, kind: ResourceKind) -> &Arc<WorkQueue<String>> {
        match kind {
            ResourceKind::Claim => &self.claims,
            ResourceKind::Access => &self.accesses,
        }
    }

    /// Run workers and resync until `shutdown` resolves
    ///
    /// Workers of a kind start once that kind's cache has synced. On shutdown
    /// the queues stop handing out keys and every worker finishes its current
    /// key before this returns.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let mut pools = JoinSet::new();
        let mut pending_sync = Vec::new();
        for kind in [ResourceKind::Claim, ResourceKind::Access] {
            let queue = Arc::clone(self.queue(kind));
            let ctx = Arc::clone(&self.ctx);
            let workers = self.config.workers;
            let handle = pools.spawn(async move {
                kind.wait_synced(&ctx).await;
                info!(kind = kind.as_str(), workers, "cache synced, starting workers");
                let mut pool = JoinSet::new();
                for id in 0..workers {
                    pool.spawn(worker(Arc::clone(&ctx), kind, Arc::clone(&queue), id));
                }
                while let Some(result) = pool.join_next().await {
                    if let Err(e) = result {
                        error!(kind = kind.as_str(), error = %e, "worker task failed");
                    }
                }
            });
            pending_sync.push((kind, handle));
        }

        let mut resync = JoinSet::new();
        resync.spawn(informer::resync(
            Arc::clone(&self.ctx.claims.cache),
            Arc::clone(&self.claims),
            self.config.resync_period,
        ));
        resync.spawn(informer::resync(
            Arc::clone(&self.ctx.accesses.cache),
            Arc::clone(&self.accesses),
            self.config.resync_period,
        ));

        shutdown.await;
        info!("shutting down controllers");
        self.claims.shut_down();
        self.accesses.shut_down();
        resync.abort_all();

        // A pool still waiting for its cache holds no keys
        for (kind, handle) in pending_sync {
            if !kind.has_synced(&self.ctx) {
                debug!(kind = kind.as_str(), "cache never synced");
                handle.abort();
            }
        }
        while pools.join_next().await.is_some() {}
        info!("controllers stopped");
    }
}
