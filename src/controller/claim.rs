//! BucketClaim reconciliation
//!
//! A live claim is provisioned once: the backend bucket is created under the
//! claim's UID and the result is written to status. A claim that is gone from
//! the cache but still in the fallback store is being deleted; its bucket is
//! removed unless the class asked to retain it.

use kube::runtime::events::EventType;
use tracing::{debug, info, instrument, warn};

use super::Context;
use crate::crd::{BucketClaim, BucketClaimStatus};
use crate::events::{actions, reasons};
use crate::key::ObjectKey;
use crate::Error;

/// Reconcile the BucketClaim stored under `key`
///
/// Malformed keys are logged and dropped. Any error returned is meant for the
/// worker's retry policy.
#[instrument(skip(ctx))]
pub async fn process_claim(ctx: &Context, key: &str) -> Result<(), Error> {
    let key: ObjectKey = match key.parse() {
        Ok(k) => k,
        Err(e) => {
            warn!(error = %e, "dropping malformed claim key");
            return Ok(());
        }
    };

    match ctx.claims.cache.lookup(&key)? {
        Some(claim) => {
            if let Some(old) = ctx.claims.superseded(&key, &claim) {
                info!(old_uid = ?old.metadata.uid, "claim was re-created, tearing down the previous one");
                delete_claim(ctx, &key).await?;
            }
            let result = sync_claim(ctx, &key, &claim).await;
            if let Err(e) = &result {
                record_failure(ctx, &claim, e).await;
            }
            result
        }
        None => delete_claim(ctx, &key).await,
    }
}

async fn record_failure(ctx: &Context, claim: &BucketClaim, error: &Error) {
    let reason = if error.is_retryable() {
        reasons::PROVISIONING_FAILED
    } else {
        reasons::VALIDATION_FAILED
    };
    ctx.publish(claim, EventType::Warning, reason, actions::PROVISION, error.to_string())
        .await;
}

async fn sync_claim(ctx: &Context, key: &ObjectKey, claim: &BucketClaim) -> Result<(), Error> {
    let class_name = claim.spec.validate(&key.to_string())?;
    let class = ctx.kube.get_class(class_name).await?;

    if claim.is_provisioned() {
        debug!("claim already provisioned");
        ctx.claims.fallback.insert(key.clone(), claim.clone());
        return Ok(());
    }

    let (backend_type, driver) = ctx.drivers.for_class(&class)?;
    let uid = claim
        .metadata
        .uid
        .as_deref()
        .ok_or_else(|| Error::internal("claim", format!("{key} has no uid")))?;

    let bucket_id = driver.create_bucket(uid, &class.spec.region).await?;
    info!(bucket_id = %bucket_id, backend = %backend_type, "bucket created");

    let status = BucketClaimStatus::provisioned(&class, &bucket_id, &backend_type);
    let updated = ctx.kube.update_claim_status(claim, &status).await?;
    ctx.claims.fallback.insert(key.clone(), updated);

    ctx.publish(
        claim,
        EventType::Normal,
        reasons::BUCKET_PROVISIONED,
        actions::PROVISION,
        format!(
            "Created bucket {bucket_id} on {backend_type} with deletion policy {}",
            class.spec.deletion_policy
        ),
    )
    .await;
    Ok(())
}

async fn delete_claim(ctx: &Context, key: &ObjectKey) -> Result<(), Error> {
    let Some(claim) = ctx.claims.fallback.get(key) else {
        debug!("claim not in fallback store, nothing to tear down");
        return Ok(());
    };

    match claim.status.as_ref().filter(|s| s.provisioned) {
        None => debug!("claim was never provisioned"),
        Some(status) if status.deletion_policy.is_retain() => {
            info!(bucket_id = %status.bucket_id, policy = %status.deletion_policy, "retaining bucket of deleted claim");
            ctx.publish(
                claim.as_ref(),
                EventType::Normal,
                reasons::BUCKET_RETAINED,
                actions::DELETE,
                format!("Bucket {} kept by deletion policy {}", status.bucket_id, status.deletion_policy),
            )
            .await;
        }
        Some(status) => delete_bucket(ctx, &claim, status).await,
    }

    ctx.claims.fallback.remove(key);
    Ok(())
}

/// Best effort: the claim is gone, so there is nothing left to retry against
async fn delete_bucket(ctx: &Context, claim: &BucketClaim, status: &BucketClaimStatus) {
    let result = match ctx.drivers.get(&status.backend_type) {
        Some(driver) => driver.delete_bucket(&status.bucket_id, &status.region).await,
        None => Err(Error::validation(
            &status.bucket_id,
            format!("no driver for backend type {:?}", status.backend_type),
        )),
    };

    match result {
        Ok(()) => {
            info!(bucket_id = %status.bucket_id, "bucket deleted");
            ctx.publish(
                claim,
                EventType::Normal,
                reasons::BUCKET_DELETED,
                actions::DELETE,
                format!("Deleted bucket {}", status.bucket_id),
            )
            .await;
        }
        Err(e) if e.is_not_found() => {
            debug!(bucket_id = %status.bucket_id, "bucket already gone");
        }
        Err(e) => {
            warn!(bucket_id = %status.bucket_id, error = %e, "failed to delete bucket of deleted claim");
            ctx.publish(
                claim,
                EventType::Warning,
                reasons::CLEANUP_FAILED,
                actions::DELETE,
                format!("Failed to delete bucket {}: {e}", status.bucket_id),
            )
            .await;
        }
    }
}
