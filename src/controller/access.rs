//! BucketAccess reconciliation
//!
//! Granting resolves the bucket (from a provisioned claim or an existing
//! bucket id), asks the backend for credentials on behalf of the class's
//! account and stores them in a Secret next to the access request. Revoking
//! undoes both on a best-effort basis once the access request is gone.

use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::Context;
use crate::crd::{BucketAccess, BucketAccessStatus, BucketClass, BucketSource};
use crate::events::{actions, reasons};
use crate::key::ObjectKey;
use crate::secret;
use crate::Error;

/// Prefix of the backend account shared by all grants of one class
pub const ACCOUNT_NAME_PREFIX: &str = "account-";

/// Reconcile the BucketAccess stored under `key`
#[instrument(skip(ctx))]
pub async fn process_access(ctx: &Context, key: &str) -> Result<(), Error> {
    let key: ObjectKey = match key.parse() {
        Ok(k) => k,
        Err(e) => {
            warn!(error = %e, "dropping malformed access key");
            return Ok(());
        }
    };

    match ctx.accesses.cache.lookup(&key)? {
        Some(access) => {
            if let Some(old) = ctx.accesses.superseded(&key, &access) {
                info!(old_uid = ?old.metadata.uid, "access was re-created, revoking the previous grant");
                revoke(ctx, &key).await?;
            }
            let result = grant(ctx, &key, &access).await;
            if let Err(e) = &result {
                let reason = if e.is_retryable() {
                    reasons::ACCESS_FAILED
                } else {
                    reasons::VALIDATION_FAILED
                };
                ctx.publish(access.as_ref(), EventType::Warning, reason, actions::GRANT, e.to_string())
                    .await;
            }
            result
        }
        None => revoke(ctx, &key).await,
    }
}

/// Account name for grants made through `class`
///
/// Derived from the class UID so every grant through the same class reuses
/// one backend account, and a recreated class gets a fresh one.
fn account_name(class: &BucketClass) -> Result<String, Error> {
    class
        .metadata
        .uid
        .as_deref()
        .map(|uid| format!("{ACCOUNT_NAME_PREFIX}{uid}"))
        .ok_or_else(|| Error::internal("access", format!("BucketClass {} has no uid", class.name_any())))
}

async fn resolve_bucket(ctx: &Context, key: &ObjectKey, source: &BucketSource<'_>) -> Result<String, Error> {
    match source {
        BucketSource::Existing(bucket_id) => Ok((*bucket_id).to_string()),
        BucketSource::Claim(claim_name) => {
            let claim = ctx.kube.get_claim(key.namespace_or_default(), claim_name).await?;
            match claim.status {
                Some(status) if status.provisioned && !status.bucket_id.is_empty() => Ok(status.bucket_id),
                _ => Err(Error::internal(
                    "access",
                    format!("BucketClaim {claim_name} is not provisioned yet"),
                )),
            }
        }
    }
}

async fn grant(ctx: &Context, key: &ObjectKey, access: &BucketAccess) -> Result<(), Error> {
    let refs = access.spec.validate(&key.to_string())?;
    let class = ctx.kube.get_class(refs.class_name).await?;

    if access.is_granted() {
        debug!("access already granted");
        ctx.accesses.fallback.insert(key.clone(), access.clone());
        return Ok(());
    }

    let (backend_type, driver) = ctx.drivers.for_class(&class)?;
    let bucket_id = resolve_bucket(ctx, key, &refs.source).await?;
    let account_name = account_name(&class)?;

    let grant = driver.grant_access(&bucket_id, &account_name).await?;
    info!(bucket_id = %bucket_id, account_id = %grant.account_id, "access granted");

    let namespace = key.namespace_or_default();
    let secret_name = access.credentials_secret_name();
    let secret = secret::credentials_secret(
        access,
        &secret_name,
        &bucket_id,
        class.spec.endpoint(),
        &grant.credentials,
    );
    secret::materialize(ctx.secrets.as_ref(), namespace, secret).await?;

    let status = BucketAccessStatus {
        access_granted: true,
        account_id: grant.account_id,
        bucket_id,
        backend_type,
        credentials_secret_name: secret_name.clone(),
    };
    let updated = ctx.kube.update_access_status(access, &status).await?;
    ctx.accesses.fallback.insert(key.clone(), updated);

    ctx.publish(
        access,
        EventType::Normal,
        reasons::ACCESS_GRANTED,
        actions::GRANT,
        format!("Credentials stored in secret {secret_name}"),
    )
    .await;
    Ok(())
}

async fn revoke(ctx: &Context, key: &ObjectKey) -> Result<(), Error> {
    let Some(access) = ctx.accesses.fallback.get(key) else {
        debug!("access not in fallback store, nothing to revoke");
        return Ok(());
    };

    if let Some(status) = access.status.as_ref().filter(|s| s.access_granted) {
        revoke_grant(ctx, &access, status).await;
        delete_secret(ctx, &access, key).await;
    } else {
        debug!("access was never granted");
    }

    ctx.accesses.fallback.remove(key);
    Ok(())
}

async fn revoke_grant(ctx: &Context, access: &BucketAccess, status: &BucketAccessStatus) {
    let result = match ctx.drivers.get(&status.backend_type) {
        Some(driver) => driver.revoke_access(&status.bucket_id, &status.account_id).await,
        None => Err(Error::validation(
            access.name_any(),
            format!("no driver for backend type {:?}", status.backend_type),
        )),
    };

    match result {
        Ok(()) => {
            info!(bucket_id = %status.bucket_id, account_id = %status.account_id, "access revoked");
            ctx.publish(
                access,
                EventType::Normal,
                reasons::ACCESS_REVOKED,
                actions::DELETE,
                format!("Revoked access of {} to bucket {}", status.account_id, status.bucket_id),
            )
            .await;
        }
        Err(e) if e.is_not_found() => debug!("grant already gone"),
        Err(e) => {
            warn!(error = %e, "failed to revoke access of deleted access request");
            ctx.publish(
                access,
                EventType::Warning,
                reasons::CLEANUP_FAILED,
                actions::DELETE,
                format!("Failed to revoke access: {e}"),
            )
            .await;
        }
    }
}

async fn delete_secret(ctx: &Context, access: &BucketAccess, key: &ObjectKey) {
    let name = access.credentials_secret_name();
    if let Err(e) = secret::remove(ctx.secrets.as_ref(), key.namespace_or_default(), &name).await {
        warn!(secret = %name, error = %e, "failed to delete credentials secret");
        ctx.publish(
            access,
            EventType::Warning,
            reasons::CLEANUP_FAILED,
            actions::DELETE,
            format!("Failed to delete secret {name}: {e}"),
        )
        .await;
    }
}
