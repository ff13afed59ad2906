//! Integration tests for the controller lifecycle
//!
//! These tests run the controllers in-process against a real API server and
//! follow a bucket from claim to credentials to deletion.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, PostParams};
use kube::Client;

use bucket_operator::crd::{
    BucketAccess, BucketAccessSpec, BucketClaim, BucketClaimSpec, BucketClass, BucketClassSpec,
    DeletionPolicy, BACKEND_TYPE_PARAMETER, ENDPOINT_PARAMETER,
};
use bucket_operator::secret::{ACCESS_KEY_ID_KEY, BUCKET_ID_KEY, SECRET_ACCESS_KEY_KEY};

use super::helpers::{cleanup, ensure_test_cluster, start_controller, wait_for, TEST_NAMESPACE};

const TIMEOUT: Duration = Duration::from_secs(30);

async fn create_class(client: &Client, name: &str, policy: DeletionPolicy) {
    let api: Api<BucketClass> = Api::all(client.clone());
    cleanup(&api, name).await;
    let class = BucketClass::new(
        name,
        BucketClassSpec {
            region: "r1".to_string(),
            deletion_policy: policy,
            parameters: BTreeMap::from([
                (BACKEND_TYPE_PARAMETER.to_string(), "fake".to_string()),
                (ENDPOINT_PARAMETER.to_string(), "http://fake:9000".to_string()),
            ]),
        },
    );
    api.create(&PostParams::default(), &class)
        .await
        .expect("failed to create class");
}

async fn create_claim(api: &Api<BucketClaim>, name: &str, class: &str) {
    cleanup(api, name).await;
    let claim = BucketClaim::new(
        name,
        BucketClaimSpec {
            bucket_class_name: Some(class.to_string()),
        },
    );
    api.create(&PostParams::default(), &claim)
        .await
        .expect("failed to create claim");
}

async fn provisioned_bucket(api: &Api<BucketClaim>, name: &str) -> Option<String> {
    let claim = api.get_opt(name).await.ok()??;
    let status = claim.status?;
    status.provisioned.then_some(status.bucket_id)
}

/// Story: A team claims a bucket and gets credentials for it
///
/// Expected behavior:
/// - The claim is provisioned and records the backend bucket id
/// - The access request is granted and a credentials secret appears
/// - Deleting the access removes the secret and revokes the account
/// - Deleting the claim deletes the bucket on the backend
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_team_claims_bucket_then_gets_credentials() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let controller = start_controller(client.clone());
    create_class(&client, "e2e-standard", DeletionPolicy::Delete).await;

    let claims: Api<BucketClaim> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let accesses: Api<BucketAccess> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), TEST_NAMESPACE);

    create_claim(&claims, "e2e-photos", "e2e-standard").await;
    let bucket_id = wait_for(TIMEOUT, || provisioned_bucket(&claims, "e2e-photos"))
        .await
        .expect("claim was never provisioned");
    assert!(controller.driver.has_bucket(&bucket_id));

    cleanup(&accesses, "e2e-photos-rw").await;
    let access = BucketAccess::new(
        "e2e-photos-rw",
        BucketAccessSpec {
            bucket_class_name: Some("e2e-standard".to_string()),
            bucket_claim_name: Some("e2e-photos".to_string()),
            ..Default::default()
        },
    );
    accesses
        .create(&PostParams::default(), &access)
        .await
        .expect("failed to create access");

    let granted = wait_for(TIMEOUT, || async {
        let access = accesses.get_opt("e2e-photos-rw").await.ok()??;
        access.is_granted().then_some(access)
    })
    .await
    .expect("access was never granted");
    let secret_name = granted.credentials_secret_name();

    let secret = wait_for(TIMEOUT, || async { secrets.get_opt(&secret_name).await.ok()? })
        .await
        .expect("credentials secret never appeared");
    let data = secret.data.unwrap_or_default();
    assert!(data.contains_key(ACCESS_KEY_ID_KEY));
    assert!(data.contains_key(SECRET_ACCESS_KEY_KEY));
    assert_eq!(
        data.get(BUCKET_ID_KEY).map(|b| b.0.clone()),
        Some(bucket_id.clone().into_bytes())
    );
    assert_eq!(controller.driver.grant_count(), 1);

    cleanup(&accesses, "e2e-photos-rw").await;
    let gone = wait_for(TIMEOUT, || async {
        match secrets.get_opt(&secret_name).await {
            Ok(None) => Some(()),
            _ => None,
        }
    })
    .await;
    assert!(gone.is_some(), "credentials secret was not removed");
    assert_eq!(controller.driver.grant_count(), 0);

    cleanup(&claims, "e2e-photos").await;
    let deleted = wait_for(TIMEOUT, || async {
        (!controller.driver.has_bucket(&bucket_id)).then_some(())
    })
    .await;
    assert!(deleted.is_some(), "bucket was not deleted on the backend");

    controller.stop().await;
}

/// Story: A claim on a Retain class keeps its bucket after deletion
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_retained_bucket_outlives_its_claim() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let controller = start_controller(client.clone());
    create_class(&client, "e2e-archive", DeletionPolicy::Retain).await;

    let claims: Api<BucketClaim> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    create_claim(&claims, "e2e-ledger", "e2e-archive").await;
    let bucket_id = wait_for(TIMEOUT, || provisioned_bucket(&claims, "e2e-ledger"))
        .await
        .expect("claim was never provisioned");

    cleanup(&claims, "e2e-ledger").await;
    let removed = wait_for(TIMEOUT, || async {
        claims.get_opt("e2e-ledger").await.ok()?.is_none().then_some(())
    })
    .await;
    assert!(removed.is_some());
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(controller.driver.has_bucket(&bucket_id), "retained bucket was deleted");
    controller.stop().await;
}

/// Story: Pointing a claim at a class that does not exist yet
///
/// The claim stays unprovisioned while the class is missing and is picked up
/// by the retry loop once an administrator creates the class.
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_claim_waits_for_its_class() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let controller = start_controller(client.clone());
    let classes: Api<BucketClass> = Api::all(client.clone());
    cleanup(&classes, "e2e-late").await;

    let claims: Api<BucketClaim> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    create_claim(&claims, "e2e-early", "e2e-late").await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(provisioned_bucket(&claims, "e2e-early").await.is_none());

    create_class(&client, "e2e-late", DeletionPolicy::Delete).await;
    let provisioned = wait_for(TIMEOUT, || provisioned_bucket(&claims, "e2e-early")).await;
    assert!(provisioned.is_some(), "claim was not provisioned after its class appeared");

    cleanup(&claims, "e2e-early").await;
    cleanup(&classes, "e2e-late").await;
    controller.stop().await;
}
