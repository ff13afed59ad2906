//! Integration tests for CRD operations
//!
//! These tests tell the story of how platform administrators and application
//! teams write bucket resources through the Kubernetes API, before any
//! controller gets involved.

use std::collections::BTreeMap;

use kube::api::{Api, PostParams};

use bucket_operator::crd::{
    BucketAccess, BucketAccessSpec, BucketClaim, BucketClaimSpec, BucketClass, BucketClassSpec,
    DeletionPolicy, BACKEND_TYPE_PARAMETER,
};

use super::helpers::{cleanup, ensure_test_cluster, TEST_NAMESPACE};

/// Story: An administrator publishes a bucket class
///
/// Expected behavior:
/// - The class is cluster-scoped
/// - Region, deletion policy and backend parameters survive the round trip
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_admin_publishes_bucket_class() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<BucketClass> = Api::all(client);
    let name = "e2e-crd-class";
    cleanup(&api, name).await;

    let class = BucketClass::new(
        name,
        BucketClassSpec {
            region: "eu-west-1".to_string(),
            deletion_policy: DeletionPolicy::Retain,
            parameters: BTreeMap::from([(BACKEND_TYPE_PARAMETER.to_string(), "fake".to_string())]),
        },
    );
    api.create(&PostParams::default(), &class)
        .await
        .expect("failed to create class");

    let fetched = api.get(name).await.expect("failed to get class");
    assert!(fetched.metadata.namespace.is_none());
    assert_eq!(fetched.spec.region, "eu-west-1");
    assert!(fetched.spec.deletion_policy.is_retain());
    assert_eq!(fetched.spec.backend_type(), Some("fake"));

    cleanup(&api, name).await;
}

/// Story: A claim without a class reference is accepted by the API server
///
/// The schema leaves the reference optional so the controller can explain
/// what is wrong through an event instead of an admission error.
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_claim_without_class_is_admitted() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<BucketClaim> = Api::namespaced(client, TEST_NAMESPACE);
    let name = "e2e-crd-no-class";
    cleanup(&api, name).await;

    let claim = BucketClaim::new(name, BucketClaimSpec::default());
    let created = api
        .create(&PostParams::default(), &claim)
        .await
        .expect("failed to create claim");

    assert!(created.spec.bucket_class_name.is_none());
    assert!(created.status.is_none());

    cleanup(&api, name).await;
}

/// Story: An access request for an existing bucket keeps its bucket id
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_access_for_existing_bucket_is_stored() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<BucketAccess> = Api::namespaced(client, TEST_NAMESPACE);
    let name = "e2e-crd-existing";
    cleanup(&api, name).await;

    let access = BucketAccess::new(
        name,
        BucketAccessSpec {
            bucket_class_name: Some("gold".to_string()),
            existing_bucket_id: Some("legacy-bucket".to_string()),
            ..Default::default()
        },
    );
    api.create(&PostParams::default(), &access)
        .await
        .expect("failed to create access");

    let fetched = api.get(name).await.expect("failed to get access");
    assert_eq!(fetched.spec.existing_bucket_id.as_deref(), Some("legacy-bucket"));
    assert!(fetched.spec.bucket_claim_name.is_none());
    assert!(!fetched.is_granted());

    cleanup(&api, name).await;
}
