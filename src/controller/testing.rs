//! In-memory collaborators for reconciler tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::EventType;
use kube::ResourceExt;

use super::{Context, KubeClient};
use crate::crd::{
    BucketAccess, BucketAccessSpec, BucketAccessStatus, BucketClaim, BucketClaimSpec,
    BucketClaimStatus, BucketClass, BucketClassSpec, DeletionPolicy, BACKEND_TYPE_PARAMETER,
    ENDPOINT_PARAMETER,
};
use crate::driver::{AccessGrant, BucketDriver, DriverRegistry, FakeDriver};
use crate::events::EventPublisher;
use crate::key::ObjectKey;
use crate::secret::SecretClient;
use crate::Error;

/// API server stand-in that stores objects by key
#[derive(Default)]
pub struct FakeKube {
    pub classes: Mutex<HashMap<String, BucketClass>>,
    pub claims: Mutex<HashMap<ObjectKey, BucketClaim>>,
    pub accesses: Mutex<HashMap<ObjectKey, BucketAccess>>,
    pub status_writes: AtomicUsize,
}

fn bump_version(meta: &mut ObjectMeta) {
    let next = meta
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    meta.resource_version = Some(next.to_string());
}

fn key_of<K: kube::Resource>(obj: &K) -> ObjectKey {
    ObjectKey::for_object(obj).expect("test objects are named")
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn get_class(&self, name: &str) -> Result<BucketClass, Error> {
        self.classes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("BucketClass", name))
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<BucketClaim, Error> {
        self.claims
            .lock()
            .unwrap()
            .get(&ObjectKey::namespaced(namespace, name))
            .cloned()
            .ok_or_else(|| Error::not_found("BucketClaim", name))
    }

    async fn update_claim_status(
        &self,
        claim: &BucketClaim,
        status: &BucketClaimStatus,
    ) -> Result<BucketClaim, Error> {
        let mut claims = self.claims.lock().unwrap();
        let stored = claims
            .get_mut(&key_of(claim))
            .ok_or_else(|| Error::not_found("BucketClaim", claim.name_any()))?;
        if stored.metadata.resource_version != claim.metadata.resource_version {
            return Err(Error::internal("fake-kube", "conflict"));
        }
        stored.status = Some(status.clone());
        bump_version(&mut stored.metadata);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    async fn update_access_status(
        &self,
        access: &BucketAccess,
        status: &BucketAccessStatus,
    ) -> Result<BucketAccess, Error> {
        let mut accesses = self.accesses.lock().unwrap();
        let stored = accesses
            .get_mut(&key_of(access))
            .ok_or_else(|| Error::not_found("BucketAccess", access.name_any()))?;
        if stored.metadata.resource_version != access.metadata.resource_version {
            return Err(Error::internal("fake-kube", "conflict"));
        }
        stored.status = Some(status.clone());
        bump_version(&mut stored.metadata);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }
}

/// Secret store stand-in
#[derive(Default)]
pub struct FakeSecrets {
    pub secrets: Mutex<HashMap<ObjectKey, Secret>>,
}

impl FakeSecrets {
    pub fn get_data(&self, namespace: &str, name: &str) -> Option<std::collections::BTreeMap<String, String>> {
        self.secrets
            .lock()
            .unwrap()
            .get(&ObjectKey::namespaced(namespace, name))
            .and_then(|s| s.string_data.clone())
    }
}

#[async_trait]
impl SecretClient for FakeSecrets {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .get(&ObjectKey::namespaced(namespace, name))
            .cloned())
    }

    async fn create(&self, namespace: &str, secret: Secret) -> Result<(), Error> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.secrets
            .lock()
            .unwrap()
            .entry(ObjectKey::namespaced(namespace, name))
            .or_insert(secret);
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.secrets
            .lock()
            .unwrap()
            .remove(&ObjectKey::namespaced(namespace, name))
            .map(|_| ())
            .ok_or_else(|| Error::not_found("Secret", name))
    }
}

/// Driver that records calls and can be told to fail
#[derive(Default)]
pub struct CountingDriver {
    pub inner: FakeDriver,
    pub creates: AtomicUsize,
    pub deletes: Mutex<Vec<String>>,
    pub grants: AtomicUsize,
    pub revokes: AtomicUsize,
    pub fail: AtomicBool,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// Simulated latency of every call
    pub latency: Mutex<Option<Duration>>,
}

impl CountingDriver {
    async fn enter(&self) -> Result<(), Error> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::driver("fake", "backend unavailable"));
        }
        Ok(())
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl BucketDriver for CountingDriver {
    async fn create_bucket(&self, name: &str, region: &str) -> Result<String, Error> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        self.inner.create_bucket(name, region).await
    }

    async fn delete_bucket(&self, bucket_id: &str, region: &str) -> Result<(), Error> {
        self.deletes.lock().unwrap().push(bucket_id.to_string());
        self.enter().await?;
        self.inner.delete_bucket(bucket_id, region).await
    }

    async fn grant_access(&self, bucket_id: &str, account_name: &str) -> Result<AccessGrant, Error> {
        self.grants.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        self.inner.grant_access(bucket_id, account_name).await
    }

    async fn revoke_access(&self, bucket_id: &str, account_id: &str) -> Result<(), Error> {
        self.revokes.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        self.inner.revoke_access(bucket_id, account_id).await
    }
}

/// Publisher that keeps (type, reason) pairs
#[derive(Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<(EventType, String, Option<String>)>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r, _)| r.clone())
            .collect()
    }

    /// Note of the first event with `reason`
    pub fn note(&self, reason: &str) -> Option<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|(_, r, _)| r == reason)
            .and_then(|(_, _, note)| note.clone())
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push((type_, reason.to_string(), note));
    }
}

/// Wired-up context plus handles on every fake
pub struct Harness {
    pub ctx: Arc<Context>,
    pub kube: Arc<FakeKube>,
    pub secrets: Arc<FakeSecrets>,
    pub driver: Arc<CountingDriver>,
    pub events: Arc<RecordingEvents>,
}

impl Harness {
    pub fn new() -> Self {
        let kube = Arc::new(FakeKube::default());
        let secrets = Arc::new(FakeSecrets::default());
        let driver = Arc::new(CountingDriver::default());
        let events = Arc::new(RecordingEvents::default());
        let drivers = DriverRegistry::new().with("fake", driver.clone());
        let mut ctx = Context::for_testing(kube.clone(), secrets.clone(), drivers);
        ctx.events = events.clone();
        ctx.claims.cache.mark_synced();
        ctx.accesses.cache.mark_synced();
        Self {
            ctx: Arc::new(ctx),
            kube,
            secrets,
            driver,
            events,
        }
    }

    pub fn add_class(&self, name: &str, policy: DeletionPolicy) {
        let mut class = BucketClass::new(
            name,
            BucketClassSpec {
                region: "r1".to_string(),
                deletion_policy: policy,
                parameters: [
                    (BACKEND_TYPE_PARAMETER.to_string(), "fake".to_string()),
                    (ENDPOINT_PARAMETER.to_string(), "http://fake:9000".to_string()),
                ]
                .into_iter()
                .collect(),
            },
        );
        class.metadata.uid = Some(format!("class-uid-{name}"));
        self.kube
            .classes
            .lock()
            .unwrap()
            .insert(name.to_string(), class);
    }

    /// Create a claim in the API server and the watch cache
    pub fn create_claim(&self, namespace: &str, name: &str, class: Option<&str>) -> String {
        self.create_claim_with_uid(namespace, name, class, &format!("uid-{namespace}-{name}"))
    }

    /// Create a claim with an explicit UID, as after a delete and re-create
    pub fn create_claim_with_uid(
        &self,
        namespace: &str,
        name: &str,
        class: Option<&str>,
        uid: &str,
    ) -> String {
        let mut claim = BucketClaim::new(
            name,
            BucketClaimSpec {
                bucket_class_name: class.map(String::from),
            },
        );
        claim.metadata.namespace = Some(namespace.to_string());
        claim.metadata.uid = Some(uid.to_string());
        claim.metadata.resource_version = Some("1".to_string());
        let key = key_of(&claim);
        self.kube.claims.lock().unwrap().insert(key.clone(), claim.clone());
        self.ctx.claims.cache.store().insert(key.clone(), claim);
        key.to_string()
    }

    /// Copy the API server's claim into the watch cache
    pub fn sync_claim_cache(&self, key: &str) {
        let key: ObjectKey = key.parse().unwrap();
        let claim = self.kube.claims.lock().unwrap().get(&key).cloned().unwrap();
        self.ctx.claims.cache.store().insert(key, claim);
    }

    /// Remove a claim from the API server and the watch cache
    pub fn delete_claim(&self, key: &str) {
        let key: ObjectKey = key.parse().unwrap();
        self.kube.claims.lock().unwrap().remove(&key);
        self.ctx.claims.cache.store().remove(&key);
    }

    pub fn claim(&self, key: &str) -> BucketClaim {
        let key: ObjectKey = key.parse().unwrap();
        self.kube.claims.lock().unwrap().get(&key).cloned().unwrap()
    }

    pub fn create_access(&self, namespace: &str, name: &str, spec: BucketAccessSpec) -> String {
        self.create_access_with_uid(namespace, name, spec, &format!("uid-{namespace}-{name}"))
    }

    pub fn create_access_with_uid(
        &self,
        namespace: &str,
        name: &str,
        spec: BucketAccessSpec,
        uid: &str,
    ) -> String {
        let mut access = BucketAccess::new(name, spec);
        access.metadata.namespace = Some(namespace.to_string());
        access.metadata.uid = Some(uid.to_string());
        access.metadata.resource_version = Some("1".to_string());
        let key = key_of(&access);
        self.kube
            .accesses
            .lock()
            .unwrap()
            .insert(key.clone(), access.clone());
        self.ctx.accesses.cache.store().insert(key.clone(), access);
        key.to_string()
    }

    pub fn sync_access_cache(&self, key: &str) {
        let key: ObjectKey = key.parse().unwrap();
        let access = self.kube.accesses.lock().unwrap().get(&key).cloned().unwrap();
        self.ctx.accesses.cache.store().insert(key, access);
    }

    pub fn delete_access(&self, key: &str) {
        let key: ObjectKey = key.parse().unwrap();
        self.kube.accesses.lock().unwrap().remove(&key);
        self.ctx.accesses.cache.store().remove(&key);
    }

    pub fn access(&self, key: &str) -> BucketAccess {
        let key: ObjectKey = key.parse().unwrap();
        self.kube.accesses.lock().unwrap().get(&key).cloned().unwrap()
    }
}
