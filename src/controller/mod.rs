//! Reconcilers for BucketClaim and BucketAccess
//!
//! Each resource kind has its own queue and worker pool. A worker pulls a key,
//! runs [`process_claim`] or [`process_access`] for it, and turns the outcome
//! into a queue action. Status writes go to the API server through
//! [`KubeClient`]; the last successfully reconciled copy of each object is
//! kept in the kind's fallback store so deletes can be processed after the
//! object is gone.

mod access;
mod claim;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::events::EventType;
use kube::{Client, Resource};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::cache::ResourceStores;
use crate::crd::{BucketAccess, BucketAccessStatus, BucketClaim, BucketClaimStatus, BucketClass};
use crate::driver::DriverRegistry;
use crate::events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
use crate::secret::{KubeSecretClient, SecretClient};
use crate::Error;

pub use access::process_access;
pub use claim::process_claim;
pub use worker::{ResourceKind, Runner};

/// Field manager for status writes
pub const FIELD_MANAGER: &str = "bucket-operator";

/// API server operations the reconcilers need
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a BucketClass by name
    async fn get_class(&self, name: &str) -> Result<BucketClass, Error>;

    /// Fetch a BucketClaim
    async fn get_claim(&self, namespace: &str, name: &str) -> Result<BucketClaim, Error>;

    /// Write a claim's status, conditional on the claim's resourceVersion
    async fn update_claim_status(
        &self,
        claim: &BucketClaim,
        status: &BucketClaimStatus,
    ) -> Result<BucketClaim, Error>;

    /// Write an access request's status, conditional on its resourceVersion
    async fn update_access_status(
        &self,
        access: &BucketAccess,
        status: &BucketAccessStatus,
    ) -> Result<BucketAccess, Error>;
}

/// [`KubeClient`] backed by the API server
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn not_found<K>(kind: &str, name: &str, result: Result<K, kube::Error>) -> Result<K, Error> {
    match result {
        Ok(obj) => Ok(obj),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Err(Error::not_found(kind, name)),
        Err(e) => Err(e.into()),
    }
}

fn status_patch<S: Serialize>(resource_version: Option<&str>, status: &S) -> Result<serde_json::Value, Error> {
    let status = serde_json::to_value(status)
        .map_err(|e| Error::serialization(format!("failed to encode status: {e}")))?;
    Ok(json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    }))
}

/// Merge-patch the status subresource, carrying the resourceVersion that was
/// read so a concurrent write fails with a conflict instead of being clobbered
async fn patch_status<K, S>(api: Api<K>, obj: &K, status: &S) -> Result<K, Error>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug,
    S: Serialize,
{
    let name = obj.meta().name.clone().unwrap_or_default();
    let patch = status_patch(obj.meta().resource_version.as_deref(), status)?;
    let result = api
        .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await;
    not_found(&K::kind(&()), &name, result)
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_class(&self, name: &str) -> Result<BucketClass, Error> {
        let api: Api<BucketClass> = Api::all(self.client.clone());
        not_found("BucketClass", name, api.get(name).await)
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<BucketClaim, Error> {
        let api: Api<BucketClaim> = Api::namespaced(self.client.clone(), namespace);
        not_found("BucketClaim", name, api.get(name).await)
    }

    async fn update_claim_status(
        &self,
        claim: &BucketClaim,
        status: &BucketClaimStatus,
    ) -> Result<BucketClaim, Error> {
        let namespace = claim.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<BucketClaim> = Api::namespaced(self.client.clone(), namespace);
        patch_status(api, claim, status).await
    }

    async fn update_access_status(
        &self,
        access: &BucketAccess,
        status: &BucketAccessStatus,
    ) -> Result<BucketAccess, Error> {
        let namespace = access.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<BucketAccess> = Api::namespaced(self.client.clone(), namespace);
        patch_status(api, access, status).await
    }
}

/// Shared state for both reconcilers
///
/// Use [`ContextBuilder`] to construct instances.
pub struct Context {
    /// API server client (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Secret storage for issued credentials
    pub secrets: Arc<dyn SecretClient>,
    /// Backend drivers by backend type
    pub drivers: DriverRegistry,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Cache and fallback store of claims
    pub claims: ResourceStores<BucketClaim>,
    /// Cache and fallback store of access requests
    pub accesses: ResourceStores<BucketAccess>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context from explicit collaborators, with events dropped
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        secrets: Arc<dyn SecretClient>,
        drivers: DriverRegistry,
    ) -> Self {
        Self {
            kube,
            secrets,
            drivers,
            events: Arc::new(NoopEventPublisher),
            claims: ResourceStores::new(),
            accesses: ResourceStores::new(),
        }
    }

    /// Publish an event about `obj`
    pub(crate) async fn publish<K>(
        &self,
        obj: &K,
        type_: EventType,
        reason: &str,
        action: &str,
        note: String,
    ) where
        K: Resource<DynamicType = ()>,
    {
        let reference: ObjectReference = obj.object_ref(&());
        self.events
            .publish(&reference, type_, reason, action, Some(note))
            .await;
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    secrets: Option<Arc<dyn SecretClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    drivers: DriverRegistry,
    reporter_instance: Option<String>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            secrets: None,
            events: None,
            drivers: DriverRegistry::new(),
            reporter_instance: None,
        }
    }

    /// Set the backend drivers
    pub fn drivers(mut self, drivers: DriverRegistry) -> Self {
        self.drivers = drivers;
        self
    }

    /// Instance name reported on Events (normally the pod name)
    pub fn reporter_instance(mut self, instance: impl Into<String>) -> Self {
        self.reporter_instance = Some(instance.into());
        self
    }

    /// Override the API server client
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the secret client
    pub fn secret_client(mut self, secrets: Arc<dyn SecretClient>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let client = self.client;
        let instance = self.reporter_instance;
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(client.clone()))),
            secrets: self
                .secrets
                .unwrap_or_else(|| Arc::new(KubeSecretClient::new(client.clone()))),
            events: self.events.unwrap_or_else(|| {
                Arc::new(KubeEventPublisher::new(client.clone(), FIELD_MANAGER, instance))
            }),
            drivers: self.drivers,
            claims: ResourceStores::new(),
            accesses: ResourceStores::new(),
        }
    }
}
