//! Credential secrets for granted bucket access
//!
//! Each granted BucketAccess owns one Secret in its namespace holding the
//! issued key pair. The secret is created once and never rewritten: a second
//! grant for the same access finds it present and leaves it alone.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Resource};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::crd::BucketAccess;
use crate::driver::Credentials;
use crate::Error;

/// Secret key holding the access key id
pub const ACCESS_KEY_ID_KEY: &str = "accessKeyID";
/// Secret key holding the secret access key
pub const SECRET_ACCESS_KEY_KEY: &str = "secretAccessKey";
/// Secret key holding the bucket id
pub const BUCKET_ID_KEY: &str = "bucketID";
/// Secret key holding the backend endpoint, when known
pub const ENDPOINT_KEY: &str = "endpoint";

/// Label marking secrets managed by the operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "bucket-operator";

/// Secret storage used by the access reconciler
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Fetch a secret, `None` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a secret; an existing secret of the same name is left untouched
    async fn create(&self, namespace: &str, secret: Secret) -> Result<(), Error>;

    /// Delete a secret, [`Error::NotFound`] if it does not exist
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// [`SecretClient`] backed by the API server
pub struct KubeSecretClient {
    client: Client,
}

impl KubeSecretClient {
    /// Create a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretClient for KubeSecretClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create(&self, namespace: &str, secret: Secret) -> Result<(), Error> {
        match self.api(namespace).create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(namespace, name = ?secret.metadata.name, "secret already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(Error::not_found("Secret", name)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build the credentials secret for an access request
pub fn credentials_secret(
    access: &BucketAccess,
    name: &str,
    bucket_id: &str,
    endpoint: Option<&str>,
    credentials: &Credentials,
) -> Secret {
    let mut data = BTreeMap::from([
        (ACCESS_KEY_ID_KEY.to_string(), credentials.access_key_id.clone()),
        (
            SECRET_ACCESS_KEY_KEY.to_string(),
            credentials.secret_access_key.clone(),
        ),
        (BUCKET_ID_KEY.to_string(), bucket_id.to_string()),
    ]);
    if let Some(endpoint) = endpoint {
        data.insert(ENDPOINT_KEY.to_string(), endpoint.to_string());
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: access.metadata.namespace.clone(),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGED_BY_VALUE.to_string(),
            )])),
            owner_references: access.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        string_data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Create the credentials secret unless it already exists
///
/// Returns true if a secret was created.
pub async fn materialize(
    secrets: &dyn SecretClient,
    namespace: &str,
    secret: Secret,
) -> Result<bool, Error> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    if secrets.get(namespace, &name).await?.is_some() {
        debug!(namespace, secret = %name, "credentials secret present, not recreating");
        return Ok(false);
    }
    secrets.create(namespace, secret).await?;
    info!(namespace, secret = %name, "credentials secret created");
    Ok(true)
}

/// Delete the credentials secret, treating an absent secret as deleted
pub async fn remove(secrets: &dyn SecretClient, namespace: &str, name: &str) -> Result<(), Error> {
    match secrets.delete(namespace, name).await {
        Ok(()) => {
            info!(namespace, secret = %name, "credentials secret deleted");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!(namespace, secret = %name, "credentials secret already gone");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
