//! Driver that talks to an out-of-process backend over gRPC

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tracing::{debug, info};

use super::{AccessGrant, BucketDriver, Credentials};
use crate::proto::bucket_driver_client::BucketDriverClient;
use crate::proto::{
    CreateBucketRequest, DeleteBucketRequest, GrantBucketAccessRequest, RevokeBucketAccessRequest,
};
use crate::Error;

/// gRPC client for one backend
#[derive(Clone, Debug)]
pub struct GrpcDriver {
    backend: String,
    client: BucketDriverClient<Channel>,
}

impl GrpcDriver {
    /// Build a driver for `endpoint`
    ///
    /// The channel connects lazily, so a backend that is down at startup only
    /// fails the calls made while it is unreachable.
    pub fn connect_lazy(
        backend: impl Into<String>,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let backend = backend.into();
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| Error::driver(&backend, format!("invalid endpoint {endpoint:?}: {e}")))?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();
        info!(backend = %backend, endpoint, "registered gRPC bucket driver");
        Ok(Self {
            backend,
            client: BucketDriverClient::new(channel),
        })
    }

    fn map_status(&self, status: Status, kind: &str, id: &str) -> Error {
        match status.code() {
            Code::NotFound => Error::not_found(kind, id),
            code => Error::driver(&self.backend, format!("{code:?}: {}", status.message())),
        }
    }
}

#[async_trait]
impl BucketDriver for GrpcDriver {
    async fn create_bucket(&self, name: &str, region: &str) -> Result<String, Error> {
        let response = self
            .client
            .clone()
            .create_bucket(CreateBucketRequest {
                name: name.to_string(),
                region: region.to_string(),
            })
            .await
            .map_err(|s| self.map_status(s, "bucket", name))?
            .into_inner();
        if response.bucket_id.is_empty() {
            return Err(Error::driver(&self.backend, "CreateBucket returned an empty bucket id"));
        }
        debug!(backend = %self.backend, bucket_id = %response.bucket_id, "bucket created");
        Ok(response.bucket_id)
    }

    async fn delete_bucket(&self, bucket_id: &str, region: &str) -> Result<(), Error> {
        self.client
            .clone()
            .delete_bucket(DeleteBucketRequest {
                bucket_id: bucket_id.to_string(),
                region: region.to_string(),
            })
            .await
            .map_err(|s| self.map_status(s, "bucket", bucket_id))?;
        Ok(())
    }

    async fn grant_access(&self, bucket_id: &str, account_name: &str) -> Result<AccessGrant, Error> {
        let response = self
            .client
            .clone()
            .grant_bucket_access(GrantBucketAccessRequest {
                bucket_id: bucket_id.to_string(),
                account_name: account_name.to_string(),
            })
            .await
            .map_err(|s| self.map_status(s, "bucket", bucket_id))?
            .into_inner();

        let credentials = response
            .credentials
            .filter(|c| !c.access_key_id.is_empty() && !c.secret_access_key.is_empty())
            .ok_or_else(|| Error::driver(&self.backend, "GrantBucketAccess returned no credentials"))?;
        Ok(AccessGrant {
            account_id: response.account_id,
            credentials: Credentials {
                access_key_id: credentials.access_key_id,
                secret_access_key: credentials.secret_access_key,
            },
        })
    }

    async fn revoke_access(&self, bucket_id: &str, account_id: &str) -> Result<(), Error> {
        self.client
            .clone()
            .revoke_bucket_access(RevokeBucketAccessRequest {
                bucket_id: bucket_id.to_string(),
                account_id: account_id.to_string(),
            })
            .await
            .map_err(|s| self.map_status(s, "account", account_id))?;
        Ok(())
    }
}
