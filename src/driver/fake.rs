//! In-memory driver for local runs and tests

use async_trait::async_trait;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use super::{AccessGrant, BucketDriver, Credentials};
use crate::Error;

const BACKEND: &str = "fake";

#[derive(Clone, Debug)]
struct FakeBucket {
    region: String,
}

/// Driver that keeps buckets and accounts in memory
///
/// Creating a bucket twice with the same name returns the same identifier,
/// matching what real backends do for idempotent create calls.
#[derive(Debug, Default)]
pub struct FakeDriver {
    buckets: DashMap<String, FakeBucket>,
    /// (bucket id, account id) pairs with access
    grants: DashMap<(String, String), Credentials>,
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

impl FakeDriver {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the bucket exists
    pub fn has_bucket(&self, bucket_id: &str) -> bool {
        self.buckets.contains_key(bucket_id)
    }

    /// Number of live grants
    pub fn grant_count(&self) -> usize {
        self.grants.len()
    }
}

#[async_trait]
impl BucketDriver for FakeDriver {
    async fn create_bucket(&self, name: &str, region: &str) -> Result<String, Error> {
        if name.is_empty() {
            return Err(Error::driver(BACKEND, "bucket name must not be empty"));
        }
        let bucket_id = format!("fake-{name}");
        self.buckets
            .entry(bucket_id.clone())
            .or_insert_with(|| FakeBucket {
                region: region.to_string(),
            });
        debug!(bucket_id = %bucket_id, region, "fake bucket created");
        Ok(bucket_id)
    }

    async fn delete_bucket(&self, bucket_id: &str, region: &str) -> Result<(), Error> {
        match self.buckets.remove(bucket_id) {
            Some((_, bucket)) => {
                if bucket.region != region {
                    debug!(bucket_id, expected = %bucket.region, region, "region mismatch on delete");
                }
                self.grants.retain(|(b, _), _| b != bucket_id);
                Ok(())
            }
            None => Err(Error::not_found("bucket", bucket_id)),
        }
    }

    async fn grant_access(&self, bucket_id: &str, account_name: &str) -> Result<AccessGrant, Error> {
        if !self.buckets.contains_key(bucket_id) {
            return Err(Error::not_found("bucket", bucket_id));
        }
        let account_id = format!("{account_name}-id");
        let credentials = self
            .grants
            .entry((bucket_id.to_string(), account_id.clone()))
            .or_insert_with(|| Credentials {
                access_key_id: random_string(20),
                secret_access_key: random_string(40),
            })
            .clone();
        Ok(AccessGrant {
            account_id,
            credentials,
        })
    }

    async fn revoke_access(&self, bucket_id: &str, account_id: &str) -> Result<(), Error> {
        self.grants
            .remove(&(bucket_id.to_string(), account_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::not_found("account", account_id))
    }
}
