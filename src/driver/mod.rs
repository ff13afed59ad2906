//! Backend driver capability and registry
//!
//! A driver is anything that can create and delete buckets and grant and
//! revoke access on one object-storage backend. The registry maps the
//! backend type named in a BucketClass to the driver serving it and is
//! assembled once at startup.

mod fake;
mod grpc;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::crd::BucketClass;
use crate::Error;

pub use fake::FakeDriver;
pub use grpc::GrpcDriver;

/// Credentials issued by a backend
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Access key identifier
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Result of a successful access grant
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessGrant {
    /// Backend account the credentials belong to
    pub account_id: String,
    /// Issued credentials
    pub credentials: Credentials,
}

/// Operations every object-storage backend supports
///
/// Implementations apply their own timeouts. Deleting or revoking something
/// the backend does not know about returns [`Error::NotFound`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BucketDriver: Send + Sync {
    /// Create a bucket, returning its backend identifier
    async fn create_bucket(&self, name: &str, region: &str) -> Result<String, Error>;

    /// Delete a bucket
    async fn delete_bucket(&self, bucket_id: &str, region: &str) -> Result<(), Error>;

    /// Grant `account_name` access to a bucket
    async fn grant_access(&self, bucket_id: &str, account_name: &str)
        -> Result<AccessGrant, Error>;

    /// Revoke an account's access to a bucket
    async fn revoke_access(&self, bucket_id: &str, account_id: &str) -> Result<(), Error>;
}

/// A `backend-type=endpoint` pair naming an out-of-process driver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverEndpoint {
    /// Backend type classes select this driver with
    pub backend_type: String,
    /// gRPC endpoint URI
    pub endpoint: String,
}

impl FromStr for DriverEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((backend_type, endpoint))
                if !backend_type.trim().is_empty() && !endpoint.trim().is_empty() =>
            {
                Ok(Self {
                    backend_type: backend_type.trim().to_string(),
                    endpoint: endpoint.trim().to_string(),
                })
            }
            _ => Err(Error::validation(
                "config",
                format!("driver {s:?} is not of the form backend-type=endpoint"),
            )),
        }
    }
}

/// Backend type to driver mapping
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn BucketDriver>>,
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.drivers.keys().collect();
        types.sort();
        f.debug_struct("DriverRegistry").field("backends", &types).finish()
    }
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver for `backend_type`, replacing any previous one
    pub fn register(&mut self, backend_type: impl Into<String>, driver: Arc<dyn BucketDriver>) {
        self.drivers.insert(backend_type.into(), driver);
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, backend_type: impl Into<String>, driver: Arc<dyn BucketDriver>) -> Self {
        self.register(backend_type, driver);
        self
    }

    /// Driver for a backend type recorded in a status
    pub fn get(&self, backend_type: &str) -> Option<Arc<dyn BucketDriver>> {
        self.drivers.get(backend_type).cloned()
    }

    /// Resolve the driver selected by a class
    ///
    /// A missing or unknown backend type is a configuration error and will
    /// not fix itself.
    pub fn for_class(&self, class: &BucketClass) -> Result<(String, Arc<dyn BucketDriver>), Error> {
        let class_name = class.metadata.name.as_deref().unwrap_or_default();
        let backend_type = class.spec.backend_type().ok_or_else(|| {
            Error::validation(class_name, "BucketClass does not set a backend type")
        })?;
        let driver = self.get(backend_type).ok_or_else(|| {
            Error::validation(class_name, format!("unknown backend type {backend_type:?}"))
        })?;
        Ok((backend_type.to_string(), driver))
    }

    /// Registered backend types, sorted
    pub fn backend_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Returns true if no driver is registered
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Assemble the registry from startup configuration
    ///
    /// Each of `fake_types` gets its own in-memory driver. A backend type
    /// listed twice is a configuration error.
    pub fn from_config(
        fake_types: &[String],
        endpoints: &[DriverEndpoint],
        timeout: Duration,
    ) -> Result<Self, Error> {
        let mut registry = Self::new();
        for backend_type in fake_types.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            registry.register_unique(backend_type, Arc::new(FakeDriver::new()))?;
        }
        for ep in endpoints {
            let driver = GrpcDriver::connect_lazy(&ep.backend_type, &ep.endpoint, timeout)?;
            registry.register_unique(&ep.backend_type, Arc::new(driver))?;
        }
        Ok(registry)
    }

    fn register_unique(&mut self, backend_type: &str, driver: Arc<dyn BucketDriver>) -> Result<(), Error> {
        if self.drivers.contains_key(backend_type) {
            return Err(Error::validation(
                "config",
                format!("backend type {backend_type:?} is configured more than once"),
            ));
        }
        self.register(backend_type, driver);
        Ok(())
    }
}
