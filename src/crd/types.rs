//! Supporting types shared by the bucket CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Prefix shared by all well-known BucketClass parameter keys
pub const PARAMETER_PREFIX: &str = "object.storage.dev/";

/// BucketClass parameter selecting the backend driver
pub const BACKEND_TYPE_PARAMETER: &str = "object.storage.dev/backend-type";

/// BucketClass parameter carrying the backend's public endpoint
pub const ENDPOINT_PARAMETER: &str = "object.storage.dev/endpoint";

/// What happens to the backend bucket when its claim is deleted
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeletionPolicy {
    /// Delete the backend bucket together with the claim
    #[default]
    Delete,
    /// Keep the backend bucket after the claim is gone
    Retain,
}

impl DeletionPolicy {
    /// Returns true if the backend bucket must survive claim deletion
    pub fn is_retain(&self) -> bool {
        matches!(self, Self::Retain)
    }
}

impl std::fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delete => write!(f, "Delete"),
            Self::Retain => write!(f, "Retain"),
        }
    }
}
