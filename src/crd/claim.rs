//! BucketClaim Custom Resource Definition
//!
//! A BucketClaim is a user's request for a bucket. The controller provisions
//! the bucket once and records what it did in the status; afterwards the
//! status only ever gains fields.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::class::BucketClass;
use super::types::DeletionPolicy;

/// Specification for a BucketClaim
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "object.storage.dev",
    version = "v1alpha1",
    kind = "BucketClaim",
    plural = "bucketclaims",
    shortname = "bc",
    status = "BucketClaimStatus",
    namespaced,
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".spec.bucketClassName"}"#,
    printcolumn = r#"{"name":"Provisioned","type":"boolean","jsonPath":".status.provisioned"}"#,
    printcolumn = r#"{"name":"Bucket","type":"string","jsonPath":".status.bucketId"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketClaimSpec {
    /// Name of the BucketClass to provision from
    ///
    /// Optional in the schema so that a missing reference surfaces as a
    /// controller validation error instead of an admission rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_class_name: Option<String>,
}

impl BucketClaimSpec {
    /// Validate the claim, returning the referenced class name
    pub fn validate(&self, key: &str) -> Result<&str, crate::Error> {
        match self.bucket_class_name.as_deref() {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(crate::Error::validation(
                key,
                "BucketClaim must reference a BucketClass",
            )),
        }
    }
}

/// Status for a BucketClaim
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketClaimStatus {
    /// Whether the backend bucket has been created
    #[serde(default)]
    pub provisioned: bool,

    /// Identifier of the backend bucket
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bucket_id: String,

    /// Region the bucket was created in
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,

    /// Deletion policy resolved from the class at provision time
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Backend type the bucket lives on
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend_type: String,

    /// Backend endpoint, if the class advertised one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl BucketClaimStatus {
    /// Build the status recorded after a successful provision
    pub fn provisioned(class: &BucketClass, bucket_id: impl Into<String>, backend_type: &str) -> Self {
        Self {
            provisioned: true,
            bucket_id: bucket_id.into(),
            region: class.spec.region.clone(),
            deletion_policy: class.spec.deletion_policy,
            backend_type: backend_type.to_string(),
            endpoint: class.spec.endpoint().map(str::to_string),
        }
    }
}

impl BucketClaim {
    /// Returns true once the controller has created the backend bucket
    pub fn is_provisioned(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.provisioned)
    }
}
