//! BucketAccess Custom Resource Definition
//!
//! A BucketAccess requests credentials for a bucket. The bucket is either
//! provisioned through a BucketClaim in the same namespace or supplied as an
//! existing backend bucket identifier. Exactly one of the two must be set.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Prefix for credentials secrets created for access requests
pub const CREDENTIALS_SECRET_PREFIX: &str = "bucket-credentials-";

/// Specification for a BucketAccess
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "object.storage.dev",
    version = "v1alpha1",
    kind = "BucketAccess",
    plural = "bucketaccesses",
    shortname = "ba",
    status = "BucketAccessStatus",
    namespaced,
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".spec.bucketClassName"}"#,
    printcolumn = r#"{"name":"Granted","type":"boolean","jsonPath":".status.accessGranted"}"#,
    printcolumn = r#"{"name":"Secret","type":"string","jsonPath":".status.credentialsSecretName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessSpec {
    /// Name of the BucketClass whose backend grants access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_class_name: Option<String>,

    /// BucketClaim (same namespace) whose bucket to access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_claim_name: Option<String>,

    /// Identifier of a bucket that already exists on the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_bucket_id: Option<String>,
}

/// Where the bucket of an access request comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BucketSource<'a> {
    /// Bucket provisioned for the named claim
    Claim(&'a str),
    /// Pre-existing backend bucket
    Existing(&'a str),
}

/// Validated references of an access request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessRefs<'a> {
    /// Referenced BucketClass name
    pub class_name: &'a str,
    /// Bucket to grant access to
    pub source: BucketSource<'a>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl BucketAccessSpec {
    /// Validate the access request and return its references
    pub fn validate(&self, key: &str) -> Result<AccessRefs<'_>, crate::Error> {
        let class_name = non_empty(&self.bucket_class_name).ok_or_else(|| {
            crate::Error::validation(key, "BucketAccess must reference a BucketClass")
        })?;

        let source = match (
            non_empty(&self.bucket_claim_name),
            non_empty(&self.existing_bucket_id),
        ) {
            (Some(claim), None) => BucketSource::Claim(claim),
            (None, Some(bucket)) => BucketSource::Existing(bucket),
            (Some(_), Some(_)) => {
                return Err(crate::Error::validation(
                    key,
                    "BucketAccess must set only one of bucketClaimName and existingBucketId",
                ))
            }
            (None, None) => {
                return Err(crate::Error::validation(
                    key,
                    "BucketAccess must set one of bucketClaimName or existingBucketId",
                ))
            }
        };

        Ok(AccessRefs { class_name, source })
    }
}

/// Status for a BucketAccess
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessStatus {
    /// Whether the backend granted access
    #[serde(default)]
    pub access_granted: bool,

    /// Backend account the credentials belong to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_id: String,

    /// Bucket access was granted on
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bucket_id: String,

    /// Backend type that granted access
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend_type: String,

    /// Secret (same namespace) holding the issued credentials
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credentials_secret_name: String,
}

impl BucketAccess {
    /// Returns true once the backend has granted access
    pub fn is_granted(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.access_granted)
    }

    /// Name of the credentials secret for this access request
    ///
    /// A name already recorded in status wins so renames of the naming scheme
    /// never orphan an existing secret.
    pub fn credentials_secret_name(&self) -> String {
        match self.status.as_ref() {
            Some(s) if !s.credentials_secret_name.is_empty() => s.credentials_secret_name.clone(),
            _ => format!(
                "{CREDENTIALS_SECRET_PREFIX}{}",
                self.metadata.name.as_deref().unwrap_or_default()
            ),
        }
    }
}
