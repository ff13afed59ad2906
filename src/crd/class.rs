//! BucketClass Custom Resource Definition
//!
//! A BucketClass is an administrator-defined template. Claims and access
//! requests reference it by name to pick a backend, region and deletion policy.
//! The controller only ever reads classes.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{DeletionPolicy, BACKEND_TYPE_PARAMETER, ENDPOINT_PARAMETER};

/// Specification for a BucketClass
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "object.storage.dev",
    version = "v1alpha1",
    kind = "BucketClass",
    plural = "bucketclasses",
    shortname = "bclass",
    namespaced = false,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"Policy","type":"string","jsonPath":".spec.deletionPolicy"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketClassSpec {
    /// Region buckets of this class are created in
    #[serde(default)]
    pub region: String,

    /// What happens to the backend bucket when a claim is deleted
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Backend parameters, including the backend type and endpoint
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl BucketClassSpec {
    /// Backend type selecting the driver, if set
    pub fn backend_type(&self) -> Option<&str> {
        self.parameters
            .get(BACKEND_TYPE_PARAMETER)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Public endpoint of the backend, if set
    pub fn endpoint(&self) -> Option<&str> {
        self.parameters.get(ENDPOINT_PARAMETER).map(String::as_str)
    }
}
