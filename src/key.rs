//! Object keys used by the cache, fallback store and work queue.
//!
//! Keys render as `namespace/name` for namespaced objects and `name` for
//! cluster-scoped ones. The queue carries the rendered string; workers parse
//! it back with [`ObjectKey::from_str`].

use std::fmt;
use std::str::FromStr;

use kube::{Resource, ResourceExt};

use crate::Error;

/// Identity of a watched object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of a Kubernetes object, `None` if it has no name
    pub fn for_object<K: Resource>(obj: &K) -> Option<Self> {
        let name = obj.meta().name.clone().filter(|n| !n.is_empty())?;
        Some(Self {
            namespace: obj.namespace().filter(|ns| !ns.is_empty()),
            name,
        })
    }

    /// Namespace, or the empty string for cluster-scoped keys
    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::cluster(name)),
            (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
                Ok(Self::namespaced(ns, name))
            }
            _ => Err(Error::internal("key", format!("unexpected key format: {s:?}"))),
        }
    }
}
