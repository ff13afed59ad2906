//! Error types for the bucket operator
//!
//! Errors carry enough context (resource key, backend type) to be useful in
//! logs without the caller re-wrapping them. The worker loop is the only place
//! that turns an error into a queue action, using [`Error::is_retryable`].

use thiserror::Error;

/// Main error type for bucket operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid resource configuration (missing reference, unknown backend type)
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Key of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// A referenced object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object (BucketClass, Secret, bucket, ...)
        kind: String,
        /// Name or identifier of the missing object
        name: String,
    },

    /// Backend driver call failed
    #[error("driver error [{backend}]: {message}")]
    Driver {
        /// Backend type the call was dispatched to
        backend: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Where the error occurred (e.g. "cache", "queue")
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a validation error for the given resource key
    pub fn validation(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a driver error for the given backend type
    pub fn driver(backend: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Driver {
            backend: backend.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Whether waiting and trying again could make this error go away.
    ///
    /// Validation errors need a spec change; everything else (missing class
    /// that has not synced yet, driver outages, update conflicts) may recover.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation { .. })
    }

    /// Whether this error means the target object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }
}
