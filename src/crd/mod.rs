//! Custom Resource Definitions for the bucket operator
//!
//! This module contains the three declarative resources the controller
//! reconciles against: classes (templates), claims (bucket requests) and
//! accesses (credential grants).

mod access;
mod claim;
mod class;
mod types;

pub use access::{
    AccessRefs, BucketAccess, BucketAccessSpec, BucketAccessStatus, BucketSource,
    CREDENTIALS_SECRET_PREFIX,
};
pub use claim::{BucketClaim, BucketClaimSpec, BucketClaimStatus};
pub use class::{BucketClass, BucketClassSpec};
pub use types::{DeletionPolicy, BACKEND_TYPE_PARAMETER, ENDPOINT_PARAMETER, PARAMETER_PREFIX};
