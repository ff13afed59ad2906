//! Cluster-backed tests for the bucket operator
//!
//! # Test Organization
//!
//! - `crd_operations`: Stories about creating and reading the bucket
//!   resources through the Kubernetes API
//!
//! - `bucket_lifecycle`: Stories about the controller provisioning buckets,
//!   issuing credentials and cleaning up after deletion
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod bucket_lifecycle;
mod crd_operations;
mod helpers;
