//! Bucket operator - provisions object-storage buckets and access credentials
//!
//! Users declare what they want through three custom resources:
//!
//! - `BucketClass` (cluster-scoped): an administrator template selecting a
//!   backend, region and deletion policy
//! - `BucketClaim`: a request for a bucket, provisioned once from its class
//! - `BucketAccess`: a request for credentials on a claimed or pre-existing
//!   bucket, materialized as a Secret
//!
//! # Architecture
//!
//! Watch events flow through an [`informer::EventRouter`] into a per-kind
//! [`cache::ResourceCache`] and [`queue::WorkQueue`]. Workers pull keys off
//! the queue and run the claim or access reconciler, which talks to the
//! backend through the [`driver::DriverRegistry`] and writes status back to
//! the API server. The queue guarantees a key is never reconciled by two
//! workers at once, and retries failures with per-key exponential backoff.
//!
//! Deletion needs no finalizers: the reconciler keeps the last good copy of
//! every object in a fallback store, and an object found there but missing
//! from the cache is torn down on the backend.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions
//! - [`controller`] - Reconcilers, worker pools and the Kubernetes client seam
//! - [`driver`] - Backend driver capability, registry, gRPC and in-memory drivers
//! - [`queue`] - Deduplicating, rate-limited work queue
//! - [`retry`] - Per-key exponential backoff
//! - [`cache`] - Watch cache and fallback store
//! - [`informer`] - Watch stream to cache and queue bridging
//! - [`secret`] - Credential secrets
//! - [`events`] - Kubernetes Event publishing
//! - [`leader_election`] - Lease-based leader election
//! - [`config`] - Engine configuration
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cache;
pub mod config;
pub mod controller;
pub mod crd;
pub mod driver;
pub mod error;
pub mod events;
pub mod informer;
pub mod key;
pub mod leader_election;
pub mod proto;
pub mod queue;
pub mod retry;
pub mod secret;

pub use error::Error;

/// Default namespace for the leader election Lease
pub const DEFAULT_LEADER_ELECTION_NAMESPACE: &str = "kube-system";
