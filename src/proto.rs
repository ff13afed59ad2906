//! Generated gRPC types for the backend driver contract
//!
//! The operator is a client of `bucket.driver.v1.BucketDriver`. The server
//! side is generated too so drivers written in Rust (and tests) can serve it.

#![allow(missing_docs)]

tonic::include_proto!("bucket.driver.v1");
