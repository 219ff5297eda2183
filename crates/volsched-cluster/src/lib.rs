//! volsched-cluster: Cluster API layer
//!
//! This crate provides the interfaces the scheduler uses to talk to a cluster:
//! - Collaborator traits for limits, topology, volume stats and async jobs
//! - A JSON-RPC client implementing them against an Element cluster

pub mod element;
pub mod traits;

pub use element::ElementClient;
pub use traits::{AsyncJobApi, ClusterApi, ClusterLimitsApi, ReportFetcher, VolumeStatsFetcher};
