//! volsched-core: Core types and configuration for volsched
//!
//! This crate provides the fundamental types used throughout the volsched system:
//! - Volume, node, topology and async-job types exchanged with the cluster
//! - Configuration types
//! - Error handling
//! - Secret redaction for credentials

pub mod config;
pub mod error;
pub mod model;
pub mod secret;

pub use config::*;
pub use error::*;
pub use model::*;
pub use secret::Secret;
