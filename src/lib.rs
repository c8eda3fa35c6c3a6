//! Pod relocation library
//!
//! Moves running pods between schedulers and nodes of a Kubernetes cluster.

pub mod config;
pub mod error;
pub mod k8s;
pub mod relocation;

pub use error::{Error, Result};
