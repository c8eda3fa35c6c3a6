//! Kubernetes integration module
//!
//! This module handles all interactions with the cluster API server:
//! - Reading, replacing, deleting and creating pods
//! - Reading and replacing replication controllers
//! - Enumerating the node inventory

mod client;

pub use client::{ClusterApi, K8sClient, PodFilter};

#[cfg(test)]
pub use client::MockClusterApi;
