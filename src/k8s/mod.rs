//! Kubernetes operations

pub mod client;
#[cfg(test)]
pub mod fake;
pub mod kubectl;

pub use client::{
    ClusterClient, ClusterError, KubeCluster, PatchType, ResourceScope, RestMapping, create_client,
};
