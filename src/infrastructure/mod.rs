//! Infrastructure layer - external I/O adapters
//!
//! This module contains all code that interacts with external systems:
//! - Kubernetes API (capability trait; kube implementation in `crate::k8s`)
//! - Tekton pipeline runs
//! - cert-manager certificates
//! - Gitea repositories and webhooks
//! - Git pushes

pub mod certificates;
pub mod cluster;
pub mod git;
pub mod gitea;
#[cfg(test)]
pub mod memory;
pub mod pipeline;

// Re-export commonly used types
pub use cluster::ClusterApi;
pub use git::GitClient;
pub use gitea::{GiteaClient, SourceRepository};
