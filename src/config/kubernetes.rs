//! Kubernetes configuration for the staging namespace, pipeline and registries.

use serde::{Deserialize, Serialize};

/// Cluster-side settings shared by organizations and staging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// Namespace holding pipeline runs and the secrets copied into new organizations
    #[serde(default = "default_staging_namespace")]
    pub staging_namespace: String,

    /// Service account pipeline runs execute as
    #[serde(default = "default_staging_service_account")]
    pub staging_service_account: String,

    /// Pipeline referenced by every run
    #[serde(default = "default_staging_pipeline")]
    pub staging_pipeline: String,

    /// Registry the pipeline pushes built images to
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Registry address the cluster pulls application images from
    #[serde(default = "default_deployment_registry")]
    pub deployment_registry: String,

    /// Secrets duplicated from the staging namespace into every organization
    #[serde(default = "default_copied_secrets")]
    pub copied_secrets: Vec<String>,

    /// Pull secret attached to each organization's service account
    #[serde(default = "default_pull_secret")]
    pub pull_secret: String,
}

fn default_staging_namespace() -> String {
    "tekton-staging".to_string()
}

fn default_staging_service_account() -> String {
    "staging-triggers-admin".to_string()
}

fn default_staging_pipeline() -> String {
    "staging-pipeline".to_string()
}

fn default_registry_url() -> String {
    "registry.carrier-registry/apps".to_string()
}

fn default_deployment_registry() -> String {
    "127.0.0.1:30500/apps".to_string()
}

fn default_copied_secrets() -> Vec<String> {
    vec!["registry-creds".to_string(), "ca-cert".to_string()]
}

fn default_pull_secret() -> String {
    "registry-creds".to_string()
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            staging_namespace: default_staging_namespace(),
            staging_service_account: default_staging_service_account(),
            staging_pipeline: default_staging_pipeline(),
            registry_url: default_registry_url(),
            deployment_registry: default_deployment_registry(),
            copied_secrets: default_copied_secrets(),
            pull_secret: default_pull_secret(),
        }
    }
}
