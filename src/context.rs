//! Process context
//!
//! Built once at startup and handed to every operation. Holds the loaded
//! configuration and the two external capabilities.

use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::config::CarrierConfig;
use crate::infrastructure::{ClusterApi, GiteaClient, SourceRepository};
use crate::k8s::KubeCluster;

#[derive(Clone)]
pub struct Context {
    pub config: Arc<CarrierConfig>,
    pub cluster: Arc<dyn ClusterApi>,
    pub repository: Arc<dyn SourceRepository>,
}

impl Context {
    pub fn new(
        config: CarrierConfig,
        cluster: Arc<dyn ClusterApi>,
        repository: Arc<dyn SourceRepository>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            cluster,
            repository,
        }
    }

    /// Connect to the cluster and the source repository named in `config`
    pub async fn connect(config: CarrierConfig) -> Result<Self> {
        let cluster = KubeCluster::connect().await?;
        let repository =
            GiteaClient::new(&config.gitea).context("Failed to create source repository client")?;
        Ok(Self::new(config, Arc::new(cluster), Arc::new(repository)))
    }

    /// Namespace pipeline runs live in
    pub fn staging_namespace(&self) -> &str {
        &self.config.kubernetes.staging_namespace
    }
}
