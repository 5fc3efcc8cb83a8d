//! # carrier configuration
//!
//! Loaded once per process from `carrier.yaml` (or the file named by
//! `--config` / `CARRIER_CONFIG`). Every field has a default, so an empty
//! file or no file at all yields a working local setup apart from the
//! system domain.
//!
//! Secrets can be kept out of the file:
//! - `GITEA_PASSWORD` overrides `gitea.password`
//! - `CARRIER_HOOK_SECRET` overrides `gitea.hook_secret`
//!
//! ## Example
//!
//! ```yaml
//! domain: 10.0.0.1.nip.io
//! gitea:
//!   url: http://gitea-http.gitea:10080
//!   username: dev
//! timeouts:
//!   app_built: 15m
//! ```

mod gitea;
mod kubernetes;
mod timeouts;

pub use gitea::{CertificatesConfig, GiteaConfig};
pub use kubernetes::KubernetesConfig;
pub use timeouts::TimeoutsConfig;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default config file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "carrier.yaml";

/// Complete carrier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierConfig {
    /// System domain; applications are routed at `<app>.<domain>`
    #[serde(default)]
    pub domain: String,

    /// Address the API server binds to
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default)]
    pub kubernetes: KubernetesConfig,

    #[serde(default)]
    pub gitea: GiteaConfig,

    #[serde(default)]
    pub certificates: CertificatesConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

fn default_listen() -> String {
    "0.0.0.0:8030".to_string()
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            listen: default_listen(),
            kubernetes: KubernetesConfig::default(),
            gitea: GiteaConfig::default(),
            certificates: CertificatesConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

impl CarrierConfig {
    /// Load configuration.
    ///
    /// An explicitly named file must exist. Without one, `carrier.yaml` in
    /// the working directory is used when present, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                Self::from_file(path)?
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content).with_context(|| {
            format!(
                "Failed to parse config: {}\n  Check YAML syntax and duration strings (e.g. 90s, 10m).",
                path.display()
            )
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var("GITEA_PASSWORD") {
            if !password.is_empty() {
                self.gitea.password = password;
            }
        }
        if let Ok(secret) = std::env::var("CARRIER_HOOK_SECRET") {
            if !secret.is_empty() {
                self.gitea.hook_secret = secret;
            }
        }
    }

    /// Report every problem at once instead of failing on the first
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.domain.is_empty() {
            errors.push("domain is required (e.g. 10.0.0.1.nip.io)".to_string());
        }
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!("listen '{}' is not a socket address", self.listen));
        }
        if reqwest::Url::parse(&self.gitea.url).is_err() {
            errors.push(format!("gitea.url '{}' is not a valid URL", self.gitea.url));
        }
        if self.gitea.username.is_empty() {
            errors.push("gitea.username is required".to_string());
        }
        if self.kubernetes.staging_namespace.is_empty() {
            errors.push("kubernetes.staging_namespace is required".to_string());
        }
        if self.timeouts.poll_interval.is_zero() {
            errors.push("timeouts.poll_interval must be greater than zero".to_string());
        }
        if self.timeouts.poll_interval > self.timeouts.app_built {
            errors.push("timeouts.poll_interval must not exceed timeouts.app_built".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
