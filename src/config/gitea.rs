//! Source repository (Gitea) and certificate settings.

use serde::{Deserialize, Serialize};

/// Gitea connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiteaConfig {
    /// Base URL of the Gitea server, reachable from carrier and from the pipeline
    #[serde(default = "default_gitea_url")]
    pub url: String,

    #[serde(default = "default_gitea_username")]
    pub username: String,

    /// Overridden by `GITEA_PASSWORD`
    #[serde(default)]
    pub password: String,

    /// Event listener that starts staging on push
    #[serde(default = "default_hook_url")]
    pub hook_url: String,

    /// Overridden by `CARRIER_HOOK_SECRET`
    #[serde(default)]
    pub hook_secret: String,
}

fn default_gitea_url() -> String {
    "http://gitea-http.gitea:10080".to_string()
}

fn default_gitea_username() -> String {
    "dev".to_string()
}

fn default_hook_url() -> String {
    "http://el-staging-listener.tekton-staging:8080".to_string()
}

impl Default for GiteaConfig {
    fn default() -> Self {
        Self {
            url: default_gitea_url(),
            username: default_gitea_username(),
            password: String::new(),
            hook_url: default_hook_url(),
            hook_secret: String::new(),
        }
    }
}

/// TLS certificate issuance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificatesConfig {
    /// ClusterIssuer used for real domains
    #[serde(default = "default_production_issuer")]
    pub production_issuer: String,

    /// Namespaced CA issuer created on demand for local domains
    #[serde(default = "default_local_issuer")]
    pub local_issuer: String,

    /// Secret holding the local CA, copied into each organization
    #[serde(default = "default_ca_secret")]
    pub ca_secret: String,

    /// Wildcard DNS suffixes that get the local CA instead of a public certificate
    #[serde(default = "default_local_domains")]
    pub local_domains: Vec<String>,
}

fn default_production_issuer() -> String {
    "letsencrypt-production".to_string()
}

fn default_local_issuer() -> String {
    "carrier-ca".to_string()
}

fn default_ca_secret() -> String {
    "ca-cert".to_string()
}

fn default_local_domains() -> Vec<String> {
    vec![
        "omg.howdoi.website".to_string(),
        "nip.io".to_string(),
        "sslip.io".to_string(),
    ]
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            production_issuer: default_production_issuer(),
            local_issuer: default_local_issuer(),
            ca_secret: default_ca_secret(),
            local_domains: default_local_domains(),
        }
    }
}

impl CertificatesConfig {
    /// True when `host` sits under one of the local wildcard DNS suffixes
    pub fn is_local(&self, host: &str) -> bool {
        self.local_domains.iter().any(|suffix| {
            host == suffix.as_str() || host.ends_with(&format!(".{}", suffix))
        })
    }
}
