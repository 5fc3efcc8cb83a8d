//! TLS certificates for application routes
//!
//! carrier only writes cert-manager manifests. Real domains get a
//! certificate from the production ClusterIssuer; hosts under a local
//! wildcard DNS suffix are signed by a namespaced CA issuer backed by the
//! organization's copy of the CA secret.

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::json;
use tracing::{debug, info};

use super::cluster::{certificate_resource, ClusterApi};
use crate::config::CertificatesConfig;
use crate::error::{ClusterError, ClusterResult};

/// Which issuer signs a route's certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsIssuer {
    Production { cluster_issuer: String },
    LocalCa { issuer: String, ca_secret: String },
}

impl TlsIssuer {
    pub fn for_host(host: &str, config: &CertificatesConfig) -> Self {
        if config.is_local(host) {
            Self::LocalCa {
                issuer: config.local_issuer.clone(),
                ca_secret: config.ca_secret.clone(),
            }
        } else {
            Self::Production {
                cluster_issuer: config.production_issuer.clone(),
            }
        }
    }

    fn issuer_ref(&self) -> serde_json::Value {
        match self {
            Self::Production { cluster_issuer } => json!({"name": cluster_issuer, "kind": "ClusterIssuer"}),
            Self::LocalCa { issuer, .. } => json!({"name": issuer, "kind": "Issuer"}),
        }
    }
}

pub fn certificate_name(org: &str, app: &str) -> String {
    format!("{}.{}.ssl-certificate", org, app)
}

pub fn tls_secret_name(app: &str) -> String {
    format!("{}-tls", app)
}

fn issuer_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("cert-manager.io", "v1", "Issuer"),
        "issuers",
    )
}

/// Certificate manifest for `route`
pub fn certificate_manifest(org: &str, app: &str, route: &str, issuer: &TlsIssuer) -> DynamicObject {
    let mut object = DynamicObject::new(&certificate_name(org, app), &certificate_resource())
        .within(org);
    object.data = json!({
        "spec": {
            "commonName": route,
            "secretName": tls_secret_name(app),
            "dnsNames": [route],
            "issuerRef": issuer.issuer_ref(),
        }
    });
    object
}

fn local_issuer_manifest(org: &str, issuer: &str, ca_secret: &str) -> DynamicObject {
    let mut object = DynamicObject::new(issuer, &issuer_resource()).within(org);
    object.data = json!({ "spec": { "ca": { "secretName": ca_secret } } });
    object
}

fn ignore_conflict(result: ClusterResult<()>) -> ClusterResult<()> {
    match result {
        Err(ClusterError::Conflict { kind, name }) => {
            debug!("{} {} already exists, keeping it", kind, name);
            Ok(())
        }
        other => other,
    }
}

/// Compares only the fields carrier sets; the server may default others
fn same_certificate(existing: &DynamicObject, wanted: &DynamicObject) -> bool {
    let (a, b) = (&existing.data["spec"], &wanted.data["spec"]);
    a["dnsNames"] == b["dnsNames"]
        && a["secretName"] == b["secretName"]
        && a["issuerRef"]["name"] == b["issuerRef"]["name"]
        && a["issuerRef"]["kind"] == b["issuerRef"]["kind"]
}

fn ignore_not_found(result: ClusterResult<()>) -> ClusterResult<()> {
    match result {
        Err(ClusterError::NotFound { .. }) => Ok(()),
        other => other,
    }
}

/// Create the certificate for an application route.
///
/// An existing certificate for the same route counts as success; one for a
/// different route or issuer is replaced.
pub async fn create_certificate(
    cluster: &dyn ClusterApi,
    config: &CertificatesConfig,
    org: &str,
    app: &str,
    route: &str,
) -> ClusterResult<TlsIssuer> {
    let issuer = TlsIssuer::for_host(route, config);

    if let TlsIssuer::LocalCa { issuer, ca_secret } = &issuer {
        ignore_conflict(
            cluster
                .create_dynamic(
                    &issuer_resource(),
                    Some(org),
                    &local_issuer_manifest(org, issuer, ca_secret),
                )
                .await,
        )?;
    }

    let manifest = certificate_manifest(org, app, route, &issuer);
    let resource = certificate_resource();
    match cluster.create_dynamic(&resource, Some(org), &manifest).await {
        Ok(()) => {}
        Err(ClusterError::Conflict { .. }) => {
            let name = certificate_name(org, app);
            let existing = cluster.get_dynamic(&resource, Some(org), &name).await?;
            if same_certificate(&existing, &manifest) {
                debug!("Certificate {} is up to date", name);
            } else {
                info!("Route of {} changed, replacing certificate {}", app, name);
                ignore_not_found(cluster.delete_dynamic(&resource, Some(org), &name).await)?;
                cluster.create_dynamic(&resource, Some(org), &manifest).await?;
            }
        }
        Err(e) => return Err(e),
    }

    info!("Certificate {} requested for {}", certificate_name(org, app), route);
    Ok(issuer)
}

/// Delete an application's certificate and the secret cert-manager issued
pub async fn delete_certificate(cluster: &dyn ClusterApi, org: &str, app: &str) -> ClusterResult<()> {
    ignore_not_found(
        cluster
            .delete_dynamic(&certificate_resource(), Some(org), &certificate_name(org, app))
            .await,
    )?;
    ignore_not_found(cluster.delete_secret(org, &tls_secret_name(app)).await)
}
