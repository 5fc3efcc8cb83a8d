//! Backing services
//!
//! Services come in two kinds sharing one namespace of names per
//! organization:
//! - catalog services, provisioned by a service broker
//! - custom services, user-supplied credentials kept in a secret
//!
//! Callers work with `BackingService` and never branch on the kind.

pub mod catalog;
pub mod classes;
pub mod custom;

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use serde::Serialize;

use crate::context::Context;
use crate::domain::app::{NAME_LABEL, MANAGED_BY_VALUE};
use crate::domain::naming::validate_dns_label;
use crate::error::{CarrierError, CarrierResult};

// Re-export commonly used types
pub use catalog::CatalogService;
pub use custom::CustomService;

pub const SERVICE_TYPE_LABEL: &str = "carrier.io/service-type";
pub const SERVICE_LABEL: &str = "carrier.io/service";
pub const ORGANIZATION_LABEL: &str = "carrier.io/organization";

/// Service details as shown to users
pub type Details = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceStatus {
    Provisioned,
    Provisioning,
    Failed,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Provisioned => "Provisioned",
            Self::Provisioning => "Provisioning",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Labels carried by every object that represents a service
pub(crate) fn service_labels(org: &str, name: &str, service_type: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (SERVICE_TYPE_LABEL.to_string(), service_type.to_string()),
        (SERVICE_LABEL.to_string(), name.to_string()),
        (ORGANIZATION_LABEL.to_string(), org.to_string()),
        (NAME_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}

/// Name stored on a service object, if it is one
pub(crate) fn labelled_name(metadata: &ObjectMeta) -> Option<&str> {
    metadata.labels.as_ref()?.get(SERVICE_LABEL).map(String::as_str)
}

/// Service names become volume names and mount paths, so they must be
/// DNS labels
pub fn validate_service_name(name: &str) -> CarrierResult<()> {
    validate_dns_label(name)
        .map_err(|reason| CarrierError::BadRequest(format!("Invalid service name: {}", reason)))
}

pub(crate) fn service_selector(org: &str, service_type: &str) -> String {
    format!(
        "{}={},{}={},{}={}",
        NAME_LABEL, MANAGED_BY_VALUE, ORGANIZATION_LABEL, org, SERVICE_TYPE_LABEL, service_type
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackingService {
    Catalog(CatalogService),
    Custom(CustomService),
}

impl BackingService {
    pub fn name(&self) -> &str {
        match self {
            Self::Catalog(s) => &s.name,
            Self::Custom(s) => &s.name,
        }
    }

    pub async fn status(&self, ctx: &Context) -> CarrierResult<ServiceStatus> {
        match self {
            Self::Catalog(s) => s.status(ctx).await,
            Self::Custom(s) => Ok(s.status()),
        }
    }

    pub async fn details(&self, ctx: &Context) -> CarrierResult<Details> {
        match self {
            Self::Catalog(s) => Ok(s.details()),
            Self::Custom(s) => s.details(ctx).await,
        }
    }

    /// Secret holding the credentials `app` gets mounted
    pub async fn get_binding(&self, ctx: &Context, app: &str) -> CarrierResult<Secret> {
        match self {
            Self::Catalog(s) => s.binding_secret(ctx, app).await,
            Self::Custom(s) => s.binding_secret(ctx).await,
        }
    }

    /// Release whatever `get_binding` created for `app`
    pub async fn delete_binding(&self, ctx: &Context, app: &str) -> CarrierResult<()> {
        match self {
            Self::Catalog(s) => s.delete_binding(ctx, app).await,
            // the secret is the service itself
            Self::Custom(_) => Ok(()),
        }
    }

    pub async fn delete(&self, ctx: &Context) -> CarrierResult<()> {
        match self {
            Self::Catalog(s) => s.delete(ctx).await,
            Self::Custom(s) => s.delete(ctx).await,
        }
    }

    pub async fn wait_for_provision(&self, ctx: &Context) -> CarrierResult<()> {
        match self {
            Self::Catalog(s) => s.wait_for_provision(ctx).await,
            Self::Custom(_) => Ok(()),
        }
    }
}

/// Find a service by name, catalog services first
pub async fn lookup(ctx: &Context, org: &str, name: &str) -> CarrierResult<BackingService> {
    if let Some(service) = CatalogService::lookup(ctx, org, name).await? {
        return Ok(BackingService::Catalog(service));
    }
    if let Some(service) = CustomService::lookup(ctx, org, name).await? {
        return Ok(BackingService::Custom(service));
    }
    Err(CarrierError::ServiceNotFound(name.to_string()))
}

/// Every service of an organization, sorted by name
pub async fn list(ctx: &Context, org: &str) -> CarrierResult<Vec<BackingService>> {
    let mut services: Vec<BackingService> = CatalogService::list(ctx, org)
        .await?
        .into_iter()
        .map(BackingService::Catalog)
        .collect();
    services.extend(
        CustomService::list(ctx, org)
            .await?
            .into_iter()
            .map(BackingService::Custom),
    );
    services.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::classes::tests::with_catalog;
    use crate::context::testing::test_context;

    #[tokio::test]
    async fn test_lookup_is_kind_agnostic() {
        let t = test_context().with_org("workspace");
        with_catalog(&t);

        CustomService::create(
            &t.ctx,
            "workspace",
            "creds",
            &BTreeMap::from([("token".to_string(), "abc".to_string())]),
        )
        .await
        .unwrap();
        CatalogService::create(&t.ctx, "workspace", "db", "mariadb", "10-3-22", &BTreeMap::new())
            .await
            .unwrap();

        let custom = lookup(&t.ctx, "workspace", "creds").await.unwrap();
        assert_eq!(custom.name(), "creds");
        assert_eq!(custom.status(&t.ctx).await.unwrap(), ServiceStatus::Provisioned);
        custom.wait_for_provision(&t.ctx).await.unwrap();

        let catalog = lookup(&t.ctx, "workspace", "db").await.unwrap();
        assert!(matches!(&catalog, BackingService::Catalog(s) if s.org == "workspace"));
        assert!(catalog.details(&t.ctx).await.unwrap().contains_key("Class"));

        let names: Vec<String> = list(&t.ctx, "workspace")
            .await
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["creds", "db"]);

        assert!(matches!(
            lookup(&t.ctx, "workspace", "cache").await,
            Err(CarrierError::ServiceNotFound(name)) if name == "cache"
        ));
    }

    #[tokio::test]
    async fn test_custom_binding_is_the_service_secret() {
        let t = test_context().with_org("workspace");
        let service = BackingService::Custom(
            CustomService::create(
                &t.ctx,
                "workspace",
                "creds",
                &BTreeMap::from([("token".to_string(), "abc".to_string())]),
            )
            .await
            .unwrap(),
        );

        let secret = service.get_binding(&t.ctx, "web").await.unwrap();
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("service-org-workspace-svc-creds")
        );
        service.delete_binding(&t.ctx, "web").await.unwrap();
        assert!(t
            .cluster
            .secret("workspace", "service-org-workspace-svc-creds")
            .is_some());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ServiceStatus::Provisioned.to_string(), "Provisioned");
        assert_eq!(ServiceStatus::Failed.to_string(), "Failed");
    }
}
