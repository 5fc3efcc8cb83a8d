//! User-defined services
//!
//! A custom service is a labelled secret in the organization namespace. It is
//! provisioned the moment it exists and its binding is the secret itself.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use tracing::info;

use super::{labelled_name, service_labels, service_selector, Details, ServiceStatus};
use crate::context::Context;
use crate::domain::naming::service_resource_name;
use crate::error::{CarrierError, CarrierResult, ClusterError, ClusterResult};

pub const CUSTOM_SERVICE_TYPE: &str = "custom";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomService {
    pub name: String,
    pub org: String,
    pub secret_name: String,
}

impl CustomService {
    pub fn new(org: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            org: org.to_string(),
            secret_name: service_resource_name(org, name),
        }
    }

    /// All custom services of an organization
    pub async fn list(ctx: &Context, org: &str) -> ClusterResult<Vec<Self>> {
        let secrets = ctx
            .cluster
            .list_secrets(org, &service_selector(org, CUSTOM_SERVICE_TYPE))
            .await?;

        Ok(secrets
            .iter()
            .filter_map(|secret| labelled_name(&secret.metadata).map(|name| Self::new(org, name)))
            .collect())
    }

    /// `None` when the backing secret does not exist or was stored for a
    /// different name that maps onto the same secret
    pub async fn lookup(ctx: &Context, org: &str, name: &str) -> ClusterResult<Option<Self>> {
        let service = Self::new(org, name);
        match ctx.cluster.get_secret(org, &service.secret_name).await {
            Ok(secret) if labelled_name(&secret.metadata) == Some(name) => Ok(Some(service)),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store `data` as a new custom service
    pub async fn create(
        ctx: &Context,
        org: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> CarrierResult<Self> {
        let service = Self::new(org, name);

        match ctx.cluster.get_secret(org, &service.secret_name).await {
            Ok(_) => return Err(CarrierError::AlreadyExists(name.to_string())),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(service.secret_name.clone()),
                labels: Some(service_labels(org, name, CUSTOM_SERVICE_TYPE)),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        };

        match ctx.cluster.create_secret(org, &secret).await {
            Ok(()) => {}
            Err(ClusterError::Conflict { .. }) => {
                return Err(CarrierError::AlreadyExists(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        info!("Custom service {}/{} created", org, name);
        Ok(service)
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus::Provisioned
    }

    /// The service secret itself
    pub async fn binding_secret(&self, ctx: &Context) -> CarrierResult<Secret> {
        ctx.cluster
            .get_secret(&self.org, &self.secret_name)
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => CarrierError::ServiceNotFound(self.name.clone()),
                e => e.into(),
            })
    }

    /// The secret's data as strings
    pub async fn details(&self, ctx: &Context) -> CarrierResult<Details> {
        let secret = self.binding_secret(ctx).await?;
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
            .collect())
    }

    pub async fn delete(&self, ctx: &Context) -> CarrierResult<()> {
        ctx.cluster
            .delete_secret(&self.org, &self.secret_name)
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => CarrierError::ServiceNotFound(self.name.clone()),
                e => e.into(),
            })
    }
}
