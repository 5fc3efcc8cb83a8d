//! Catalog services
//!
//! A catalog service is a `ServiceInstance` provisioned by a broker. Binding
//! creates a `ServiceBinding` whose credentials the catalog writes into a
//! secret of the same name.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use serde_json::json;
use tracing::{debug, info};

use super::{labelled_name, service_labels, service_selector, Details, ServiceStatus};
use crate::context::Context;
use crate::domain::naming::{binding_resource_name, service_resource_name};
use crate::domain::retry::{poll_until, PollError};
use crate::error::{CarrierError, CarrierResult, ClusterError, ClusterResult};
use crate::infrastructure::cluster::{service_binding_resource, service_instance_resource};

pub const CATALOG_SERVICE_TYPE: &str = "catalog";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogService {
    pub name: String,
    pub org: String,
    pub instance_name: String,
    pub class: String,
    pub plan: String,
}

/// Provisioning state reported on a service instance
fn instance_status(object: &DynamicObject) -> (ServiceStatus, Option<String>) {
    let status = &object.data["status"];

    let failed = status["conditions"].as_array().and_then(|conditions| {
        conditions
            .iter()
            .find(|c| c["type"] == "Failed" && c["status"] == "True")
    });
    if let Some(condition) = failed {
        let message = condition["message"]
            .as_str()
            .or_else(|| condition["reason"].as_str())
            .unwrap_or("provisioning failed")
            .to_string();
        return (ServiceStatus::Failed, Some(message));
    }

    if status["provisionStatus"] == "Provisioned" {
        (ServiceStatus::Provisioned, None)
    } else {
        (ServiceStatus::Provisioning, None)
    }
}

fn ignore_not_found(result: ClusterResult<()>) -> ClusterResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

impl CatalogService {
    fn from_object(org: &str, name: &str, object: &DynamicObject) -> Self {
        let spec = &object.data["spec"];
        Self {
            name: name.to_string(),
            org: org.to_string(),
            instance_name: object
                .metadata
                .name
                .clone()
                .unwrap_or_else(|| service_resource_name(org, name)),
            class: spec["clusterServiceClassExternalName"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            plan: spec["clusterServicePlanExternalName"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        }
    }

    pub async fn list(ctx: &Context, org: &str) -> ClusterResult<Vec<Self>> {
        let objects = ctx
            .cluster
            .list_dynamic(
                &service_instance_resource(),
                Some(org),
                &service_selector(org, CATALOG_SERVICE_TYPE),
            )
            .await?;

        Ok(objects
            .iter()
            .filter_map(|object| {
                labelled_name(&object.metadata).map(|name| Self::from_object(org, name, object))
            })
            .collect())
    }

    /// `None` when no instance backs the name
    pub async fn lookup(ctx: &Context, org: &str, name: &str) -> ClusterResult<Option<Self>> {
        let instance = service_resource_name(org, name);
        match ctx
            .cluster
            .get_dynamic(&service_instance_resource(), Some(org), &instance)
            .await
        {
            Ok(object) if labelled_name(&object.metadata) == Some(name) => {
                Ok(Some(Self::from_object(org, name, &object)))
            }
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Request a new instance of `class`/`plan`.
    ///
    /// Both must exist in the catalog. `data` is passed to the broker as
    /// provisioning parameters.
    pub async fn create(
        ctx: &Context,
        org: &str,
        name: &str,
        class: &str,
        plan: &str,
        data: &BTreeMap<String, String>,
    ) -> CarrierResult<Self> {
        let service_class = super::classes::find_class(ctx, class).await?.ok_or_else(|| {
            CarrierError::NotFound(format!("Service class '{}' does not exist", class))
        })?;
        if super::classes::find_plan(ctx, &service_class, plan)
            .await?
            .is_none()
        {
            return Err(CarrierError::NotFound(format!(
                "Service plan '{}' does not exist for class '{}'",
                plan, class
            )));
        }

        let instance_name = service_resource_name(org, name);
        let mut object =
            DynamicObject::new(&instance_name, &service_instance_resource()).within(org);
        object.metadata.labels = Some(service_labels(org, name, CATALOG_SERVICE_TYPE));
        object.data = json!({
            "spec": {
                "clusterServiceClassExternalName": class,
                "clusterServicePlanExternalName": plan,
                "parameters": data,
            }
        });

        match ctx
            .cluster
            .create_dynamic(&service_instance_resource(), Some(org), &object)
            .await
        {
            Ok(()) => {}
            Err(ClusterError::Conflict { .. }) => {
                return Err(CarrierError::AlreadyExists(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        info!("Catalog service {}/{} requested ({} {})", org, name, class, plan);
        Ok(Self {
            name: name.to_string(),
            org: org.to_string(),
            instance_name,
            class: class.to_string(),
            plan: plan.to_string(),
        })
    }

    async fn instance(&self, ctx: &Context) -> CarrierResult<DynamicObject> {
        ctx.cluster
            .get_dynamic(&service_instance_resource(), Some(&self.org), &self.instance_name)
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => CarrierError::ServiceNotFound(self.name.clone()),
                e => e.into(),
            })
    }

    pub async fn status(&self, ctx: &Context) -> CarrierResult<ServiceStatus> {
        Ok(instance_status(&self.instance(ctx).await?).0)
    }

    pub fn details(&self) -> Details {
        BTreeMap::from([
            ("Class".to_string(), self.class.clone()),
            ("Plan".to_string(), self.plan.clone()),
        ])
    }

    /// Block until the broker reports the instance provisioned
    pub async fn wait_for_provision(&self, ctx: &Context) -> CarrierResult<()> {
        let policy = ctx.config.timeouts.provision_policy();
        let result = poll_until(&policy, move || async move {
            match instance_status(&self.instance(ctx).await?) {
                (ServiceStatus::Provisioned, _) => Ok(Some(())),
                (ServiceStatus::Failed, message) => Err(CarrierError::ProvisionFailed {
                    service: self.name.clone(),
                    message: message.unwrap_or_default(),
                }),
                (ServiceStatus::Provisioning, _) => Ok(None),
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Probe(e)) => Err(e),
            Err(PollError::Timeout(after)) => Err(CarrierError::Timeout {
                what: format!("service '{}' to be provisioned", self.name),
                after,
            }),
        }
    }

    /// Bind the instance for `app` and return the credentials secret
    pub async fn binding_secret(&self, ctx: &Context, app: &str) -> CarrierResult<Secret> {
        let binding_name = binding_resource_name(&self.org, &self.name, app);

        let mut binding =
            DynamicObject::new(&binding_name, &service_binding_resource()).within(&self.org);
        binding.data = json!({
            "spec": {
                "instanceRef": { "name": self.instance_name },
                "secretName": binding_name,
            }
        });

        match ctx
            .cluster
            .create_dynamic(&service_binding_resource(), Some(&self.org), &binding)
            .await
        {
            Ok(()) => info!("Service binding {} created", binding_name),
            Err(ClusterError::Conflict { .. }) => debug!("Service binding {} exists", binding_name),
            Err(e) => return Err(e.into()),
        }

        let policy = ctx.config.timeouts.binding_policy();
        let secret_name = binding_name.as_str();
        let result = poll_until(&policy, move || async move {
            match ctx.cluster.get_secret(&self.org, secret_name).await {
                Ok(secret) => Ok(Some(secret)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await;

        match result {
            Ok(secret) => Ok(secret),
            Err(PollError::Probe(e)) => Err(e.into()),
            Err(PollError::Timeout(after)) => Err(CarrierError::Timeout {
                what: format!("binding secret {}", binding_name),
                after,
            }),
        }
    }

    /// Remove the binding object and its secret
    pub async fn delete_binding(&self, ctx: &Context, app: &str) -> CarrierResult<()> {
        let binding_name = binding_resource_name(&self.org, &self.name, app);
        ignore_not_found(
            ctx.cluster
                .delete_dynamic(&service_binding_resource(), Some(&self.org), &binding_name)
                .await,
        )?;
        ignore_not_found(ctx.cluster.delete_secret(&self.org, &binding_name).await)?;
        Ok(())
    }

    pub async fn delete(&self, ctx: &Context) -> CarrierResult<()> {
        ctx.cluster
            .delete_dynamic(&service_instance_resource(), Some(&self.org), &self.instance_name)
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => CarrierError::ServiceNotFound(self.name.clone()),
                e => e.into(),
            })
    }
}
