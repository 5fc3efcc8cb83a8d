//! Service catalog browsing
//!
//! Classes and plans are cluster-scoped catalog objects. Users refer to both
//! by their external names; plans point at their class by object name.

use kube::api::DynamicObject;
use serde::Serialize;

use crate::context::Context;
use crate::error::{CarrierError, CarrierResult};
use crate::infrastructure::cluster::{service_class_resource, service_plan_resource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceClass {
    /// External name users pass on the command line
    pub name: String,
    /// Object name plans refer to
    pub id: String,
    pub description: String,
    pub broker: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServicePlan {
    pub name: String,
    pub id: String,
    pub description: String,
    pub free: bool,
    #[serde(skip)]
    pub class_id: String,
}

fn spec_str(object: &DynamicObject, field: &str) -> String {
    object.data["spec"][field]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

impl ServiceClass {
    fn from_object(object: &DynamicObject) -> Self {
        Self {
            name: spec_str(object, "externalName"),
            id: object.metadata.name.clone().unwrap_or_default(),
            description: spec_str(object, "description"),
            broker: spec_str(object, "clusterServiceBrokerName"),
        }
    }
}

impl ServicePlan {
    fn from_object(object: &DynamicObject) -> Self {
        Self {
            name: spec_str(object, "externalName"),
            id: object.metadata.name.clone().unwrap_or_default(),
            description: spec_str(object, "description"),
            free: object.data["spec"]["free"].as_bool().unwrap_or(false),
            class_id: object.data["spec"]["clusterServiceClassRef"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        }
    }
}

pub async fn list_classes(ctx: &Context) -> CarrierResult<Vec<ServiceClass>> {
    let objects = ctx
        .cluster
        .list_dynamic(&service_class_resource(), None, "")
        .await?;
    let mut classes: Vec<ServiceClass> = objects.iter().map(ServiceClass::from_object).collect();
    classes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(classes)
}

pub async fn find_class(ctx: &Context, name: &str) -> CarrierResult<Option<ServiceClass>> {
    Ok(list_classes(ctx).await?.into_iter().find(|c| c.name == name))
}

/// Plans of the class with external name `class`
pub async fn list_plans(ctx: &Context, class: &str) -> CarrierResult<Vec<ServicePlan>> {
    let class = find_class(ctx, class)
        .await?
        .ok_or_else(|| CarrierError::NotFound(format!("Service class '{}' does not exist", class)))?;
    plans_of(ctx, &class).await
}

async fn plans_of(ctx: &Context, class: &ServiceClass) -> CarrierResult<Vec<ServicePlan>> {
    let objects = ctx
        .cluster
        .list_dynamic(&service_plan_resource(), None, "")
        .await?;
    let mut plans: Vec<ServicePlan> = objects
        .iter()
        .map(ServicePlan::from_object)
        .filter(|p| p.class_id == class.id)
        .collect();
    plans.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(plans)
}

pub async fn find_plan(
    ctx: &Context,
    class: &ServiceClass,
    plan: &str,
) -> CarrierResult<Option<ServicePlan>> {
    Ok(plans_of(ctx, class).await?.into_iter().find(|p| p.name == plan))
}
