//! Service lifecycle: listing, inspection and creation
//!
//! Deletion goes through `bindings::delete_service` because it has to
//! consider the applications a service is bound to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{bindings, organizations};
use crate::backing::{
    self, validate_service_name, BackingService, CatalogService, CustomService, Details,
};
use crate::context::Context;
use crate::error::{CarrierError, CarrierResult};

/// One row of the service index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    #[serde(rename = "boundapps")]
    pub bound_apps: Vec<String>,
}

/// Parameters of a catalog service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default, rename = "waitforprovision")]
    pub wait_for_provision: bool,
}

/// Every service of the organization with the applications bound to it
pub async fn index(ctx: &Context, org: &str) -> CarrierResult<Vec<ServiceEntry>> {
    organizations::ensure_exists(ctx, org).await?;

    let services = backing::list(ctx, org).await?;
    let mut bound = bindings::services_to_apps(ctx, org).await?;

    Ok(services
        .iter()
        .map(|service| ServiceEntry {
            name: service.name().to_string(),
            bound_apps: bound.remove(service.name()).unwrap_or_default(),
        })
        .collect())
}

/// Status and details of one service
pub async fn show(ctx: &Context, org: &str, name: &str) -> CarrierResult<Details> {
    organizations::ensure_exists(ctx, org).await?;

    let service = backing::lookup(ctx, org, name).await?;
    let mut details = service.details(ctx).await?;
    details.insert("Status".to_string(), service.status(ctx).await?.to_string());
    Ok(details)
}

async fn ensure_unused(ctx: &Context, org: &str, name: &str) -> CarrierResult<()> {
    match backing::lookup(ctx, org, name).await {
        Ok(_) => Err(CarrierError::AlreadyExists(name.to_string())),
        Err(CarrierError::ServiceNotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

pub async fn create_custom(
    ctx: &Context,
    org: &str,
    name: &str,
    data: &BTreeMap<String, String>,
) -> CarrierResult<BackingService> {
    if name.is_empty() {
        return Err(CarrierError::bad_request(
            "Cannot create custom service without a name",
        ));
    }
    if data.is_empty() {
        return Err(CarrierError::bad_request(
            "Cannot create custom service without data",
        ));
    }
    validate_service_name(name)?;

    organizations::ensure_exists(ctx, org).await?;
    ensure_unused(ctx, org, name).await?;

    let service = CustomService::create(ctx, org, name, data).await?;
    Ok(BackingService::Custom(service))
}

pub async fn create_catalog(
    ctx: &Context,
    org: &str,
    request: &CatalogRequest,
) -> CarrierResult<BackingService> {
    if request.name.is_empty() {
        return Err(CarrierError::bad_request("Cannot create service without a name"));
    }
    if request.class.is_empty() {
        return Err(CarrierError::bad_request("Cannot create service without a class"));
    }
    if request.plan.is_empty() {
        return Err(CarrierError::bad_request("Cannot create service without a plan"));
    }
    validate_service_name(&request.name)?;

    organizations::ensure_exists(ctx, org).await?;
    ensure_unused(ctx, org, &request.name).await?;

    let service = BackingService::Catalog(
        CatalogService::create(
            ctx,
            org,
            &request.name,
            &request.class,
            &request.plan,
            &request.data,
        )
        .await?,
    );

    if request.wait_for_provision {
        info!("Waiting for service {} to be provisioned", request.name);
        service.wait_for_provision(ctx).await?;
    }
    Ok(service)
}
