//! Binding coordinator
//!
//! Batch binds report per-service problems together while still applying
//! everything that can be applied. Infrastructure failures abort the batch
//! and are reported first.

use std::collections::BTreeMap;

use tracing::info;

use super::{applications, organizations};
use crate::backing::{self, validate_service_name, BackingService};
use crate::context::Context;
use crate::domain::app::AppRef;
use crate::error::{CarrierError, CarrierResult, Issues};

/// Bind the named services to an application.
///
/// Unknown and already bound services are collected as issues; the rest
/// are bound. Returns every issue, or `Ok` when there were none.
pub async fn bind(ctx: &Context, org: &str, app: &str, names: &[String]) -> Result<(), Issues> {
    if names.is_empty() {
        return Err(CarrierError::bad_request("Cannot bind service without names").into());
    }
    if names.iter().any(|n| n.is_empty()) {
        return Err(CarrierError::bad_request("Cannot bind service with empty name").into());
    }
    for name in names {
        validate_service_name(name)?;
    }

    organizations::ensure_exists(ctx, org).await?;
    applications::get(ctx, org, app).await?;

    let app = AppRef::new(org, app);
    let mut issues = Issues::new();
    let mut services = Vec::new();

    for name in names {
        match backing::lookup(ctx, org, name).await {
            Ok(service) => services.push(service),
            Err(e @ CarrierError::ServiceNotFound(_)) => issues.push(e),
            Err(e) => return Err(issues.abort_with(e)),
        }
    }

    for service in &services {
        match applications::bind(ctx, &app, service).await {
            Ok(()) => {}
            Err(e @ CarrierError::AlreadyBound(_)) => issues.push(e),
            Err(e) => return Err(issues.abort_with(e)),
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

/// Unbind one service from an application
pub async fn unbind(ctx: &Context, org: &str, app: &str, service: &str) -> CarrierResult<()> {
    validate_service_name(service)?;
    organizations::ensure_exists(ctx, org).await?;
    applications::get(ctx, org, app).await?;
    let service = backing::lookup(ctx, org, service).await?;
    applications::unbind(ctx, &AppRef::new(org, app), &service).await
}

/// Applications each service of the organization is bound to.
///
/// Computed by scanning every application; services without bindings are
/// absent from the map.
pub async fn services_to_apps(
    ctx: &Context,
    org: &str,
) -> CarrierResult<BTreeMap<String, Vec<String>>> {
    let mut index: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for app in applications::list(ctx, org).await? {
        for service in &app.bound_services {
            index
                .entry(service.clone())
                .or_default()
                .push(app.name.clone());
        }
    }
    Ok(index)
}

/// Delete a service.
///
/// With bound applications the delete is refused unless `unbind` is set,
/// in which case the service is unbound from each of them first. Returns
/// the applications that were bound.
pub async fn delete_service(
    ctx: &Context,
    org: &str,
    service: &str,
    unbind: bool,
) -> CarrierResult<Vec<String>> {
    validate_service_name(service)?;
    organizations::ensure_exists(ctx, org).await?;
    let service: BackingService = backing::lookup(ctx, org, service).await?;

    let bound_apps = services_to_apps(ctx, org)
        .await?
        .remove(service.name())
        .unwrap_or_default();

    if !bound_apps.is_empty() {
        if !unbind {
            return Err(CarrierError::BoundApplicationsExist {
                service: service.name().to_string(),
                apps: bound_apps,
            });
        }
        for app in &bound_apps {
            applications::unbind(ctx, &AppRef::new(org, app), &service).await?;
        }
    }

    service.delete(ctx).await?;
    info!("Service {} deleted from {}", service.name(), org);
    Ok(bound_apps)
}
