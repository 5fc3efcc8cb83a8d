//! Application registry
//!
//! Applications are the Deployments staging creates in an organization.
//! Service bindings live on the deployment itself: one secret volume per
//! service, mounted read-only under `/services/<service>`.

use anyhow::Context as _;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{SecretVolumeSource, Volume, VolumeMount};
use tracing::{debug, info, warn};

use crate::backing::{self, BackingService};
use crate::context::Context;
use crate::domain::app::{
    service_mount_path, status_string, AppRef, Application, APPLICATION_COMPONENT,
    COMPONENT_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE, NAME_LABEL, PART_OF_LABEL,
    REVISION_ANNOTATION, ROUTE_ANNOTATION, SERVICE_MOUNT_ROOT,
};
use crate::error::{CarrierError, CarrierResult, ClusterResult};
use crate::infrastructure::certificates::delete_certificate;
use crate::k8s::{pod_statuses, PodStatus};

fn app_selector(org: &str) -> String {
    format!(
        "{}={},{}={},{}={}",
        COMPONENT_LABEL, APPLICATION_COMPONENT, MANAGED_BY_LABEL, MANAGED_BY_VALUE, PART_OF_LABEL, org
    )
}

/// Selector of an application's workload pods
pub fn workload_selector(app: &AppRef) -> String {
    format!("{}={}", NAME_LABEL, app.name)
}

/// Names of the services mounted into the application container
pub fn bound_services(deployment: &Deployment) -> Vec<String> {
    let prefix = format!("{}/", SERVICE_MOUNT_ROOT);
    let mut names: Vec<String> = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|pod| pod.containers.first())
        .and_then(|c| c.volume_mounts.as_ref())
        .map(|mounts| {
            mounts
                .iter()
                .filter_map(|m| m.mount_path.strip_prefix(&prefix))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Add the volume and mount for `service`, backed by `secret_name`
pub fn add_binding(deployment: &mut Deployment, service: &str, secret_name: &str) -> CarrierResult<()> {
    let pod = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .ok_or_else(|| CarrierError::internal("deployment has no pod template"))?;

    pod.volumes.get_or_insert_with(Vec::new).push(Volume {
        name: service.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    });

    let container = pod
        .containers
        .first_mut()
        .ok_or_else(|| CarrierError::internal("deployment has no containers"))?;
    container
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: service.to_string(),
            mount_path: service_mount_path(service),
            read_only: Some(true),
            ..Default::default()
        });
    Ok(())
}

/// Drop the volume and mount of `service`
pub fn remove_binding(deployment: &mut Deployment, service: &str) {
    let Some(pod) = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
    else {
        return;
    };

    if let Some(volumes) = pod.volumes.as_mut() {
        volumes.retain(|v| v.name != service);
    }
    let mount_path = service_mount_path(service);
    for container in pod.containers.iter_mut() {
        if let Some(mounts) = container.volume_mounts.as_mut() {
            mounts.retain(|m| m.mount_path != mount_path);
        }
    }
}

fn to_application(org: &str, deployment: &Deployment) -> Application {
    let meta = &deployment.metadata;
    let name = meta
        .labels
        .as_ref()
        .and_then(|l| l.get(NAME_LABEL))
        .or(meta.name.as_ref())
        .cloned()
        .unwrap_or_default();
    let annotation = |key: &str| meta.annotations.as_ref().and_then(|a| a.get(key)).cloned();

    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);

    Application {
        name,
        org: org.to_string(),
        desired_instances: desired,
        ready_instances: ready,
        route: annotation(ROUTE_ANNOTATION),
        revision: annotation(REVISION_ANNOTATION),
        bound_services: bound_services(deployment),
        status: status_string(ready, desired),
    }
}

/// All applications of an organization, sorted by name
pub async fn list(ctx: &Context, org: &str) -> CarrierResult<Vec<Application>> {
    let deployments = ctx.cluster.list_deployments(org, &app_selector(org)).await?;
    let mut apps: Vec<Application> = deployments
        .iter()
        .map(|d| to_application(org, d))
        .collect();
    apps.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(apps)
}

async fn find_deployment(ctx: &Context, app: &AppRef) -> ClusterResult<Option<Deployment>> {
    match ctx.cluster.get_deployment(&app.org, &app.name).await {
        Ok(deployment) => Ok(Some(deployment)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

async fn deployment(ctx: &Context, app: &AppRef) -> CarrierResult<Deployment> {
    find_deployment(ctx, app)
        .await?
        .ok_or_else(|| CarrierError::AppNotFound(app.name.clone()))
}

/// `None` when the application does not exist
pub async fn lookup(ctx: &Context, org: &str, name: &str) -> CarrierResult<Option<Application>> {
    let app = AppRef::new(org, name);
    Ok(find_deployment(ctx, &app)
        .await?
        .map(|d| to_application(org, &d)))
}

pub async fn get(ctx: &Context, org: &str, name: &str) -> CarrierResult<Application> {
    lookup(ctx, org, name)
        .await?
        .ok_or_else(|| CarrierError::AppNotFound(name.to_string()))
}

/// Mount `service` into the application
pub async fn bind(ctx: &Context, app: &AppRef, service: &BackingService) -> CarrierResult<()> {
    let mut deployment = deployment(ctx, app).await?;
    if bound_services(&deployment).iter().any(|s| s == service.name()) {
        return Err(CarrierError::AlreadyBound(service.name().to_string()));
    }

    let secret = service.get_binding(ctx, &app.name).await?;
    let secret_name = secret
        .metadata
        .name
        .ok_or_else(|| CarrierError::internal("binding secret has no name"))?;

    add_binding(&mut deployment, service.name(), &secret_name)?;
    ctx.cluster.replace_deployment(&app.org, &deployment).await?;

    info!("Service {} bound to {}", service.name(), app);
    Ok(())
}

/// Remove the mount of `service` and release its binding resources
pub async fn unbind(ctx: &Context, app: &AppRef, service: &BackingService) -> CarrierResult<()> {
    let mut deployment = deployment(ctx, app).await?;
    if !bound_services(&deployment).iter().any(|s| s == service.name()) {
        return Err(CarrierError::NotBound(service.name().to_string()));
    }

    remove_binding(&mut deployment, service.name());
    ctx.cluster.replace_deployment(&app.org, &deployment).await?;
    service.delete_binding(ctx, &app.name).await?;

    info!("Service {} unbound from {}", service.name(), app);
    Ok(())
}

/// Change the desired number of instances
pub async fn scale(ctx: &Context, app: &AppRef, instances: i32) -> CarrierResult<Application> {
    if instances < 0 {
        return Err(CarrierError::bad_request(
            "instances param should be integer equal or greater than zero",
        ));
    }

    let mut deployment = deployment(ctx, app).await?;
    deployment
        .spec
        .as_mut()
        .ok_or_else(|| CarrierError::internal("deployment has no spec"))?
        .replicas = Some(instances);
    let updated = ctx.cluster.replace_deployment(&app.org, &deployment).await?;

    info!("Application {} scaled to {} instances", app, instances);
    Ok(to_application(&app.org, &updated))
}

fn ignore_not_found(result: ClusterResult<()>) -> ClusterResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Delete an application with its routing, certificate, staging runs and
/// repository. Returns the services it was bound to.
pub async fn delete(ctx: &Context, app: &AppRef) -> CarrierResult<Vec<String>> {
    let deployment = deployment(ctx, app).await?;
    let bound = bound_services(&deployment);

    for name in &bound {
        match backing::lookup(ctx, &app.org, name).await {
            Ok(service) => service.delete_binding(ctx, &app.name).await?,
            Err(CarrierError::ServiceNotFound(_)) => {
                warn!("Bound service {} of {} no longer exists", name, app)
            }
            Err(e) => return Err(e),
        }
    }

    ignore_not_found(ctx.cluster.delete_deployment(&app.org, &app.name).await)
        .context("deleting deployment")?;
    ignore_not_found(ctx.cluster.delete_service(&app.org, &app.name).await)
        .context("deleting service")?;
    ignore_not_found(ctx.cluster.delete_ingress(&app.org, &app.name).await)
        .context("deleting ingress")?;
    delete_certificate(ctx.cluster.as_ref(), &app.org, &app.name)
        .await
        .context("deleting certificate")?;

    let staging = ctx.staging_namespace();
    for run in ctx.cluster.list_pipeline_runs(staging, &app.selector()).await? {
        if let Some(name) = run.metadata.name.as_deref() {
            ignore_not_found(ctx.cluster.delete_pipeline_run(staging, name).await)?;
            debug!("Removed staging run {}", name);
        }
    }

    ctx.repository
        .delete_repo(&app.org, &app.name)
        .await
        .context("deleting repository")?;

    info!("Application {} deleted", app);
    Ok(bound)
}

/// Pods of an application with their readiness
pub async fn pods(ctx: &Context, app: &AppRef) -> CarrierResult<Vec<PodStatus>> {
    let pods = ctx
        .cluster
        .list_pods(&app.org, &workload_selector(app))
        .await?;
    Ok(pod_statuses(&pods))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backing::CustomService;
    use crate::context::testing::{test_context, TestContext};
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    pub(crate) fn sample_deployment(org: &str, name: &str, replicas: i32) -> Deployment {
        let labels = BTreeMap::from([
            (NAME_LABEL.to_string(), name.to_string()),
            (PART_OF_LABEL.to_string(), org.to_string()),
            (COMPONENT_LABEL.to_string(), APPLICATION_COMPONENT.to_string()),
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        ]);
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(org.to_string()),
                labels: Some(labels),
                annotations: Some(BTreeMap::from([(
                    ROUTE_ANNOTATION.to_string(),
                    format!("{}.127.0.0.1.nip.io", name),
                )])),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: name.to_string(),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: Some(replicas),
                ..Default::default()
            }),
        }
    }

    pub(crate) fn with_app(t: &TestContext, org: &str, name: &str) {
        t.cluster
            .insert_deployment(org, sample_deployment(org, name, 1));
    }

    pub(crate) async fn custom_service(t: &TestContext, org: &str, name: &str) -> BackingService {
        BackingService::Custom(
            CustomService::create(
                &t.ctx,
                org,
                name,
                &BTreeMap::from([("user".to_string(), "admin".to_string())]),
            )
            .await
            .unwrap(),
        )
    }

    #[test]
    fn test_binding_edits() {
        let mut deployment = sample_deployment("workspace", "web", 1);
        add_binding(&mut deployment, "db", "service-org-workspace-svc-db").unwrap();
        add_binding(&mut deployment, "cache", "service-org-workspace-svc-cache").unwrap();
        assert_eq!(bound_services(&deployment), vec!["cache", "db"]);

        remove_binding(&mut deployment, "db");
        assert_eq!(bound_services(&deployment), vec!["cache"]);
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.volumes.unwrap().len(), 1);
        let mount = &pod.containers[0].volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.mount_path, "/services/cache");
        assert_eq!(mount.read_only, Some(true));
    }

    #[tokio::test]
    async fn test_list_and_lookup() {
        let t = test_context().with_org("workspace");
        with_app(&t, "workspace", "web");
        with_app(&t, "workspace", "api");

        let apps = list(&t.ctx, "workspace").await.unwrap();
        let names: Vec<&str> = apps.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["api", "web"]);
        assert_eq!(apps[1].status, "1/1");
        assert_eq!(apps[1].route.as_deref(), Some("web.127.0.0.1.nip.io"));

        assert!(lookup(&t.ctx, "workspace", "db").await.unwrap().is_none());
        assert!(matches!(
            get(&t.ctx, "workspace", "db").await,
            Err(CarrierError::AppNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_double_bind_is_already_bound() {
        let t = test_context().with_org("workspace");
        with_app(&t, "workspace", "web");
        let service = custom_service(&t, "workspace", "db").await;
        let app = AppRef::new("workspace", "web");

        bind(&t.ctx, &app, &service).await.unwrap();
        let err = bind(&t.ctx, &app, &service).await.unwrap_err();
        assert!(matches!(err, CarrierError::AlreadyBound(_)));

        let deployment = t.cluster.deployment("workspace", "web").unwrap();
        assert_eq!(bound_services(&deployment), vec!["db"]);
        let volumes = deployment.spec.unwrap().template.spec.unwrap().volumes.unwrap();
        assert_eq!(volumes.len(), 1);
    }

    #[tokio::test]
    async fn test_unbind_not_bound_leaves_state() {
        let t = test_context().with_org("workspace");
        with_app(&t, "workspace", "web");
        let service = custom_service(&t, "workspace", "db").await;
        let app = AppRef::new("workspace", "web");
        let before = t.cluster.deployment("workspace", "web");

        let err = unbind(&t.ctx, &app, &service).await.unwrap_err();
        assert!(matches!(err, CarrierError::NotBound(_)));
        assert_eq!(t.cluster.deployment("workspace", "web"), before);
    }

    #[tokio::test]
    async fn test_scale() {
        let t = test_context().with_org("workspace");
        with_app(&t, "workspace", "web");
        let app = AppRef::new("workspace", "web");

        let scaled = scale(&t.ctx, &app, 3).await.unwrap();
        assert_eq!(scaled.desired_instances, 3);
        assert!(matches!(
            scale(&t.ctx, &app, -1).await,
            Err(CarrierError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_returns_bound_services() {
        let t = test_context().with_org("workspace");
        with_app(&t, "workspace", "web");
        let service = custom_service(&t, "workspace", "db").await;
        let app = AppRef::new("workspace", "web");
        bind(&t.ctx, &app, &service).await.unwrap();

        let unbound = delete(&t.ctx, &app).await.unwrap();
        assert_eq!(unbound, vec!["db"]);
        assert!(t.cluster.deployment("workspace", "web").is_none());
        // custom service secrets outlive their bindings
        assert!(t
            .cluster
            .secret("workspace", "service-org-workspace-svc-db")
            .is_some());

        assert!(matches!(
            delete(&t.ctx, &app).await,
            Err(CarrierError::AppNotFound(_))
        ));
    }
}
