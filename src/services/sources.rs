//! Source preparation
//!
//! Application sources are copied into a scratch directory, given the
//! Kubernetes manifests staging applies (`.kube/app.yml`, `service.yml`,
//! `ingress.yml`) and pushed to the application's repository.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context as _, Result};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use serde::Serialize;
use tempfile::TempDir;
use tracing::debug;

use crate::config::KubernetesConfig;
use crate::context::Context;
use crate::domain::app::{
    AppRef, GitRef, APPLICATION_COMPONENT, COMPONENT_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
    NAME_LABEL, PART_OF_LABEL, ROUTE_ANNOTATION,
};
use crate::error::CarrierResult;
use crate::infrastructure::certificates::tls_secret_name;
use crate::infrastructure::GitClient;

/// Port every application listens on
pub const APP_PORT: i32 = 8080;

const MANIFEST_DIR: &str = ".kube";

fn app_labels(app: &AppRef) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), app.name.clone()),
        (PART_OF_LABEL.to_string(), app.org.clone()),
        (COMPONENT_LABEL.to_string(), APPLICATION_COMPONENT.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}

fn routing_annotations() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "traefik.ingress.kubernetes.io/router.entrypoints".to_string(),
            "websecure".to_string(),
        ),
        (
            "traefik.ingress.kubernetes.io/router.tls".to_string(),
            "true".to_string(),
        ),
    ])
}

fn routed_meta(app: &AppRef) -> ObjectMeta {
    let mut labels = app_labels(app);
    labels.insert("kubernetes.io/ingress.class".to_string(), "traefik".to_string());
    ObjectMeta {
        name: Some(app.name.clone()),
        namespace: Some(app.org.clone()),
        labels: Some(labels),
        annotations: Some(routing_annotations()),
        ..Default::default()
    }
}

pub fn deployment_manifest(app: &AppRef, route: &str, config: &KubernetesConfig) -> Deployment {
    let selector = BTreeMap::from([(NAME_LABEL.to_string(), app.name.clone())]);

    Deployment {
        metadata: ObjectMeta {
            name: Some(app.name.clone()),
            namespace: Some(app.org.clone()),
            labels: Some(app_labels(app)),
            annotations: Some(BTreeMap::from([(
                ROUTE_ANNOTATION.to_string(),
                route.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels(app)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(app.org.clone()),
                    automount_service_account_token: Some(false),
                    containers: vec![Container {
                        name: app.name.clone(),
                        image: Some(format!(
                            "{}/{}-{}",
                            config.deployment_registry, app.org, app.name
                        )),
                        ports: Some(vec![ContainerPort {
                            container_port: APP_PORT,
                            ..Default::default()
                        }]),
                        env: Some(vec![EnvVar {
                            name: "PORT".to_string(),
                            value: Some(APP_PORT.to_string()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub fn service_manifest(app: &AppRef) -> Service {
    Service {
        metadata: routed_meta(app),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                port: APP_PORT,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(APP_PORT)),
                ..Default::default()
            }]),
            selector: Some(BTreeMap::from([(NAME_LABEL.to_string(), app.name.clone())])),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn ingress_manifest(app: &AppRef, route: &str) -> Ingress {
    Ingress {
        metadata: routed_meta(app),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(route.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "ImplementationSpecific".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: app.name.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(APP_PORT),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            tls: Some(vec![IngressTLS {
                hosts: Some(vec![route.to_string()]),
                secret_name: Some(tls_secret_name(&app.name)),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

fn write_manifest<T: Serialize>(dir: &Path, file: &str, manifest: &T) -> Result<()> {
    let path = dir.join(file);
    let yaml = serde_yaml::to_string(manifest)
        .with_context(|| format!("Failed to render {}", file))?;
    std::fs::write(&path, yaml).with_context(|| format!("Failed to write {}", path.display()))
}

/// Copy `from` into `to`, leaving out any `.git` directory
pub fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(from)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
    {
        let entry = entry.with_context(|| format!("Failed to read {}", from.display()))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .with_context(|| format!("Unexpected path {}", entry.path().display()))?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create directory: {}", target.display()))?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Copy the sources at `source` to a scratch directory and add manifests.
///
/// The directory is removed when the returned handle is dropped.
pub fn prepare(source: &Path, app: &AppRef, route: &str, config: &KubernetesConfig) -> Result<TempDir> {
    if !source.is_dir() {
        anyhow::bail!("Application sources not found: {}", source.display());
    }

    let dir = tempfile::Builder::new()
        .prefix("carrier-app")
        .tempdir()
        .context("Failed to create temp directory")?;

    copy_tree(source, dir.path()).context("Failed to copy app sources to temp location")?;

    let manifests = dir.path().join(MANIFEST_DIR);
    std::fs::create_dir_all(&manifests)
        .context("Failed to set up kube resources directory in temp app location")?;

    write_manifest(&manifests, "app.yml", &deployment_manifest(app, route, config))?;
    write_manifest(&manifests, "service.yml", &service_manifest(app))?;
    write_manifest(&manifests, "ingress.yml", &ingress_manifest(app, route))?;

    debug!("Prepared sources of {} in {}", app, dir.path().display());
    Ok(dir)
}

/// Extract a zip archive of application sources into `dest`
pub fn unpack_zip(data: &[u8], dest: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data))
        .context("Failed to read uploaded sources as zip archive")?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .with_context(|| format!("Failed to read zip entry {}", i))?;

        // Entries escaping the destination are skipped
        let Some(outpath) = file.enclosed_name().map(|p| dest.join(p)) else {
            continue;
        };

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)
                .with_context(|| format!("Failed to create directory: {}", outpath.display()))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read zip entry: {}", file.name()))?;
        std::fs::File::create(&outpath)
            .and_then(|mut out| out.write_all(&buffer))
            .with_context(|| format!("Failed to write file: {}", outpath.display()))?;
    }
    Ok(())
}

/// Push a prepared directory to the application's repository
pub async fn push(ctx: &Context, app: &AppRef, dir: &Path) -> CarrierResult<GitRef> {
    let remote = ctx.repository.push_url(&app.org, &app.name)?;
    let revision = GitClient::in_dir(dir).push_sources(&remote).await?;
    Ok(GitRef {
        revision,
        url: ctx.repository.repo_url(&app.org, &app.name),
    })
}
