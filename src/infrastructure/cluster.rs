//! Cluster capability interface
//!
//! Everything the orchestration layer does to the cluster goes through
//! `ClusterApi`. The kube-backed implementation lives in `crate::k8s`, an
//! in-memory one in `super::memory`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, ServiceAccount};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};

use crate::error::ClusterResult;
use crate::infrastructure::pipeline::PipelineRun;

/// Lines of a pod's log, as they arrive
pub type LogStream = BoxStream<'static, ClusterResult<String>>;

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_namespaces(&self, selector: &str) -> ClusterResult<Vec<Namespace>>;
    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<()>;
    /// Deletes the namespace and everything in it
    async fn delete_namespace(&self, name: &str) -> ClusterResult<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> ClusterResult<Secret>;
    async fn list_secrets(&self, namespace: &str, selector: &str) -> ClusterResult<Vec<Secret>>;
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> ClusterResult<()>;
    async fn delete_secret(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> ClusterResult<()>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> ClusterResult<Deployment>;
    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &str,
    ) -> ClusterResult<Vec<Deployment>>;
    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> ClusterResult<Deployment>;
    async fn delete_deployment(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    /// Deletes the application's Service object
    async fn delete_service(&self, namespace: &str, name: &str) -> ClusterResult<()>;
    async fn delete_ingress(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    async fn list_pods(&self, namespace: &str, selector: &str) -> ClusterResult<Vec<Pod>>;
    async fn pod_logs(&self, namespace: &str, pod: &str, follow: bool) -> ClusterResult<LogStream>;

    async fn list_pipeline_runs(
        &self,
        namespace: &str,
        selector: &str,
    ) -> ClusterResult<Vec<PipelineRun>>;
    async fn create_pipeline_run(&self, namespace: &str, run: &PipelineRun) -> ClusterResult<()>;
    async fn delete_pipeline_run(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    async fn get_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<DynamicObject>;
    async fn list_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &str,
    ) -> ClusterResult<Vec<DynamicObject>>;
    async fn create_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> ClusterResult<()>;
    async fn delete_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<()>;
}

/// cert-manager certificates
pub fn certificate_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("cert-manager.io", "v1", "Certificate"),
        "certificates",
    )
}

pub fn service_instance_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("servicecatalog.k8s.io", "v1beta1", "ServiceInstance"),
        "serviceinstances",
    )
}

pub fn service_binding_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("servicecatalog.k8s.io", "v1beta1", "ServiceBinding"),
        "servicebindings",
    )
}

pub fn service_class_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("servicecatalog.k8s.io", "v1beta1", "ClusterServiceClass"),
        "clusterserviceclasses",
    )
}

pub fn service_plan_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("servicecatalog.k8s.io", "v1beta1", "ClusterServicePlan"),
        "clusterserviceplans",
    )
}

/// Parse a `k=v,k2=v2` selector into pairs. Empty input selects everything.
pub fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|term| {
            term.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// True when every selector pair is present in `labels`
pub fn selector_matches(
    selector: &str,
    labels: Option<&std::collections::BTreeMap<String, String>>,
) -> bool {
    parse_selector(selector).iter().all(|(k, v)| {
        labels
            .and_then(|l| l.get(k))
            .map(|actual| actual == v)
            .unwrap_or(false)
    })
}
