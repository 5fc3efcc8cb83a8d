//! Kubernetes-backed `ClusterApi`
//!
//! Thin mapping from the capability trait onto typed `kube::Api` handles.
//! API errors are folded into `ClusterError` so callers can tell NotFound
//! and Conflict apart from everything else.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{AsyncBufReadExt, StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::chrono::{DateTime, Utc};
use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, LogParams, PostParams},
    Client, Config,
};
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};
use crate::infrastructure::cluster::{ClusterApi, LogStream};
use crate::infrastructure::pipeline::PipelineRun;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStateInfo {
    pub state: String, // "running", "waiting", "terminated"
    pub reason: Option<String>,
    pub message: Option<String>,
    pub restart_count: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodStatus {
    pub name: String,
    pub phase: String,
    pub ready: bool,
    pub container_state: Option<ContainerStateInfo>,
    pub creation_time: Option<DateTime<Utc>>,
}

/// Create Kubernetes client
pub async fn create_client() -> Result<Client> {
    let config = Config::infer()
        .await
        .context("Failed to infer kubeconfig")?;

    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// Summarize pods for display and readiness checks, sorted by name
pub fn pod_statuses(pods: &[Pod]) -> Vec<PodStatus> {
    let mut statuses: Vec<PodStatus> = pods
        .iter()
        .map(|pod| {
            let name = pod
                .metadata
                .name
                .clone()
                .unwrap_or_else(|| "unknown".to_string());

            let phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Unknown".to_string());

            let creation_time = pod.metadata.creation_timestamp.as_ref().map(|t| t.0);

            let first_container = pod
                .status
                .as_ref()
                .and_then(|s| s.container_statuses.as_ref())
                .and_then(|cs| cs.first());

            let ready = first_container.map(|c| c.ready).unwrap_or(false);

            let container_state = first_container.map(|c| {
                let state = c.state.as_ref();
                let (state, reason, message) =
                    if let Some(waiting) = state.and_then(|s| s.waiting.as_ref()) {
                        ("waiting", waiting.reason.clone(), waiting.message.clone())
                    } else if state.and_then(|s| s.running.as_ref()).is_some() {
                        ("running", None, None)
                    } else if let Some(terminated) = state.and_then(|s| s.terminated.as_ref()) {
                        ("terminated", terminated.reason.clone(), terminated.message.clone())
                    } else {
                        ("unknown", None, None)
                    };
                ContainerStateInfo {
                    state: state.to_string(),
                    reason,
                    message,
                    restart_count: c.restart_count,
                }
            });

            PodStatus {
                name,
                phase,
                ready,
                container_state,
                creation_time,
            }
        })
        .collect();

    statuses.sort_by(|a, b| a.name.cmp(&b.name));
    statuses
}

/// Check if a pod is in a bad state
pub fn is_bad_state(pod: &PodStatus) -> bool {
    pod.container_state
        .as_ref()
        .and_then(|state| state.reason.as_deref())
        .map(|reason| {
            matches!(
                reason,
                "CrashLoopBackOff"
                    | "ImagePullBackOff"
                    | "ErrImagePull"
                    | "CreateContainerConfigError"
                    | "InvalidImageName"
                    | "CreateContainerError"
                    | "RunContainerError"
            )
        })
        .unwrap_or(false)
}

/// Every pod is running with a ready container
pub fn all_ready(pods: &[PodStatus]) -> bool {
    !pods.is_empty() && pods.iter().all(|p| p.phase == "Running" && p.ready)
}

fn map_err(kind: &str, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) if response.code == 404 => ClusterError::not_found(kind, name),
        kube::Error::Api(response) if response.code == 409 => ClusterError::conflict(kind, name),
        other => ClusterError::Api(format!("{} {}: {}", kind, name, other)),
    }
}

fn list_params(selector: &str) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(selector)
    }
}

fn object_name<K: kube::Resource>(object: &K) -> String {
    object.meta().name.clone().unwrap_or_default()
}

/// Cluster access through the Kubernetes API
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster credentials
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(create_client().await?))
    }

    fn dynamic(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_namespaces(&self, selector: &str) -> ClusterResult<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api
            .list(&list_params(selector))
            .await
            .map_err(|e| map_err("namespaces", selector, e))?;
        Ok(list.items)
    }

    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let name = object_name(namespace);
        api.create(&PostParams::default(), namespace)
            .await
            .map_err(|e| map_err("namespace", &name, e))?;
        debug!("Created namespace {}", name);
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> ClusterResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::background())
            .await
            .map_err(|e| map_err("namespace", name, e))?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> ClusterResult<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(|e| map_err("secret", name, e))
    }

    async fn list_secrets(&self, namespace: &str, selector: &str) -> ClusterResult<Vec<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&list_params(selector))
            .await
            .map_err(|e| map_err("secrets", selector, e))?;
        Ok(list.items)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> ClusterResult<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret)
            .await
            .map_err(|e| map_err("secret", &object_name(secret), e))?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_err("secret", name, e))?;
        Ok(())
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> ClusterResult<()> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), account)
            .await
            .map_err(|e| map_err("serviceaccount", &object_name(account), e))?;
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> ClusterResult<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| map_err("deployment", name, e))
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &str,
    ) -> ClusterResult<Vec<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&list_params(selector))
            .await
            .map_err(|e| map_err("deployments", selector, e))?;
        Ok(list.items)
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> ClusterResult<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let name = object_name(deployment);
        api.replace(&name, &PostParams::default(), deployment)
            .await
            .map_err(|e| map_err("deployment", &name, e))
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background())
            .await
            .map_err(|e| map_err("deployment", name, e))?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_err("service", name, e))?;
        Ok(())
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_err("ingress", name, e))?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> ClusterResult<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&list_params(selector))
            .await
            .map_err(|e| map_err("pods", selector, e))?;
        Ok(list.items)
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, follow: bool) -> ClusterResult<LogStream> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            follow,
            ..Default::default()
        };
        let reader = api
            .log_stream(pod, &params)
            .await
            .map_err(|e| map_err("pod", pod, e))?;

        let name = pod.to_string();
        Ok(reader
            .lines()
            .map_err(move |e| ClusterError::Api(format!("reading logs of {}: {}", name, e)))
            .boxed())
    }

    async fn list_pipeline_runs(
        &self,
        namespace: &str,
        selector: &str,
    ) -> ClusterResult<Vec<PipelineRun>> {
        let api: Api<PipelineRun> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&list_params(selector))
            .await
            .map_err(|e| map_err("pipelineruns", selector, e))?;
        Ok(list.items)
    }

    async fn create_pipeline_run(&self, namespace: &str, run: &PipelineRun) -> ClusterResult<()> {
        let api: Api<PipelineRun> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), run)
            .await
            .map_err(|e| map_err("pipelinerun", &object_name(run), e))?;
        Ok(())
    }

    async fn delete_pipeline_run(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let api: Api<PipelineRun> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background())
            .await
            .map_err(|e| map_err("pipelinerun", name, e))?;
        Ok(())
    }

    async fn get_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<DynamicObject> {
        self.dynamic(resource, namespace)
            .get(name)
            .await
            .map_err(|e| map_err(&resource.kind, name, e))
    }

    async fn list_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &str,
    ) -> ClusterResult<Vec<DynamicObject>> {
        let list = self
            .dynamic(resource, namespace)
            .list(&list_params(selector))
            .await
            .map_err(|e| map_err(&resource.plural, selector, e))?;
        Ok(list.items)
    }

    async fn create_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> ClusterResult<()> {
        self.dynamic(resource, namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_err(&resource.kind, &object_name(object), e))?;
        Ok(())
    }

    async fn delete_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<()> {
        self.dynamic(resource, namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| map_err(&resource.kind, name, e))?;
        Ok(())
    }
}
