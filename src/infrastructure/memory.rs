//! In-memory cluster for tests
//!
//! Behaves like the API server where carrier depends on it: creates conflict
//! on existing names, deletes of absent objects are NotFound, namespace
//! deletion cascades and list calls honour `k=v` selectors. Individual
//! operations can be made to fail to exercise error paths.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, ServiceAccount};
use kube::api::{ApiResource, DynamicObject};

use super::cluster::{selector_matches, ClusterApi, LogStream};
use super::gitea::{RepositoryResult, SourceRepository};
use super::pipeline::{PipelineRun, PipelineRunStatus};
use crate::error::{ClusterError, ClusterResult, RepositoryError};

type Key = (String, String);

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    secrets: BTreeMap<Key, Secret>,
    service_accounts: BTreeMap<Key, ServiceAccount>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeSet<Key>,
    ingresses: BTreeSet<Key>,
    pods: BTreeMap<Key, Pod>,
    logs: BTreeMap<Key, Vec<String>>,
    pipeline_runs: BTreeMap<Key, PipelineRun>,
    dynamic: BTreeMap<(String, String, String), DynamicObject>,
    failures: BTreeSet<String>,
}

#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn dyn_key(resource: &ApiResource, namespace: Option<&str>, name: &str) -> (String, String, String) {
    (
        resource.plural.clone(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(state: &State, op: &str) -> ClusterResult<()> {
        if state.failures.contains(op) {
            return Err(ClusterError::Api(format!("injected failure in {}", op)));
        }
        Ok(())
    }

    /// Make every later call of `op` (a trait method name) fail
    pub fn fail(&self, op: &str) {
        self.state().failures.insert(op.to_string());
    }

    pub fn insert_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        let ns = Namespace {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };
        self.state().namespaces.insert(name.to_string(), ns);
    }

    pub fn insert_secret(&self, namespace: &str, secret: Secret) {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.state().secrets.insert(key(namespace, &name), secret);
    }

    pub fn insert_deployment(&self, namespace: &str, deployment: Deployment) {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        state.services.insert(key(namespace, &name));
        state.ingresses.insert(key(namespace, &name));
        state.deployments.insert(key(namespace, &name), deployment);
    }

    pub fn insert_pod(&self, namespace: &str, pod: Pod, logs: &[&str]) {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        state.logs.insert(
            key(namespace, &name),
            logs.iter().map(|l| l.to_string()).collect(),
        );
        state.pods.insert(key(namespace, &name), pod);
    }

    pub fn insert_dynamic(&self, resource: &ApiResource, namespace: Option<&str>, object: DynamicObject) {
        let name = object.metadata.name.clone().unwrap_or_default();
        self.state()
            .dynamic
            .insert(dyn_key(resource, namespace, &name), object);
    }

    pub fn set_run_status(&self, namespace: &str, name: &str, status: PipelineRunStatus) {
        if let Some(run) = self.state().pipeline_runs.get_mut(&key(namespace, name)) {
            run.status = Some(status);
        }
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state().secrets.get(&key(namespace, name)).cloned()
    }

    pub fn service_account(&self, namespace: &str, name: &str) -> Option<ServiceAccount> {
        self.state()
            .service_accounts
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state().deployments.get(&key(namespace, name)).cloned()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state().namespaces.contains_key(name)
    }

    pub fn pipeline_run_names(&self, namespace: &str) -> Vec<String> {
        self.state()
            .pipeline_runs
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn dynamic_names(&self, resource: &ApiResource, namespace: Option<&str>) -> Vec<String> {
        let ns = namespace.unwrap_or_default();
        self.state()
            .dynamic
            .keys()
            .filter(|(plural, n, _)| plural == &resource.plural && n == ns)
            .map(|(_, _, name)| name.clone())
            .collect()
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn list_namespaces(&self, selector: &str) -> ClusterResult<Vec<Namespace>> {
        let state = self.state();
        Self::check(&state, "list_namespaces")?;
        Ok(state
            .namespaces
            .values()
            .filter(|ns| selector_matches(selector, ns.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<()> {
        let mut state = self.state();
        Self::check(&state, "create_namespace")?;
        let name = namespace.metadata.name.clone().unwrap_or_default();
        if state.namespaces.contains_key(&name) {
            return Err(ClusterError::conflict("namespace", &name));
        }
        state.namespaces.insert(name, namespace.clone());
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> ClusterResult<()> {
        let mut state = self.state();
        Self::check(&state, "delete_namespace")?;
        if state.namespaces.remove(name).is_none() {
            return Err(ClusterError::not_found("namespace", name));
        }
        state.secrets.retain(|(ns, _), _| ns != name);
        state.service_accounts.retain(|(ns, _), _| ns != name);
        state.deployments.retain(|(ns, _), _| ns != name);
        state.services.retain(|(ns, _)| ns != name);
        state.ingresses.retain(|(ns, _)| ns != name);
        state.pods.retain(|(ns, _), _| ns != name);
        state.pipeline_runs.retain(|(ns, _), _| ns != name);
        state.dynamic.retain(|(_, ns, _), _| ns != name);
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> ClusterResult<Secret> {
        let state = self.state();
        Self::check(&state, "get_secret")?;
        state
            .secrets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("secret", name))
    }

    async fn list_secrets(&self, namespace: &str, selector: &str) -> ClusterResult<Vec<Secret>> {
        let state = self.state();
        Self::check(&state, "list_secrets")?;
        Ok(state
            .secrets
            .iter()
            .filter(|((ns, _), s)| ns == namespace && selector_matches(selector, s.metadata.labels.as_ref()))
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> ClusterResult<()> {
        let mut state = self.state();
        Self::check(&state, "create_secret")?;
        let name = secret.metadata.name.clone().unwrap_or_default();
        if state.secrets.contains_key(&key(namespace, &name)) {
            return Err(ClusterError::conflict("secret", &name));
        }
        let mut stored = secret.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        state.secrets.insert(key(namespace, &name), stored);
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let mut state = self.state();
        Self::check(&state, "delete_secret")?;
        state
            .secrets
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("secret", name))
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> ClusterResult<()> {
        let mut state = self.state();
        Self::check(&state, "create_service_account")?;
        let name = account.metadata.name.clone().unwrap_or_default();
        if state.service_accounts.contains_key(&key(namespace, &name)) {
            return Err(ClusterError::conflict("serviceaccount", &name));
        }
        state
            .service_accounts
            .insert(key(namespace, &name), account.clone());
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> ClusterResult<Deployment> {
        let state = self.state();
        Self::check(&state, "get_deployment")?;
        state
            .deployments
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("deployment", name))
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &str,
    ) -> ClusterResult<Vec<Deployment>> {
        let state = self.state();
        Self::check(&state, "list_deployments")?;
        Ok(state
            .deployments
            .iter()
            .filter(|((ns, _), d)| ns == namespace && selector_matches(selector, d.metadata.labels.as_ref()))
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> ClusterResult<Deployment> {
        let mut state = self.state();
        Self::check(&state, "replace_deployment")?;
        let name = deployment.metadata.name.clone().unwrap_or_default();
        match state.deployments.get_mut(&key(namespace, &name)) {
            Some(existing) => {
                *existing = deployment.clone();
                Ok(existing.clone())
            }
            None => Err(ClusterError::not_found("deployment", &name)),
        }
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let mut state = self.state();
        Self::check(&state, "delete_deployment")?;
        state
            .deployments
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("deployment", name))
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let mut state = self.state();
        Self::check(&state, "delete_service")?;
        if state.services.remove(&key(namespace, name)) {
            Ok(())
        } else {
            Err(ClusterError::not_found("service", name))
        }
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let mut state = self.state();
        Self::check(&state, "delete_ingress")?;
        if state.ingresses.remove(&key(namespace, name)) {
            Ok(())
        } else {
            Err(ClusterError::not_found("ingress", name))
        }
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> ClusterResult<Vec<Pod>> {
        let state = self.state();
        Self::check(&state, "list_pods")?;
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), p)| ns == namespace && selector_matches(selector, p.metadata.labels.as_ref()))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, _follow: bool) -> ClusterResult<LogStream> {
        let state = self.state();
        Self::check(&state, "pod_logs")?;
        let lines = state
            .logs
            .get(&key(namespace, pod))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("pod", pod))?;
        Ok(Box::pin(stream::iter(lines.into_iter().map(Ok))))
    }

    async fn list_pipeline_runs(
        &self,
        namespace: &str,
        selector: &str,
    ) -> ClusterResult<Vec<PipelineRun>> {
        let state = self.state();
        Self::check(&state, "list_pipeline_runs")?;
        Ok(state
            .pipeline_runs
            .iter()
            .filter(|((ns, _), r)| ns == namespace && selector_matches(selector, r.metadata.labels.as_ref()))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn create_pipeline_run(&self, namespace: &str, run: &PipelineRun) -> ClusterResult<()> {
        let mut state = self.state();
        Self::check(&state, "create_pipeline_run")?;
        let name = run.metadata.name.clone().unwrap_or_default();
        if state.pipeline_runs.contains_key(&key(namespace, &name)) {
            return Err(ClusterError::conflict("pipelinerun", &name));
        }
        let mut stored = run.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.creation_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
            k8s_openapi::chrono::Utc::now(),
        ));
        state.pipeline_runs.insert(key(namespace, &name), stored);
        Ok(())
    }

    async fn delete_pipeline_run(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let mut state = self.state();
        Self::check(&state, "delete_pipeline_run")?;
        state
            .pipeline_runs
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("pipelinerun", name))
    }

    async fn get_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<DynamicObject> {
        let state = self.state();
        Self::check(&state, "get_dynamic")?;
        state
            .dynamic
            .get(&dyn_key(resource, namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::not_found(&resource.kind, name))
    }

    async fn list_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &str,
    ) -> ClusterResult<Vec<DynamicObject>> {
        let state = self.state();
        Self::check(&state, "list_dynamic")?;
        let ns = namespace.unwrap_or_default();
        Ok(state
            .dynamic
            .iter()
            .filter(|((plural, n, _), o)| {
                plural == &resource.plural
                    && n == ns
                    && selector_matches(selector, o.metadata.labels.as_ref())
            })
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> ClusterResult<()> {
        let mut state = self.state();
        Self::check(&state, "create_dynamic")?;
        let name = object.metadata.name.clone().unwrap_or_default();
        let k = dyn_key(resource, namespace, &name);
        if state.dynamic.contains_key(&k) {
            return Err(ClusterError::conflict(&resource.kind, &name));
        }
        state.dynamic.insert(k, object.clone());
        Ok(())
    }

    async fn delete_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<()> {
        let mut state = self.state();
        Self::check(&state, "delete_dynamic")?;
        state
            .dynamic
            .remove(&dyn_key(resource, namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found(&resource.kind, name))
    }
}

#[derive(Default)]
struct RepositoryState {
    orgs: BTreeSet<String>,
    repos: BTreeSet<Key>,
    hooks: BTreeSet<Key>,
    failing: bool,
    remote_root: Option<PathBuf>,
}

/// In-memory source repository
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<RepositoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RepositoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every later call fail like an unreachable server
    pub fn fail(&self) {
        self.state().failing = true;
    }

    fn check(state: &RepositoryState) -> RepositoryResult<()> {
        if state.failing {
            return Err(RepositoryError::Status {
                url: "memory://repository".to_string(),
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }

    /// Back repositories with bare git repositories under `root` so pushes land somewhere
    pub fn serve_from(&self, root: &Path) {
        self.state().remote_root = Some(root.to_path_buf());
    }

    fn remote_path(root: &Path, org: &str, name: &str) -> PathBuf {
        root.join(org).join(format!("{}.git", name))
    }

    pub fn has_org(&self, org: &str) -> bool {
        self.state().orgs.contains(org)
    }

    pub fn has_repo(&self, org: &str, name: &str) -> bool {
        self.state().repos.contains(&key(org, name))
    }

    pub fn has_hook(&self, org: &str, name: &str) -> bool {
        self.state().hooks.contains(&key(org, name))
    }
}

#[async_trait]
impl SourceRepository for MemoryRepository {
    async fn create_org(&self, org: &str) -> RepositoryResult<()> {
        let mut state = self.state();
        Self::check(&state)?;
        state.orgs.insert(org.to_string());
        Ok(())
    }

    async fn delete_org(&self, org: &str) -> RepositoryResult<()> {
        let mut state = self.state();
        Self::check(&state)?;
        state.orgs.remove(org);
        state.repos.retain(|(o, _)| o != org);
        state.hooks.retain(|(o, _)| o != org);
        Ok(())
    }

    async fn ensure_repo(&self, org: &str, name: &str) -> RepositoryResult<bool> {
        let mut state = self.state();
        Self::check(&state)?;
        let created = state.repos.insert(key(org, name));
        if let (true, Some(root)) = (created, state.remote_root.as_ref()) {
            let path = Self::remote_path(root, org, name);
            std::fs::create_dir_all(&path).expect("create remote dir");
            let status = std::process::Command::new("git")
                .args(["init", "--bare", "--quiet"])
                .current_dir(&path)
                .status()
                .expect("run git init");
            assert!(status.success(), "git init --bare failed");
        }
        Ok(created)
    }

    async fn ensure_webhook(&self, org: &str, name: &str) -> RepositoryResult<bool> {
        let mut state = self.state();
        Self::check(&state)?;
        Ok(state.hooks.insert(key(org, name)))
    }

    async fn delete_repo(&self, org: &str, name: &str) -> RepositoryResult<()> {
        let mut state = self.state();
        Self::check(&state)?;
        state.repos.remove(&key(org, name));
        state.hooks.remove(&key(org, name));
        Ok(())
    }

    fn repo_url(&self, org: &str, name: &str) -> String {
        format!("memory://repository/{}/{}", org, name)
    }

    fn push_url(&self, org: &str, name: &str) -> RepositoryResult<String> {
        match self.state().remote_root.as_ref() {
            Some(root) => Ok(Self::remote_path(root, org, name).display().to_string()),
            None => Ok(self.repo_url(org, name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use kube::api::ObjectMeta;

    fn secret(name: &str, labels: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_conflicts_and_delete_not_found() {
        let cluster = MemoryCluster::new();
        cluster.create_secret("ns", &secret("a", &[])).await.unwrap();

        let err = cluster.create_secret("ns", &secret("a", &[])).await.unwrap_err();
        assert!(err.is_conflict());

        cluster.delete_secret("ns", "a").await.unwrap();
        assert!(cluster.delete_secret("ns", "a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_selector_and_cascade() {
        let cluster = MemoryCluster::new();
        cluster.insert_namespace("ns", &[]);
        cluster.insert_secret("ns", secret("a", &[("k", "v")]));
        cluster.insert_secret("ns", secret("b", &[("k", "w")]));

        let found = cluster.list_secrets("ns", "k=v").await.unwrap();
        assert_eq!(found.len(), 1);

        cluster.delete_namespace("ns").await.unwrap();
        assert!(cluster.list_secrets("ns", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let cluster = MemoryCluster::new();
        cluster.fail("list_namespaces");
        let err = cluster.list_namespaces("").await.unwrap_err();
        assert!(matches!(err, ClusterError::Api(_)));
    }

    #[tokio::test]
    async fn test_pod_logs_stream() {
        let cluster = MemoryCluster::new();
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        cluster.insert_pod("ns", pod, &["one", "two"]);

        let lines: Vec<String> = cluster
            .pod_logs("ns", "web-1", false)
            .await
            .unwrap()
            .filter_map(|l| async move { l.ok() })
            .collect()
            .await;
        assert_eq!(lines, vec!["one", "two"]);
    }
}
