//! Tekton PipelineRun resource
//!
//! Only the fields carrier writes or reads are modelled. Params are sent as
//! plain strings, which Tekton accepts for its array-or-string values.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::domain::app::{
    AppRef, GitRef, COMPONENT_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE, NAME_LABEL,
    PART_OF_LABEL,
};
use crate::domain::staging::{
    derive_state, RunCondition, StageRun, StageState, STAGE_ID_LABEL, STAGING_COMPONENT,
};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "tekton.dev",
    version = "v1beta1",
    kind = "PipelineRun",
    namespaced,
    status = "PipelineRunStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_ref: Option<PipelineRef>,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub workspaces: Vec<WorkspaceBinding>,
    #[serde(default)]
    pub resources: Vec<PipelineResourceBinding>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceBinding {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_claim_template: Option<PersistentVolumeClaim>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResourceBinding {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_spec: Option<PipelineResourceSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineResourceSpec {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub params: Vec<Param>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Time>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Everything a staging run needs to know, fixed at creation
#[derive(Debug, Clone)]
pub struct StagingParams {
    pub id: String,
    pub app: AppRef,
    pub git: GitRef,
    pub route: String,
    pub instances: i32,
    pub app_image: String,
    pub deployment_image: String,
    pub service_account: String,
    pub pipeline: String,
}

impl PipelineRun {
    /// Build the run for one staging attempt
    pub fn for_stage(params: &StagingParams) -> Self {
        let labels = BTreeMap::from([
            (NAME_LABEL.to_string(), params.app.name.clone()),
            (PART_OF_LABEL.to_string(), params.app.org.clone()),
            (STAGE_ID_LABEL.to_string(), params.id.clone()),
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
            (COMPONENT_LABEL.to_string(), STAGING_COMPONENT.to_string()),
        ]);

        let param = |name: &str, value: String| Param {
            name: name.to_string(),
            value,
        };

        let claim = PersistentVolumeClaim {
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity("1Gi".to_string()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let spec = PipelineRunSpec {
            service_account_name: Some(params.service_account.clone()),
            pipeline_ref: Some(PipelineRef {
                name: params.pipeline.clone(),
            }),
            params: vec![
                param("APP_NAME", params.app.name.clone()),
                param("ORG", params.app.org.clone()),
                param("ROUTE", params.route.clone()),
                param("INSTANCES", params.instances.to_string()),
                param("APP_IMAGE", params.app_image.clone()),
                param("DEPLOYMENT_IMAGE", params.deployment_image.clone()),
                param("STAGE_ID", params.id.clone()),
            ],
            workspaces: vec![WorkspaceBinding {
                name: "source".to_string(),
                volume_claim_template: Some(claim),
            }],
            resources: vec![PipelineResourceBinding {
                name: "source-repo".to_string(),
                resource_spec: Some(PipelineResourceSpec {
                    type_: "git".to_string(),
                    params: vec![
                        param("revision", params.git.revision.clone()),
                        param("url", params.git.url.clone()),
                    ],
                }),
            }],
        };

        Self {
            metadata: ObjectMeta {
                name: Some(params.id.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    pub fn stage_id(&self) -> Option<&str> {
        self.label(STAGE_ID_LABEL)
    }

    pub fn run_conditions(&self) -> Vec<RunCondition> {
        self.status
            .as_ref()
            .map(|s| {
                s.conditions
                    .iter()
                    .map(|c| RunCondition {
                        type_: c.type_.clone(),
                        status: c.status.clone(),
                        reason: c.reason.clone(),
                        message: c.message.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn completion_time(&self) -> Option<&Time> {
        self.status.as_ref().and_then(|s| s.completion_time.as_ref())
    }

    pub fn state(&self) -> StageState {
        derive_state(&self.run_conditions(), self.completion_time().is_some())
    }

    /// Terminal when completed or when any condition went false
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn to_stage_run(&self) -> StageRun {
        StageRun {
            id: self
                .stage_id()
                .or(self.metadata.name.as_deref())
                .unwrap_or_default()
                .to_string(),
            app: AppRef::new(
                self.label(PART_OF_LABEL).unwrap_or_default(),
                self.label(NAME_LABEL).unwrap_or_default(),
            ),
            state: self.state(),
            created: self.metadata.creation_timestamp.as_ref().map(|t| t.0),
            completed: self.completion_time().map(|t| t.0),
        }
    }
}

#[cfg(test)]
impl PipelineRun {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.spec
            .params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k8s_openapi::chrono::Utc;

    pub(crate) fn sample_params(id: &str) -> StagingParams {
        StagingParams {
            id: id.to_string(),
            app: AppRef::new("workspace", "web"),
            git: GitRef {
                revision: "abc123".to_string(),
                url: "http://gitea/workspace/web".to_string(),
            },
            route: "web.example.com".to_string(),
            instances: 2,
            app_image: "registry/apps/workspace-web:abc123".to_string(),
            deployment_image: "127.0.0.1:30500/apps/workspace-web:abc123".to_string(),
            service_account: "staging-triggers-admin".to_string(),
            pipeline: "staging-pipeline".to_string(),
        }
    }

    #[test]
    fn test_for_stage_params_and_labels() {
        let run = PipelineRun::for_stage(&sample_params("0123456789abcdef"));

        assert_eq!(run.metadata.name.as_deref(), Some("0123456789abcdef"));
        assert_eq!(run.stage_id(), Some("0123456789abcdef"));
        assert_eq!(run.param("INSTANCES"), Some("2"));
        assert_eq!(run.param("ROUTE"), Some("web.example.com"));
        assert_eq!(run.param("STAGE_ID"), Some("0123456789abcdef"));
        assert_eq!(run.spec.workspaces[0].name, "source");
        assert_eq!(run.spec.resources[0].name, "source-repo");
        assert_eq!(run.state(), StageState::Requested);
    }

    #[test]
    fn test_status_drives_state() {
        let mut run = PipelineRun::for_stage(&sample_params("0123456789abcdef"));
        run.status = Some(PipelineRunStatus {
            conditions: vec![Condition {
                type_: "Succeeded".to_string(),
                status: "False".to_string(),
                reason: Some("Failed".to_string()),
                message: Some("step build failed".to_string()),
            }],
            start_time: None,
            completion_time: Some(Time(Utc::now())),
        });

        assert!(run.is_terminal());
        assert_eq!(
            run.to_stage_run().state,
            StageState::Failed("step build failed".to_string())
        );
    }

    #[test]
    fn test_serializes_tekton_shape() {
        let run = PipelineRun::for_stage(&sample_params("0123456789abcdef"));
        let json = serde_json::to_value(&run).unwrap();

        assert_eq!(json["apiVersion"], "tekton.dev/v1beta1");
        assert_eq!(json["kind"], "PipelineRun");
        assert_eq!(json["spec"]["pipelineRef"]["name"], "staging-pipeline");
        assert_eq!(
            json["spec"]["workspaces"][0]["volumeClaimTemplate"]["spec"]["resources"]["requests"]
                ["storage"],
            "1Gi"
        );
        assert_eq!(json["spec"]["resources"][0]["resourceSpec"]["type"], "git");
    }
}
