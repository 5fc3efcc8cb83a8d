//! Staging domain types
//!
//! Defines the staging run as a state machine derived from the pipeline
//! run's conditions and completion time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::app::{AppRef, GitRef};

/// Label carrying the stage id on every pipeline run
pub const STAGE_ID_LABEL: &str = "carrier.io/stage-id";
pub const STAGING_COMPONENT: &str = "staging";

/// Instance count used when neither the request nor a live workload says otherwise
pub const DEFAULT_INSTANCES: i32 = 1;

/// Current state of a staging run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message")]
pub enum StageState {
    /// Created, runner has not reported yet
    Requested,
    /// Runner is working on it
    Running,
    /// Completed successfully
    Succeeded,
    /// A condition went false
    Failed(String),
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Requested => "Requested",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed(_) => "Failed",
        }
    }
}

/// Condition as reported by the pipeline runner
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunCondition {
    pub type_: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl RunCondition {
    pub fn is_false(&self) -> bool {
        self.status == "False"
    }
}

/// Derive the run state. A false condition wins over completion.
pub fn derive_state(conditions: &[RunCondition], completed: bool) -> StageState {
    if let Some(failed) = conditions.iter().find(|c| c.is_false()) {
        return StageState::Failed(failed.message.clone().unwrap_or_default());
    }
    if completed {
        return StageState::Succeeded;
    }
    if conditions.is_empty() {
        StageState::Requested
    } else {
        StageState::Running
    }
}

/// Outcome of waiting for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    Failed(String),
}

/// Request to stage pushed sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRequest {
    pub app: AppRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<i32>,
    pub git: GitRef,
    pub route: String,
}

/// Snapshot of one staging run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRun {
    pub id: String,
    pub app: AppRef,
    pub state: StageState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

/// Fresh opaque run id: 16 lowercase hex characters
pub fn new_stage_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..16].to_string()
}
