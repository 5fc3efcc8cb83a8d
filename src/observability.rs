//! # Push Observability Module
//!
//! Structured lifecycle events for pushes and staging runs.
//!
//! ## Event Flow
//!
//! ```text
//! carrier → JSON stdout → log collector
//! ```
//!
//! Every event is a single line of JSON prefixed with `CARRIER_EVENT:` so a
//! collector can pick it out of regular log output.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Event prefix for collectors to identify structured events
const EVENT_PREFIX: &str = "CARRIER_EVENT:";

/// Push event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum PushEvent {
    /// Push workflow started
    PushStarted(PushStartedEvent),
    /// Push workflow completed
    PushCompleted(PushCompletedEvent),
    /// Push workflow failed
    PushFailed(PushFailedEvent),
    /// Staging run reached a terminal state
    StageFinished(StageFinishedEvent),
}

/// Common fields for all events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Timestamp in RFC3339 format
    pub timestamp: String,
    /// Organization owning the application
    pub org: String,
    /// Application name
    pub app: String,
    /// Hostname of the machine running the push
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// CI job ID if running in CI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci_job_id: Option<String>,
}

impl EventMetadata {
    pub fn new(org: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            org: org.into(),
            app: app.into(),
            hostname: std::env::var("HOSTNAME").ok(),
            ci_job_id: std::env::var("GITHUB_RUN_ID")
                .ok()
                .or_else(|| std::env::var("CI_JOB_ID").ok()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushStartedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    /// Steps to be executed
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushCompletedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub duration_secs: f64,
    pub step_durations: Vec<StepDuration>,
    /// Route the application is served on
    pub route: String,
    /// Pushed revision
    pub revision: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushFailedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub duration_secs: f64,
    pub failed_step: String,
    pub error: String,
    pub step_durations: Vec<StepDuration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFinishedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub stage_id: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Duration of one workflow step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDuration {
    pub step: String,
    pub duration_secs: f64,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// Emit a structured event to stdout
pub fn emit_event(event: PushEvent) {
    match serde_json::to_string(&event) {
        Ok(json) => {
            println!("{}{}", EVENT_PREFIX, json);
        }
        Err(e) => {
            tracing::error!("Failed to serialize event: {}", e);
        }
    }
}

/// Timer for a single step
pub struct StepTimer {
    name: String,
    start: Instant,
}

impl StepTimer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) -> StepDuration {
        StepDuration {
            step: self.name,
            duration_secs: self.start.elapsed().as_secs_f64(),
            status: StepStatus::Success,
        }
    }

    pub fn finish_failed(self) -> StepDuration {
        StepDuration {
            step: self.name,
            duration_secs: self.start.elapsed().as_secs_f64(),
            status: StepStatus::Failed,
        }
    }
}

/// Push workflow tracker
pub struct PushTracker {
    metadata: EventMetadata,
    start: Instant,
    steps: Vec<StepDuration>,
    current_step: Option<StepTimer>,
}

impl PushTracker {
    pub fn new(metadata: EventMetadata) -> Self {
        Self {
            metadata,
            start: Instant::now(),
            steps: Vec::new(),
            current_step: None,
        }
    }

    /// Start a new step
    pub fn start_step(&mut self, name: impl Into<String>) {
        // Finish any existing step first
        if let Some(timer) = self.current_step.take() {
            self.steps.push(timer.finish());
        }
        self.current_step = Some(StepTimer::new(name));
    }

    /// Mark current step as completed
    pub fn complete_step(&mut self) {
        if let Some(timer) = self.current_step.take() {
            self.steps.push(timer.finish());
        }
    }

    /// Mark current step as failed
    pub fn fail_step(&mut self) {
        if let Some(timer) = self.current_step.take() {
            self.steps.push(timer.finish_failed());
        }
    }

    /// Record a step that was not run
    pub fn skip_step(&mut self, name: impl Into<String>) {
        self.steps.push(StepDuration {
            step: name.into(),
            duration_secs: 0.0,
            status: StepStatus::Skipped,
        });
    }

    pub fn emit_started(&self, step_names: Vec<String>) {
        emit_event(PushEvent::PushStarted(PushStartedEvent {
            metadata: self.metadata.clone(),
            steps: step_names,
        }));
    }

    pub fn emit_stage_finished(&self, stage_id: &str, failure: Option<&str>) {
        emit_event(PushEvent::StageFinished(StageFinishedEvent {
            metadata: self.metadata.clone(),
            stage_id: stage_id.to_string(),
            succeeded: failure.is_none(),
            message: failure.map(str::to_string),
        }));
    }

    pub fn emit_completed(mut self, route: String, revision: String) {
        self.complete_step();
        emit_event(PushEvent::PushCompleted(PushCompletedEvent {
            metadata: self.metadata,
            duration_secs: self.start.elapsed().as_secs_f64(),
            step_durations: self.steps,
            route,
            revision,
        }));
    }

    pub fn emit_failed(mut self, failed_step: String, error: String) {
        self.fail_step();
        emit_event(PushEvent::PushFailed(PushFailedEvent {
            metadata: self.metadata,
            duration_secs: self.start.elapsed().as_secs_f64(),
            failed_step,
            error,
            step_durations: self.steps,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = PushEvent::PushStarted(PushStartedEvent {
            metadata: EventMetadata::new("workspace", "web"),
            steps: vec!["Git Push".into(), "Stage".into()],
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"PushStarted\""));
        assert!(json.contains("\"org\":\"workspace\""));
        assert!(json.contains("\"app\":\"web\""));
    }

    #[test]
    fn test_step_timer() {
        let timer = StepTimer::new("test_step");
        std::thread::sleep(std::time::Duration::from_millis(10));
        let duration = timer.finish();
        assert!(duration.duration_secs >= 0.01);
        assert_eq!(duration.step, "test_step");
        assert_eq!(duration.status, StepStatus::Success);
    }

    #[test]
    fn test_tracker_records_steps_in_order() {
        let mut tracker = PushTracker::new(EventMetadata::new("workspace", "web"));
        tracker.start_step("Create Repository");
        tracker.start_step("Git Push");
        tracker.fail_step();
        tracker.skip_step("Stage");

        let statuses: Vec<_> = tracker
            .steps
            .iter()
            .map(|s| (s.step.as_str(), s.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("Create Repository", StepStatus::Success),
                ("Git Push", StepStatus::Failed),
                ("Stage", StepStatus::Skipped),
            ]
        );
    }

    #[test]
    fn test_step_status_is_lowercase() {
        let json = serde_json::to_string(&StepStatus::Skipped).unwrap();
        assert_eq!(json, "\"skipped\"");
    }
}
