//! Push workflow domain types
//!
//! The push workflow is a fixed sequence of steps; the first failing step
//! ends it.

use std::path::PathBuf;
use std::time::Duration;

/// Individual steps of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStep {
    /// Check that the target organization exists
    ValidateOrg,
    /// Create the source repository if missing
    CreateRepo,
    /// Point the repository webhook at the staging trigger
    CreateWebhook,
    /// Derive the application route from the system domain
    DefaultRoute,
    /// Copy sources and render the workload manifests
    PrepareCode,
    /// Request the TLS certificate for the route
    Certificate,
    /// Push the prepared tree to the repository
    GitPush,
    /// Start a staging run for the pushed revision
    Stage,
    /// Wait for the staging run to finish
    WaitForStaging,
    /// Wait for the workload pods to become ready
    WaitForApp,
}

impl PushStep {
    /// All steps in execution order
    pub const ALL: [PushStep; 10] = [
        PushStep::ValidateOrg,
        PushStep::CreateRepo,
        PushStep::CreateWebhook,
        PushStep::DefaultRoute,
        PushStep::PrepareCode,
        PushStep::Certificate,
        PushStep::GitPush,
        PushStep::Stage,
        PushStep::WaitForStaging,
        PushStep::WaitForApp,
    ];

    /// Get human-readable name for the step
    pub fn name(&self) -> &'static str {
        match self {
            Self::ValidateOrg => "Validate Organization",
            Self::CreateRepo => "Create Repository",
            Self::CreateWebhook => "Create Webhook",
            Self::DefaultRoute => "Default Route",
            Self::PrepareCode => "Prepare Code",
            Self::Certificate => "Certificate",
            Self::GitPush => "Git Push",
            Self::Stage => "Stage",
            Self::WaitForStaging => "Wait For Staging",
            Self::WaitForApp => "Wait For App",
        }
    }

    /// Get emoji for the step
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::ValidateOrg => "🏢",
            Self::CreateRepo => "📦",
            Self::CreateWebhook => "🪝",
            Self::DefaultRoute => "🧭",
            Self::PrepareCode => "📝",
            Self::Certificate => "🔐",
            Self::GitPush => "📤",
            Self::Stage => "🏗️",
            Self::WaitForStaging => "⏳",
            Self::WaitForApp => "🚀",
        }
    }

    /// Whether logs are followed while this step runs
    pub fn tails_logs(&self) -> bool {
        matches!(
            self,
            Self::GitPush | Self::Stage | Self::WaitForStaging | Self::WaitForApp
        )
    }
}

/// How a push ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushPhase {
    Completed,
    Failed(PushStep),
}

/// What to push and where
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub org: String,
    pub app: String,
    /// Directory holding the application sources
    pub source: PathBuf,
    /// Instances to stage; the live replica count when absent
    pub instances: Option<i32>,
    /// Follow staging and application logs while waiting
    pub tail_logs: bool,
}

impl PushConfig {
    pub fn new(org: impl Into<String>, app: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            org: org.into(),
            app: app.into(),
            source: source.into(),
            instances: None,
            tail_logs: true,
        }
    }

    /// Builder: set instances
    pub fn with_instances(mut self, instances: i32) -> Self {
        self.instances = Some(instances);
        self
    }

    /// Builder: disable log tailing
    pub fn without_logs(mut self) -> Self {
        self.tail_logs = false;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.org.is_empty() {
            errors.push("Organization is required".to_string());
        }
        if self.app.is_empty() {
            errors.push("Application name is required".to_string());
        }
        if !self.source.is_dir() {
            errors.push(format!(
                "Sources directory {} does not exist",
                self.source.display()
            ));
        }
        if matches!(self.instances, Some(n) if n < 0) {
            errors.push("Instances must be zero or more".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Result of a push step execution
#[derive(Debug)]
pub struct StepResult {
    pub step: PushStep,
    pub success: bool,
    pub duration: Duration,
    pub message: Option<String>,
}

impl StepResult {
    pub fn success(step: PushStep, duration: Duration) -> Self {
        Self {
            step,
            success: true,
            duration,
            message: None,
        }
    }

    pub fn failure(step: PushStep, duration: Duration, message: impl Into<String>) -> Self {
        Self {
            step,
            success: false,
            duration,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_config_validation() {
        let errors = PushConfig::new("", "", "/does/not/exist")
            .with_instances(-1)
            .validate()
            .unwrap_err();
        assert!(errors.iter().any(|e| e.contains("Organization")));
        assert!(errors.iter().any(|e| e.contains("Application")));
        assert!(errors.iter().any(|e| e.contains("/does/not/exist")));
        assert!(errors.iter().any(|e| e.contains("Instances")));

        let dir = tempfile::tempdir().unwrap();
        assert!(PushConfig::new("workspace", "web", dir.path()).validate().is_ok());
    }

    #[test]
    fn test_steps_order() {
        assert_eq!(PushStep::ALL.first(), Some(&PushStep::ValidateOrg));
        assert_eq!(PushStep::ALL.last(), Some(&PushStep::WaitForApp));
        let push = PushStep::ALL.iter().position(|s| *s == PushStep::GitPush);
        let stage = PushStep::ALL.iter().position(|s| *s == PushStep::Stage);
        assert!(push < stage);
        assert!(!PushStep::Certificate.tails_logs());
        assert!(PushStep::GitPush.tails_logs());
        assert!(PushStep::WaitForApp.tails_logs());
    }
}
