//! Centralized error types for carrier
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for carrier operations.
///
/// Every variant maps to a stable kind and an HTTP status so the CLI and the
/// REST surface report failures the same way.
#[derive(Error, Debug)]
pub enum CarrierError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Organization '{0}' does not exist")]
    OrgNotFound(String),

    #[error("Application '{0}' does not exist")]
    AppNotFound(String),

    #[error("Service '{0}' does not exist")]
    ServiceNotFound(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Service '{0}' already exists")]
    AlreadyExists(String),

    #[error("Service '{0}' already bound")]
    AlreadyBound(String),

    #[error("Service '{0}' is not bound to the application")]
    NotBound(String),

    #[error("Bound applications exist for service '{service}': {}", apps.join(","))]
    BoundApplicationsExist { service: String, apps: Vec<String> },

    #[error("Staging of {0} is still running")]
    AlreadyStaging(String),

    #[error("Timed out after {} waiting for {what}", humantime::format_duration(*after))]
    Timeout { what: String, after: Duration },

    #[error("Provisioning of service '{service}' failed: {message}")]
    ProvisionFailed { service: String, message: String },

    #[error("Kubernetes error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Source repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

pub type CarrierResult<T> = Result<T, CarrierError>;

impl CarrierError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(anyhow::anyhow!(message.into()))
    }

    /// Stable name of the error kind, independent of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BadRequest",
            Self::OrgNotFound(_) | Self::AppNotFound(_) | Self::ServiceNotFound(_) => "NotFound",
            Self::NotFound(_) => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::AlreadyBound(_) => "AlreadyBound",
            Self::NotBound(_) => "NotBound",
            Self::BoundApplicationsExist { .. } => "BoundApplicationsExist",
            Self::AlreadyStaging(_) => "AlreadyStaging",
            Self::Timeout { .. } => "Timeout",
            Self::ProvisionFailed { .. } => "ProvisionFailed",
            Self::Cluster(_) | Self::Repository(_) | Self::Git(_) | Self::Internal(_) => {
                "InternalError"
            }
        }
    }

    /// HTTP status used when this error crosses the REST boundary.
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) | Self::BoundApplicationsExist { .. } => 400,
            Self::OrgNotFound(_)
            | Self::AppNotFound(_)
            | Self::ServiceNotFound(_)
            | Self::NotFound(_) => 404,
            Self::Conflict(_) | Self::AlreadyExists(_) | Self::AlreadyStaging(_) => 409,
            Self::AlreadyBound(_) | Self::NotBound(_) => 400,
            Self::Timeout { .. } => 504,
            Self::ProvisionFailed { .. } => 500,
            Self::Cluster(_) | Self::Repository(_) | Self::Git(_) | Self::Internal(_) => 500,
        }
    }

    /// Infrastructure failures, as opposed to business-rule violations.
    pub fn is_internal(&self) -> bool {
        self.kind() == "InternalError"
    }

    /// Short title for error reports. The bound-applications guard carries
    /// its application list in the details instead.
    pub fn title(&self) -> String {
        match self {
            Self::BoundApplicationsExist { .. } => "bound applications exist".to_string(),
            other => other.to_string(),
        }
    }

    pub fn details(&self) -> String {
        match self {
            Self::BoundApplicationsExist { apps, .. } => apps.join(","),
            _ => String::new(),
        }
    }
}

/// Errors reported by the cluster capability provider
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} '{name}' already exists")]
    Conflict { kind: String, name: String },

    #[error("Kubernetes API request failed: {0}")]
    Api(String),
}

pub type ClusterResult<T> = Result<T, ClusterError>;

impl ClusterError {
    pub fn not_found(kind: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn conflict(kind: &str, name: &str) -> Self {
        Self::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Source repository (Gitea) errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Invalid repository URL: {0}")]
    InvalidUrl(String),
}

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    #[error("git executable not found in PATH")]
    NotInstalled,

    #[error("Failed to get git SHA: {0}")]
    ShaFailed(String),

    #[error("Git command failed: {command}: {output}")]
    CommandFailed { command: String, output: String },
}

/// Ordered issue list produced by batch operations.
///
/// Business-rule issues keep request order. An internal error is always
/// placed in front so callers can tell "something is broken" from "some
/// inputs were invalid".
#[derive(Debug, Default)]
pub struct Issues(Vec<CarrierError>);

impl Issues {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, issue: CarrierError) {
        self.0.push(issue);
    }

    /// Abort with an internal error, keeping the issues collected so far behind it.
    pub fn abort_with(mut self, internal: CarrierError) -> Self {
        self.0.insert(0, internal);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CarrierError> {
        self.0.iter()
    }

    pub fn first(&self) -> Option<&CarrierError> {
        self.0.first()
    }
}

impl From<CarrierError> for Issues {
    fn from(error: CarrierError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for Issues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for Issues {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_status_mapping() {
        let err = CarrierError::ServiceNotFound("db".to_string());
        assert_eq!(err.kind(), "NotFound");
        assert_eq!(err.status(), 404);
        assert!(!err.is_internal());

        let err: CarrierError = ClusterError::Api("boom".to_string()).into();
        assert_eq!(err.kind(), "InternalError");
        assert_eq!(err.status(), 500);
        assert!(err.is_internal());
    }

    #[test]
    fn test_bound_applications_details() {
        let err = CarrierError::BoundApplicationsExist {
            service: "db".to_string(),
            apps: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.title(), "bound applications exist");
        assert_eq!(err.details(), "a,b");
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_issues_internal_error_goes_first() {
        let mut issues = Issues::new();
        issues.push(CarrierError::ServiceNotFound("one".to_string()));
        issues.push(CarrierError::AlreadyBound("two".to_string()));

        let issues = issues.abort_with(CarrierError::internal("cluster unreachable"));

        assert_eq!(issues.len(), 3);
        assert!(issues.first().map(|e| e.is_internal()).unwrap_or(false));
        let kinds: Vec<&str> = issues.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["InternalError", "NotFound", "AlreadyBound"]);
    }

    #[test]
    fn test_timeout_display() {
        let err = CarrierError::Timeout {
            what: "staging run abc".to_string(),
            after: Duration::from_secs(90),
        };
        assert!(err.to_string().contains("1m 30s"));
        assert_eq!(err.kind(), "Timeout");
    }
}
