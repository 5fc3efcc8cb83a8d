//! Application domain types
//!
//! An application is the registry view of a labelled Deployment. These types
//! carry no I/O; the application registry builds them from cluster objects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Label marking objects owned by carrier
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "carrier";
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const APPLICATION_COMPONENT: &str = "application";

pub const ROUTE_ANNOTATION: &str = "carrier.io/route";
pub const REVISION_ANNOTATION: &str = "carrier.io/revision";

/// Mount root for bound service secrets inside the application container
pub const SERVICE_MOUNT_ROOT: &str = "/services";

/// Organization plus application name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppRef {
    pub name: String,
    pub org: String,
}

impl AppRef {
    pub fn new(org: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            org: org.into(),
        }
    }

    /// Label selector matching every object carrier labels for this application
    pub fn selector(&self) -> String {
        format!(
            "{}={},{}={}",
            NAME_LABEL, self.name, PART_OF_LABEL, self.org
        )
    }

    /// Image reference built by staging for this application
    pub fn image_url(&self, registry: &str, revision: &str) -> String {
        format!("{}/{}-{}:{}", registry, self.org, self.name, revision)
    }
}

impl fmt::Display for AppRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.name)
    }
}

/// Reference to pushed sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRef {
    pub revision: String,
    pub url: String,
}

/// Registry view of a deployed application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    pub org: String,
    pub desired_instances: i32,
    pub ready_instances: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    pub bound_services: Vec<String>,
    pub status: String,
}

impl Application {
    pub fn app_ref(&self) -> AppRef {
        AppRef::new(&self.org, &self.name)
    }
}

/// `"<ready>/<desired>"`
pub fn status_string(ready: i32, desired: i32) -> String {
    format!("{}/{}", ready, desired)
}

/// Mount path of a bound service inside the application container
pub fn service_mount_path(service: &str) -> String {
    format!("{}/{}", SERVICE_MOUNT_ROOT, service)
}

/// Default route of an application on the system domain
pub fn default_route(app: &str, domain: &str) -> String {
    format!("{}.{}", app, domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_ref_helpers() {
        let app = AppRef::new("workspace", "web");
        assert_eq!(
            app.selector(),
            "app.kubernetes.io/name=web,app.kubernetes.io/part-of=workspace"
        );
        assert_eq!(
            app.image_url("registry.local/apps", "abc123"),
            "registry.local/apps/workspace-web:abc123"
        );
        assert_eq!(app.to_string(), "workspace/web");
    }

    #[test]
    fn test_status_and_paths() {
        assert_eq!(status_string(1, 3), "1/3");
        assert_eq!(service_mount_path("db"), "/services/db");
        assert_eq!(default_route("web", "example.com"), "web.example.com");
    }
}
