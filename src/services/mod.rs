//! Services layer - orchestration logic
//!
//! This module coordinates between domain logic and infrastructure.
//! Every operation takes the process `Context` and reads live cluster state.

pub mod applications;
pub mod bindings;
pub mod deployment;
pub mod instances;
pub mod logs;
pub mod organizations;
pub mod sources;
pub mod staging;

// Re-export commonly used types
pub use deployment::{DeploymentService, UploadOutcome};
pub use instances::{CatalogRequest, ServiceEntry};
