//! Cloud provider abstractions.
//!
//! This module defines the collaborator traits the fleet core talks to and
//! the types exchanged over them.

pub mod aws;
mod deployments;
#[cfg(feature = "mock")]
pub mod mock;
mod traits;

pub use deployments::{
    CreateDeploymentRequest, DeploymentGroupSummary, DeploymentService, DeploymentState,
};
pub use traits::{
    Capacity, CloudApiError, CloudControlPlane, GroupDescription, GroupInstance, GroupSpec,
    InstanceHealth, LaunchConfigRecord, LaunchConfigSpec, VpcSpec,
};

// Re-export provider clients
pub use aws::Aws;
