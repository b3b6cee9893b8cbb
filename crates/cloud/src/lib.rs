//! Cloud integrations for udo fleets.
//!
//! This crate provides the two external collaborators the fleet core is
//! written against:
//!
//! - [`CloudControlPlane`] - launch configurations, autoscaling groups and
//!   cluster networking
//! - [`DeploymentService`] - code deployments to deployment groups
//!
//! ## Providers
//!
//! - **AWS** - Auto Scaling, EC2 and `CodeDeploy` ([`Aws`])
//! - **Mock** - in-memory fakes for tests (`mock` feature)

pub mod providers;

#[cfg(feature = "mock")]
pub use providers::mock;
pub use providers::{
    aws, Aws, Capacity, CloudApiError, CloudControlPlane, CreateDeploymentRequest,
    DeploymentGroupSummary, DeploymentService, DeploymentState, GroupDescription, GroupInstance,
    GroupSpec, InstanceHealth, LaunchConfigRecord, LaunchConfigSpec, VpcSpec,
};
