//! AWS (Amazon Web Services) provider.
//!
//! Implements [`CloudControlPlane`](crate::CloudControlPlane) and
//! [`DeploymentService`](crate::DeploymentService) for AWS.
//!
//! ## Services
//!
//! - **Auto Scaling** - Launch configurations and autoscaling groups
//! - **EC2** - Cluster VPCs
//! - **CodeDeploy** - Revision deployments to deployment groups

mod client;
mod models;
mod signing;

pub use client::Aws;
pub use models::*;
