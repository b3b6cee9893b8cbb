//! Fleet management for AWS-hosted clusters.
//!
//! A cluster is a set of roles, each served by one autoscaling group bound to
//! an immutable, versioned launch configuration. This crate provides:
//!
//! - [`LaunchConfigManager`]: creates and retires launch configuration versions
//! - [`AutoscaleGroupManager`]: group lifecycle, including blue/green rotation
//!   with rollback
//! - [`DeploymentCoordinator`]: code deployments against resolved roles
//! - [`ClusterOrchestrator`]: cluster-wide creation and status
//!
//! Mutating operations on a role are serialized by a per-role lease; distinct
//! roles proceed in parallel.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod asgroup;
pub mod cluster;
pub mod config;
pub mod deploy;
pub mod error;
pub mod fleet;
pub mod launch_config;
pub mod lease;
pub mod resolve;
pub mod retry;
pub mod settings;
pub mod template;

pub use asgroup::{
    AutoscaleGroupManager, DestroyOutcome, GroupState, HealthSample, LaunchConfigUpdate,
    RoleStatus, RotationReport, RotationSettings,
};
pub use cluster::{ClusterCreateReport, ClusterOrchestrator, ClusterStatus, ClusterSummary};
pub use config::{ClusterConfig, ConfigStore, DeployConfig, RoleConfig, YamlConfigStore};
pub use deploy::{Deployment, DeploymentCoordinator, DeploymentStatus};
pub use error::{Result, UdoError};
pub use fleet::Fleet;
pub use launch_config::{LaunchConfigManager, LaunchConfigVersion};
pub use lease::{Operation, RoleKey, RoleLeases};
pub use resolve::{resolve, ResolvedTarget};
pub use retry::RetryPolicy;
pub use settings::Settings;
pub use template::TemplateEngine;
