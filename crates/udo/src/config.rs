//! Static cluster and role definitions.
//!
//! Topology is read from a YAML file:
//!
//! ```yaml
//! clusters:
//!   prod:
//!     application: shop
//!     vpc_cidr: 10.20.0.0/16
//!     subnets: [subnet-a, subnet-b]
//!     roles:
//!       web:
//!         image_id: ami-0abc
//!         instance_type: t3.small
//!         capacity: { min: 1, max: 4, desired: 2 }
//!         deploy: { group: prod-web-blue }
//! ```
//!
//! Cluster and role names come from the map keys.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use udo_cloud::Capacity;

use crate::error::{Result, UdoError};

/// Default CIDR block for cluster networking.
pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";

fn default_vpc_cidr() -> String {
    DEFAULT_VPC_CIDR.to_string()
}

/// Deployment naming overrides for a role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Deployment application; falls back to the cluster's.
    #[serde(default)]
    pub application: Option<String>,
    /// Deployment group; defaults to `{cluster}-{role}`.
    #[serde(default)]
    pub group: Option<String>,
}

/// A homogeneous instance group within a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Role name (from the map key).
    #[serde(skip)]
    pub name: String,
    /// Machine image.
    pub image_id: String,
    /// Instance type.
    pub instance_type: String,
    /// Cloud-init template name (`<template_dir>/<name>.hbs`).
    #[serde(default)]
    pub template: Option<String>,
    /// SSH key pair.
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub instance_profile: Option<String>,
    /// Scaling bounds.
    pub capacity: Capacity,
    /// Extra template variables.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub deploy: DeployConfig,
}

/// A named set of roles sharing networking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name (from the map key).
    #[serde(skip)]
    pub name: String,
    /// Existing VPC; when unset `cluster create` provisions one.
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default = "default_vpc_cidr")]
    pub vpc_cidr: String,
    #[serde(default)]
    pub subnets: Vec<String>,
    /// Default deployment application for the cluster's roles.
    #[serde(default)]
    pub application: Option<String>,
    /// Source repository (`owner/name`) deployed to the cluster.
    #[serde(default)]
    pub repository: Option<String>,
    pub roles: BTreeMap<String, RoleConfig>,
}

impl ClusterConfig {
    /// Role names in sorted order.
    #[must_use]
    pub fn role_names(&self) -> Vec<String> {
        self.roles.keys().cloned().collect()
    }
}

/// Root of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterConfig>,
}

impl FleetConfig {
    /// Fill in names from map keys and check scaling bounds.
    fn normalize(mut self) -> Result<Self> {
        for (cluster_name, cluster) in &mut self.clusters {
            cluster.name.clone_from(cluster_name);
            for (role_name, role) in &mut cluster.roles {
                role.name.clone_from(role_name);
                if !role.capacity.is_valid() {
                    return Err(UdoError::Config(format!(
                        "{cluster_name}/{role_name}: capacity {} violates min <= desired <= max",
                        role.capacity
                    )));
                }
            }
        }
        Ok(self)
    }
}

/// Read access to cluster definitions.
pub trait ConfigStore: Send + Sync {
    /// Look up a cluster by name.
    ///
    /// # Errors
    /// Returns `UnknownCluster` when the cluster is not configured.
    fn get_cluster_config(&self, name: &str) -> Result<ClusterConfig>;

    /// All configured cluster names.
    fn cluster_names(&self) -> Vec<String>;
}

/// [`ConfigStore`] backed by a YAML document.
#[derive(Debug, Clone, Default)]
pub struct YamlConfigStore {
    config: FleetConfig,
}

impl YamlConfigStore {
    /// Parse a YAML document.
    ///
    /// # Errors
    /// Returns `Config` if the document is malformed or a role's bounds are invalid.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: FleetConfig = serde_yaml::from_str(yaml)
            .map_err(|e| UdoError::Config(format!("Invalid configuration: {e}")))?;
        Ok(Self {
            config: config.normalize()?,
        })
    }

    /// Load a YAML file.
    ///
    /// # Errors
    /// Returns `Config` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| UdoError::Config(format!("Failed to read {}: {e}", path.display())))?;
        let store = Self::from_yaml(&yaml)?;
        debug!(
            path = %path.display(),
            clusters = store.config.clusters.len(),
            "Loaded fleet configuration"
        );
        Ok(store)
    }
}

impl ConfigStore for YamlConfigStore {
    fn get_cluster_config(&self, name: &str) -> Result<ClusterConfig> {
        self.config
            .clusters
            .get(name)
            .cloned()
            .ok_or_else(|| UdoError::UnknownCluster(name.to_string()))
    }

    fn cluster_names(&self) -> Vec<String> {
        self.config.clusters.keys().cloned().collect()
    }
}
