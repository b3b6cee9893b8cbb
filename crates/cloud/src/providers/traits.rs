//! Control-plane trait and common types.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during control-plane or deployment-service calls.
#[derive(Error, Debug)]
pub enum CloudApiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request was throttled by the provider.
    #[error("Request throttled: {0}")]
    Throttled(String),

    /// Provider is temporarily unavailable (5xx).
    #[error("Service unavailable: {status} - {message}")]
    Unavailable { status: u16, message: String },

    /// API returned a non-retryable error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Resource is still referenced by another resource.
    #[error("Resource in use: {0}")]
    InUse(String),

    /// Resource with the same name already exists.
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// XML response could not be decoded.
    #[error("XML decode error: {0}")]
    Xml(#[from] quick_xml::de::DeError),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl CloudApiError {
    /// Whether the failure is worth retrying (network trouble, throttling, 5xx).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Throttled(_) | Self::Unavailable { .. } => true,
            Self::Api { .. }
            | Self::NotFound(_)
            | Self::InUse(_)
            | Self::AlreadyExists(_)
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Xml(_)
            | Self::Auth(_) => false,
        }
    }
}

// ============================================================================
// Capacity
// ============================================================================

/// Min/max/desired instance counts of an autoscaling group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capacity {
    /// Minimum size.
    pub min: u32,
    /// Maximum size.
    pub max: u32,
    /// Desired size.
    pub desired: u32,
}

impl Capacity {
    /// Create a capacity triple.
    #[must_use]
    pub const fn new(min: u32, max: u32, desired: u32) -> Self {
        Self { min, max, desired }
    }

    /// All-zero capacity used when draining a group.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0, 0, 0)
    }

    /// Whether `desired` lies within `[min, max]`.
    #[must_use]
    pub const fn allows(&self, desired: u32) -> bool {
        self.min <= desired && desired <= self.max
    }

    /// Whether this triple is internally consistent.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.min <= self.max && self.allows(self.desired)
    }
}

impl std::fmt::Display for Capacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.min, self.desired, self.max)
    }
}

// ============================================================================
// Launch configuration types
// ============================================================================

/// Request to register a launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfigSpec {
    /// Launch configuration name (unique per region).
    pub name: String,
    /// Machine image to boot.
    pub image_id: String,
    /// Instance type/size.
    pub instance_type: String,
    /// Rendered cloud-init user data (plain text, encoded by the client).
    pub user_data: String,
    /// SSH key pair name (optional).
    pub key_name: Option<String>,
    /// Security group IDs.
    pub security_groups: Vec<String>,
    /// IAM instance profile (optional).
    pub instance_profile: Option<String>,
}

/// A registered launch configuration as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfigRecord {
    /// Launch configuration name.
    pub name: String,
    /// When the provider created it.
    pub created_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Autoscaling group types
// ============================================================================

/// Request to register an autoscaling group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpec {
    /// Group name (unique per region).
    pub name: String,
    /// Launch configuration the group boots instances from.
    pub launch_config: String,
    /// Initial capacity.
    pub capacity: Capacity,
    /// Subnets (VPC zone identifiers) to place instances in.
    pub subnets: Vec<String>,
    /// Tags propagated to instances.
    pub tags: BTreeMap<String, String>,
}

/// Health of a single group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceHealth {
    /// Instance passed its health checks and is in service.
    Healthy,
    /// Instance is booting or failing health checks.
    Unhealthy,
    /// Instance is being terminated.
    Terminating,
}

/// A member instance of an autoscaling group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInstance {
    /// Instance identifier.
    pub id: String,
    /// Current health.
    pub health: InstanceHealth,
    /// Launch configuration the instance was booted from.
    pub launch_config: Option<String>,
}

/// Current view of an autoscaling group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescription {
    /// Group name.
    pub name: String,
    /// Launch configuration currently bound to the group.
    pub launch_config: Option<String>,
    /// Current capacity settings.
    pub capacity: Capacity,
    /// Member instances.
    pub instances: Vec<GroupInstance>,
    /// When the provider created the group.
    pub created_at: Option<DateTime<Utc>>,
}

impl GroupDescription {
    /// Number of in-service, healthy instances.
    #[must_use]
    pub fn healthy_count(&self) -> u32 {
        let healthy = self
            .instances
            .iter()
            .filter(|i| i.health == InstanceHealth::Healthy)
            .count();
        u32::try_from(healthy).unwrap_or(u32::MAX)
    }
}

/// Request to provision cluster networking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpcSpec {
    /// Cluster the VPC belongs to (used as its Name tag).
    pub cluster: String,
    /// IPv4 CIDR block.
    pub cidr_block: String,
}

/// Trait for the cloud control plane that hosts launch configurations and
/// autoscaling groups.
#[async_trait]
pub trait CloudControlPlane: Send + Sync {
    // ========================================================================
    // Launch configuration operations
    // ========================================================================

    /// Register a new launch configuration, returning its name.
    async fn register_launch_config(&self, spec: LaunchConfigSpec)
        -> Result<String, CloudApiError>;

    /// Delete a launch configuration. Fails with [`CloudApiError::InUse`]
    /// while a group still references it.
    async fn delete_launch_config(&self, name: &str) -> Result<(), CloudApiError>;

    /// List launch configurations whose name starts with `prefix`.
    async fn list_launch_configs(
        &self,
        prefix: &str,
    ) -> Result<Vec<LaunchConfigRecord>, CloudApiError>;

    // ========================================================================
    // Autoscaling group operations
    // ========================================================================

    /// Register a new autoscaling group, returning its name.
    async fn register_group(&self, spec: GroupSpec) -> Result<String, CloudApiError>;

    /// Delete an autoscaling group.
    async fn delete_group(&self, name: &str) -> Result<(), CloudApiError>;

    /// Set the desired capacity of a group.
    async fn set_desired_capacity(&self, name: &str, desired: u32) -> Result<(), CloudApiError>;

    /// Replace min/max/desired of a group in one call.
    async fn update_capacity(&self, name: &str, capacity: Capacity)
        -> Result<(), CloudApiError>;

    /// Describe a group.
    async fn describe_group(&self, name: &str) -> Result<GroupDescription, CloudApiError>;

    /// List the names of groups whose name starts with `prefix`.
    async fn list_groups(&self, prefix: &str) -> Result<Vec<String>, CloudApiError>;

    /// Whether [`CloudControlPlane::attach_launch_config`] is supported.
    fn supports_live_reattach(&self) -> bool;

    /// Rebind a live group to another launch configuration.
    async fn attach_launch_config(
        &self,
        group: &str,
        launch_config: &str,
    ) -> Result<(), CloudApiError>;

    // ========================================================================
    // Networking
    // ========================================================================

    /// Ensure a VPC exists for the cluster, returning its ID.
    async fn ensure_vpc(&self, spec: VpcSpec) -> Result<String, CloudApiError>;
}
