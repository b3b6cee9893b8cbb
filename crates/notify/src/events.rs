//! Notification event types for fleet operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - normal operations
    Info,
    /// Warning - something needs attention
    Warning,
    /// Critical - immediate action required
    Critical,
}

impl Severity {
    /// Get the Slack attachment color for this severity.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Info => "#3498db",
            Self::Warning => "#f39c12",
            Self::Critical => "#e74c3c",
        }
    }

    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

/// Events that can trigger notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    /// A role's instances were rotated onto a new launch configuration.
    RotationCompleted {
        cluster: String,
        role: String,
        from_version: u32,
        to_version: u32,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A rotation was abandoned and the previous group kept.
    RotationRolledBack {
        cluster: String,
        role: String,
        reason: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A code deployment was submitted.
    DeploymentCreated {
        cluster: String,
        role: String,
        application: String,
        group: String,
        commit: String,
        deployment_id: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A cluster was brought up.
    ClusterCreated {
        cluster: String,
        succeeded: Vec<String>,
        failed: Vec<String>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// Manual test message.
    IntegrationTest {
        message: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl FleetEvent {
    /// One-line title for the event.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::RotationCompleted { cluster, role, .. } => {
                format!("Rotation Completed: {cluster}/{role}")
            }
            Self::RotationRolledBack { cluster, role, .. } => {
                format!("Rotation Rolled Back: {cluster}/{role}")
            }
            Self::DeploymentCreated { cluster, role, .. } => {
                format!("Deployment Created: {cluster}/{role}")
            }
            Self::ClusterCreated { cluster, .. } => format!("Cluster Created: {cluster}"),
            Self::IntegrationTest { .. } => "Integration Test".to_string(),
        }
    }

    /// Severity of the event.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::RotationRolledBack { .. } => Severity::Warning,
            Self::ClusterCreated { failed, .. } if !failed.is_empty() => Severity::Critical,
            _ => Severity::Info,
        }
    }

    /// When the event happened.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::RotationCompleted { timestamp, .. }
            | Self::RotationRolledBack { timestamp, .. }
            | Self::DeploymentCreated { timestamp, .. }
            | Self::ClusterCreated { timestamp, .. }
            | Self::IntegrationTest { timestamp, .. } => *timestamp,
        }
    }
}
