//! Deployment-service trait and common types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::traits::CloudApiError;

/// Deployment status as reported by the deployment service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Deployment accepted, not yet scheduled.
    Created,
    /// Waiting behind another deployment.
    Queued,
    /// Revision is being rolled out.
    InProgress,
    /// Rolled out, waiting out a bake period.
    Baking,
    /// Blue/green replacement ready for traffic.
    Ready,
    /// Deployment finished successfully.
    Succeeded,
    /// Deployment failed.
    Failed,
    /// Deployment was stopped.
    Stopped,
    /// Unknown status.
    #[serde(other)]
    Unknown,
}

impl DeploymentState {
    /// Parse the status string used by the service.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "Created" => Self::Created,
            "Queued" => Self::Queued,
            "InProgress" => Self::InProgress,
            "Baking" => Self::Baking,
            "Ready" => Self::Ready,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Queued => write!(f, "queued"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Baking => write!(f, "baking"),
            Self::Ready => write!(f, "ready"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A deployment group and the application it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentGroupSummary {
    /// Application name.
    pub application: String,
    /// Deployment group name.
    pub name: String,
}

/// Request to deploy a revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeploymentRequest {
    /// Application name.
    pub application: String,
    /// Deployment group name.
    pub group: String,
    /// Commit id of the revision to deploy.
    pub revision: String,
    /// Source repository (`owner/name`) for the revision, when configured.
    pub repository: Option<String>,
}

/// Trait for the code deployment service.
#[async_trait]
pub trait DeploymentService: Send + Sync {
    /// Submit a deployment, returning its id.
    async fn create_deployment(
        &self,
        req: CreateDeploymentRequest,
    ) -> Result<String, CloudApiError>;

    /// Current status of a deployment.
    async fn get_status(&self, deployment_id: &str) -> Result<DeploymentState, CloudApiError>;

    /// List application names.
    async fn list_applications(&self) -> Result<Vec<String>, CloudApiError>;

    /// List deployment groups, optionally restricted to one application.
    async fn list_deployment_groups(
        &self,
        application: Option<&str>,
    ) -> Result<Vec<DeploymentGroupSummary>, CloudApiError>;

    /// List deployment configuration names.
    async fn list_configs(&self) -> Result<Vec<String>, CloudApiError>;

    /// List deployment ids.
    async fn list_deployments(&self) -> Result<Vec<String>, CloudApiError>;
}
