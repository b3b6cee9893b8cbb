//! Code deployments against resolved cluster roles.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use udo_cloud::{CreateDeploymentRequest, DeploymentGroupSummary, DeploymentService, DeploymentState};
use udo_notify::{FleetEvent, Notifier};

use crate::config::ConfigStore;
use crate::error::{Result, UdoError};
use crate::resolve::{resolve, ResolvedTarget};
use crate::retry::{with_retry, RetryError, RetryPolicy};

/// Status of a deployment as tracked by udo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Stopped,
    /// Status could not be obtained before the polling deadline.
    TimedOut,
}

impl DeploymentStatus {
    /// Final statuses reported by the service. These are never re-queried.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Stopped)
    }
}

impl From<DeploymentState> for DeploymentStatus {
    fn from(state: DeploymentState) -> Self {
        match state {
            DeploymentState::Created | DeploymentState::Queued | DeploymentState::Unknown => {
                Self::Pending
            }
            DeploymentState::InProgress | DeploymentState::Baking | DeploymentState::Ready => {
                Self::InProgress
            }
            DeploymentState::Succeeded => Self::Succeeded,
            DeploymentState::Failed => Self::Failed,
            DeploymentState::Stopped => Self::Stopped,
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// A submitted deployment. Only `status` changes after creation.
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub id: String,
    pub cluster: String,
    pub role: String,
    pub application: String,
    pub group: String,
    pub revision: String,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
}

/// Deployment application and group for a target.
///
/// # Errors
/// Returns `Config` when neither the role nor the cluster names an application.
pub fn deployment_names(target: &ResolvedTarget) -> Result<(String, String)> {
    let application = target
        .role
        .deploy
        .application
        .clone()
        .or_else(|| target.cluster.application.clone())
        .ok_or_else(|| {
            UdoError::Config(format!("No deployment application configured for {}", target.key()))
        })?;
    let group = target
        .role
        .deploy
        .group
        .clone()
        .unwrap_or_else(|| format!("{}-{}", target.cluster.name, target.role.name));
    Ok((application, group))
}

/// Creates and tracks deployments.
pub struct DeploymentCoordinator {
    config: Arc<dyn ConfigStore>,
    service: Arc<dyn DeploymentService>,
    notifier: Notifier,
    retry: RetryPolicy,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl DeploymentCoordinator {
    #[must_use]
    pub fn new(
        config: Arc<dyn ConfigStore>,
        service: Arc<dyn DeploymentService>,
        notifier: Notifier,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            config,
            service,
            notifier,
            retry,
            poll_interval: Duration::from_secs(15),
            wait_timeout: Duration::from_secs(1800),
        }
    }

    /// Interval and overall budget used by [`Self::wait`].
    #[must_use]
    pub fn with_wait(mut self, poll_interval: Duration, wait_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.wait_timeout = wait_timeout;
        self
    }

    /// Resolve the target and submit a deployment of `commit`.
    ///
    /// # Errors
    /// Resolution errors, `Config` for missing deployment names, `Cloud` if
    /// the service rejects the request.
    pub async fn create(&self, cluster: &str, role: Option<&str>, commit: &str) -> Result<Deployment> {
        let target = resolve(self.config.as_ref(), cluster, role)?;
        if let Some(notice) = &target.notice {
            info!("{notice}");
        }
        self.create_for(&target, commit).await
    }

    /// Submit a deployment for an already resolved target.
    ///
    /// # Errors
    /// Same as [`Self::create`].
    pub async fn create_for(&self, target: &ResolvedTarget, commit: &str) -> Result<Deployment> {
        let (application, group) = deployment_names(target)?;
        let request = CreateDeploymentRequest {
            application: application.clone(),
            group: group.clone(),
            revision: commit.to_string(),
            repository: target.cluster.repository.clone(),
        };

        let service = self.service.as_ref();
        let id = with_retry(&self.retry, "create deployment", || {
            service.create_deployment(request.clone())
        })
        .await?;

        info!(
            role = %target.key(),
            application = %application,
            group = %group,
            commit,
            deployment_id = %id,
            "Deployment created"
        );

        self.notifier.notify(FleetEvent::DeploymentCreated {
            cluster: target.cluster.name.clone(),
            role: target.role.name.clone(),
            application: application.clone(),
            group: group.clone(),
            commit: commit.to_string(),
            deployment_id: id.clone(),
            timestamp: Utc::now(),
        });

        Ok(Deployment {
            id,
            cluster: target.cluster.name.clone(),
            role: target.role.name.clone(),
            application,
            group,
            revision: commit.to_string(),
            status: DeploymentStatus::Pending,
            created_at: Utc::now(),
        })
    }

    /// Refresh a deployment's status.
    ///
    /// Terminal deployments are returned as-is. Transient failures are
    /// retried within the retry policy's deadline; once it passes the
    /// deployment becomes `TimedOut`.
    ///
    /// # Errors
    /// Returns `Cloud` on a permanent service error.
    pub async fn poll_status(&self, deployment: &mut Deployment) -> Result<DeploymentStatus> {
        if deployment.status.is_terminal() {
            return Ok(deployment.status);
        }

        let service = self.service.as_ref();
        let id = deployment.id.as_str();
        match with_retry(&self.retry, "get deployment status", || service.get_status(id)).await {
            Ok(state) => {
                deployment.status = state.into();
                debug!(deployment_id = %id, status = %deployment.status, "Deployment status");
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(deployment_id = %id, attempts, error = %last, "Deployment status unavailable");
                deployment.status = DeploymentStatus::TimedOut;
            }
            Err(RetryError::Permanent(e)) => return Err(e.into()),
        }
        Ok(deployment.status)
    }

    /// Poll until the deployment is terminal or the wait budget runs out.
    ///
    /// # Errors
    /// Returns `Cloud` on a permanent service error.
    pub async fn wait(&self, deployment: &mut Deployment) -> Result<DeploymentStatus> {
        let start = Instant::now();
        loop {
            let status = self.poll_status(deployment).await?;
            if status.is_terminal() || status == DeploymentStatus::TimedOut {
                return Ok(status);
            }
            if start.elapsed() >= self.wait_timeout {
                warn!(deployment_id = %deployment.id, "Gave up waiting for deployment");
                deployment.status = DeploymentStatus::TimedOut;
                return Ok(deployment.status);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    // =========================================================================
    // Listings
    // =========================================================================

    /// # Errors
    /// Returns `Cloud` if the service cannot be queried.
    pub async fn list_applications(&self) -> Result<Vec<String>> {
        let service = self.service.as_ref();
        Ok(with_retry(&self.retry, "list applications", || service.list_applications()).await?)
    }

    /// # Errors
    /// Returns `Cloud` if the service cannot be queried.
    pub async fn list_groups(&self, application: Option<&str>) -> Result<Vec<DeploymentGroupSummary>> {
        let service = self.service.as_ref();
        Ok(with_retry(&self.retry, "list deployment groups", || {
            service.list_deployment_groups(application)
        })
        .await?)
    }

    /// # Errors
    /// Returns `Cloud` if the service cannot be queried.
    pub async fn list_configs(&self) -> Result<Vec<String>> {
        let service = self.service.as_ref();
        Ok(with_retry(&self.retry, "list deployment configs", || service.list_configs()).await?)
    }

    /// # Errors
    /// Returns `Cloud` if the service cannot be queried.
    pub async fn list_deployments(&self) -> Result<Vec<String>> {
        let service = self.service.as_ref();
        Ok(with_retry(&self.retry, "list deployments", || service.list_deployments()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::YamlConfigStore;

    #[test]
    fn test_state_mapping() {
        assert_eq!(DeploymentStatus::from(DeploymentState::Queued), DeploymentStatus::Pending);
        assert_eq!(DeploymentStatus::from(DeploymentState::Baking), DeploymentStatus::InProgress);
        assert_eq!(DeploymentStatus::from(DeploymentState::Stopped), DeploymentStatus::Stopped);
        assert!(!DeploymentStatus::TimedOut.is_terminal());
        assert!(DeploymentStatus::Failed.is_terminal());
    }

    #[test]
    fn test_deployment_names() {
        let store = YamlConfigStore::from_yaml(
            r"
clusters:
  prod:
    application: shop
    roles:
      web:
        image_id: ami-1
        instance_type: t3.small
        capacity: { min: 1, max: 2, desired: 1 }
      api:
        image_id: ami-1
        instance_type: t3.small
        capacity: { min: 1, max: 2, desired: 1 }
        deploy: { application: api, group: prod-api-green }
  bare:
    roles:
      web:
        image_id: ami-1
        instance_type: t3.small
        capacity: { min: 1, max: 2, desired: 1 }
",
        )
        .unwrap();

        let web = resolve(&store, "prod", Some("web")).unwrap();
        assert_eq!(
            deployment_names(&web).unwrap(),
            ("shop".to_string(), "prod-web".to_string())
        );

        let api = resolve(&store, "prod", Some("api")).unwrap();
        assert_eq!(
            deployment_names(&api).unwrap(),
            ("api".to_string(), "prod-api-green".to_string())
        );

        let bare = resolve(&store, "bare", None).unwrap();
        assert!(matches!(deployment_names(&bare), Err(UdoError::Config(_))));
    }
}
