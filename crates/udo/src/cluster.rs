//! Cluster-wide operations fanned out across roles.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use udo_cloud::{CloudControlPlane, VpcSpec};
use udo_notify::{FleetEvent, Notifier};

use crate::asgroup::{AutoscaleGroupManager, RoleStatus};
use crate::config::ConfigStore;
use crate::error::{Result, UdoError};
use crate::resolve::ResolvedTarget;
use crate::retry::{with_retry, RetryPolicy};

/// A configured cluster and its roles.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub name: String,
    pub roles: Vec<String>,
}

/// Per-role results of bringing up a cluster.
#[derive(Debug)]
pub struct ClusterCreateReport {
    pub cluster: String,
    pub vpc_id: String,
    pub roles: BTreeMap<String, Result<RoleStatus>>,
}

impl ClusterCreateReport {
    /// Whether every role was created.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.roles.values().all(std::result::Result::is_ok)
    }

    /// Names of roles that failed.
    #[must_use]
    pub fn failed_roles(&self) -> Vec<String> {
        self.roles
            .iter()
            .filter(|(_, result)| result.is_err())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Per-role state of a cluster.
#[derive(Debug)]
pub struct ClusterStatus {
    pub cluster: String,
    pub roles: BTreeMap<String, Result<RoleStatus>>,
}

impl ClusterStatus {
    /// Every role is active with all desired instances healthy. A cluster
    /// with no roles is never healthy.
    #[must_use]
    pub fn healthy(&self) -> bool {
        !self.roles.is_empty()
            && self
                .roles
                .values()
                .all(|status| status.as_ref().is_ok_and(RoleStatus::is_healthy))
    }
}

/// Composes group management per cluster.
pub struct ClusterOrchestrator {
    config: Arc<dyn ConfigStore>,
    cloud: Arc<dyn CloudControlPlane>,
    groups: Arc<AutoscaleGroupManager>,
    notifier: Notifier,
    retry: RetryPolicy,
}

impl ClusterOrchestrator {
    #[must_use]
    pub fn new(
        config: Arc<dyn ConfigStore>,
        cloud: Arc<dyn CloudControlPlane>,
        groups: Arc<AutoscaleGroupManager>,
        notifier: Notifier,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            config,
            cloud,
            groups,
            notifier,
            retry,
        }
    }

    /// Configured clusters.
    #[must_use]
    pub fn list(&self) -> Vec<ClusterSummary> {
        self.config
            .cluster_names()
            .into_iter()
            .filter_map(|name| self.config.get_cluster_config(&name).ok())
            .map(|cluster| ClusterSummary {
                roles: cluster.role_names(),
                name: cluster.name,
            })
            .collect()
    }

    /// Provision networking, then create every role's group.
    ///
    /// Roles are created concurrently and independently; the report keeps
    /// each role's outcome.
    ///
    /// # Errors
    /// `UnknownCluster`, `Config` for a cluster without roles, or `Cloud` if
    /// networking cannot be provisioned.
    pub async fn create(&self, cluster: &str) -> Result<ClusterCreateReport> {
        let mut cluster_config = self.config.get_cluster_config(cluster)?;
        if cluster_config.roles.is_empty() {
            return Err(UdoError::Config(format!("Cluster {cluster} defines no roles")));
        }

        let vpc_id = if let Some(vpc_id) = &cluster_config.vpc_id {
            vpc_id.clone()
        } else {
            let cloud = self.cloud.as_ref();
            let spec = VpcSpec {
                cluster: cluster_config.name.clone(),
                cidr_block: cluster_config.vpc_cidr.clone(),
            };
            with_retry(&self.retry, "ensure vpc", || cloud.ensure_vpc(spec.clone())).await?
        };
        info!(cluster, vpc_id = %vpc_id, roles = cluster_config.roles.len(), "Creating cluster");
        // Role boot data must name the network the roles launch into.
        cluster_config.vpc_id = Some(vpc_id.clone());

        let creations = cluster_config.roles.keys().map(|role| {
            let cluster_config = &cluster_config;
            async move {
                let result = match ResolvedTarget::for_role(cluster_config, role) {
                    Ok(target) => self.groups.create(&target).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = &result {
                    warn!(cluster = %cluster_config.name, role = %role, error = %e, "Role creation failed");
                }
                (role.clone(), result)
            }
        });
        let roles: BTreeMap<_, _> = join_all(creations).await.into_iter().collect();

        let report = ClusterCreateReport {
            cluster: cluster_config.name.clone(),
            vpc_id,
            roles,
        };

        self.notifier.notify(FleetEvent::ClusterCreated {
            cluster: report.cluster.clone(),
            succeeded: report
                .roles
                .iter()
                .filter(|(_, r)| r.is_ok())
                .map(|(name, _)| name.clone())
                .collect(),
            failed: report.failed_roles(),
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    /// Status of every role in the cluster.
    ///
    /// # Errors
    /// Returns `UnknownCluster` if the cluster is not configured.
    pub async fn status(&self, cluster: &str) -> Result<ClusterStatus> {
        let cluster_config = self.config.get_cluster_config(cluster)?;

        let lookups = cluster_config.roles.keys().map(|role| {
            let cluster_config = &cluster_config;
            async move {
                let result = match ResolvedTarget::for_role(cluster_config, role) {
                    Ok(target) => self.groups.status(&target).await,
                    Err(e) => Err(e),
                };
                (role.clone(), result)
            }
        });
        let roles = join_all(lookups).await.into_iter().collect();

        Ok(ClusterStatus {
            cluster: cluster_config.name.clone(),
            roles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cluster_is_not_healthy() {
        let status = ClusterStatus {
            cluster: "qa".to_string(),
            roles: BTreeMap::new(),
        };
        assert!(!status.healthy());
    }

    #[test]
    fn test_failed_role_is_not_healthy() {
        let mut roles = BTreeMap::new();
        roles.insert(
            "web".to_string(),
            Err(UdoError::NotFound("qa-web-v1".to_string())),
        );
        let status = ClusterStatus {
            cluster: "qa".to_string(),
            roles,
        };
        assert!(!status.healthy());
    }
}
