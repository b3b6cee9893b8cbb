//! Resolution of `(cluster, role?)` arguments into a concrete target.

use tracing::debug;

use crate::config::{ClusterConfig, ConfigStore, RoleConfig};
use crate::error::{Result, UdoError};
use crate::lease::RoleKey;

/// A configured cluster role selected by the caller.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub cluster: ClusterConfig,
    pub role: RoleConfig,
    /// Informational message when the role was picked implicitly.
    pub notice: Option<String>,
}

impl ResolvedTarget {
    /// Target a named role of an already loaded cluster.
    ///
    /// # Errors
    /// Returns `UnknownRole` if the cluster has no such role.
    pub fn for_role(cluster: &ClusterConfig, role: &str) -> Result<Self> {
        let role_config = cluster
            .roles
            .get(role)
            .cloned()
            .ok_or_else(|| UdoError::UnknownRole {
                cluster: cluster.name.clone(),
                role: role.to_string(),
            })?;

        Ok(Self {
            cluster: cluster.clone(),
            role: role_config,
            notice: None,
        })
    }

    #[must_use]
    pub fn key(&self) -> RoleKey {
        RoleKey::new(&self.cluster.name, &self.role.name)
    }
}

/// Resolve a cluster and optional role.
///
/// An omitted role is inferred only when the cluster has exactly one.
///
/// # Errors
/// `UnknownCluster`, `UnknownRole`, `AmbiguousRole` (roles listed in sorted
/// order) or `Config` when the cluster defines no roles.
pub fn resolve(store: &dyn ConfigStore, cluster: &str, role: Option<&str>) -> Result<ResolvedTarget> {
    let cluster_config = store.get_cluster_config(cluster)?;

    if let Some(role) = role {
        return ResolvedTarget::for_role(&cluster_config, role);
    }

    let roles = cluster_config.role_names();
    match roles.as_slice() {
        [] => Err(UdoError::Config(format!(
            "Cluster {cluster} defines no roles"
        ))),
        [only] => {
            let notice = format!("No role specified, assuming {only}");
            debug!(cluster, role = %only, "Role inferred");
            let mut target = ResolvedTarget::for_role(&cluster_config, only)?;
            target.notice = Some(notice);
            Ok(target)
        }
        _ => Err(UdoError::AmbiguousRole {
            cluster: cluster.to_string(),
            roles,
        }),
    }
}
