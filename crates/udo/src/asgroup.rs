//! Autoscaling group lifecycle per role.
//!
//! Groups are named `{cluster}-{role}-v{version}` after the launch
//! configuration they were created with. A role normally has one group; two
//! coexist only while a rotation is bringing up a replacement. The cloud is
//! the source of truth for which groups exist; transient phases
//! (`Provisioning`, `Rotating`, `RolledBack`) are tracked in memory while an
//! operation runs and cleared when it returns.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use udo_cloud::{Capacity, CloudControlPlane, GroupDescription, GroupSpec};
use udo_notify::{FleetEvent, Notifier};

use crate::error::{Result, UdoError};
use crate::launch_config::{role_prefix, version_of, Activation, LaunchConfigManager, LaunchConfigVersion};
use crate::lease::{Operation, RoleKey, RoleLeases};
use crate::resolve::ResolvedTarget;
use crate::retry::{with_retry, RetryPolicy};
use crate::settings::Settings;

/// Lifecycle state of a role's instance group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    Absent,
    Provisioning,
    Active,
    Rotating,
    RolledBack,
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Active => write!(f, "active"),
            Self::Rotating => write!(f, "rotating"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Snapshot of a role's group.
#[derive(Debug, Clone, Serialize)]
pub struct RoleStatus {
    pub role: String,
    pub state: GroupState,
    /// Version of the launch configuration bound to the active group.
    pub current_version: Option<u32>,
    pub groups: Vec<String>,
    pub capacity: Capacity,
    /// Healthy instances across all of the role's groups.
    pub healthy_instance_count: u32,
}

impl RoleStatus {
    fn absent(key: &RoleKey, state: GroupState) -> Self {
        Self {
            role: key.to_string(),
            state,
            current_version: None,
            groups: vec![],
            capacity: Capacity::zero(),
            healthy_instance_count: 0,
        }
    }

    #[must_use]
    pub fn desired_capacity(&self) -> u32 {
        self.capacity.desired
    }

    /// Active with every desired instance healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == GroupState::Active && self.healthy_instance_count == self.capacity.desired
    }
}

/// Healthy counts observed at one rotation poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSample {
    pub elapsed: Duration,
    pub old_healthy: u32,
    pub new_healthy: u32,
}

/// Outcome of a completed rotation.
#[derive(Debug, Clone, Serialize)]
pub struct RotationReport {
    pub role: String,
    pub old_group: String,
    pub new_group: String,
    pub from_version: Option<u32>,
    pub to_version: u32,
    pub desired: u32,
    pub samples: Vec<HealthSample>,
    pub elapsed: Duration,
}

/// Outcome of [`AutoscaleGroupManager::update_lc`].
#[derive(Debug, Clone)]
pub enum LaunchConfigUpdate {
    /// The group already uses a launch configuration matching the role.
    Unchanged { launch_config: String },
    /// The launch configuration was swapped in place.
    Reattached {
        group: String,
        from: Option<String>,
        to: String,
    },
    /// Instances were moved to a new group.
    Rotated(RotationReport),
}

/// Outcome of [`AutoscaleGroupManager::destroy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    AlreadyAbsent,
    Destroyed { groups: Vec<String> },
}

/// Timeouts governing group operations.
#[derive(Debug, Clone)]
pub struct RotationSettings {
    pub rotation_timeout: Duration,
    pub poll_interval: Duration,
    pub drain_timeout: Duration,
}

impl From<&Settings> for RotationSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            rotation_timeout: settings.rotation_timeout,
            poll_interval: settings.poll_interval,
            drain_timeout: settings.drain_timeout,
        }
    }
}

/// Group name for a version.
#[must_use]
pub fn group_name(cluster: &str, role: &str, version: u32) -> String {
    format!("{}{version}", role_prefix(cluster, role))
}

fn parse_group_version(prefix: &str, name: &str) -> Option<u32> {
    let version = name.strip_prefix(prefix)?;
    if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    version.parse().ok()
}

/// A group observed for a role.
#[derive(Debug, Clone)]
struct RoleGroup {
    version: u32,
    name: String,
}

/// Artifacts created by an in-flight rotation.
#[derive(Debug, Default)]
struct Rollout {
    launch_config: Option<LaunchConfigVersion>,
    owns_launch_config: bool,
    group: Option<String>,
    samples: Vec<HealthSample>,
}

type PhaseTable = RwLock<HashMap<RoleKey, GroupState>>;

/// Recorded phase for a role; cleared on drop.
struct PhaseGuard<'a> {
    table: &'a PhaseTable,
    key: RoleKey,
}

impl PhaseGuard<'_> {
    fn set(&self, state: GroupState) {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.key.clone(), state);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Owns the state machine of every role's instance group.
pub struct AutoscaleGroupManager {
    cloud: Arc<dyn CloudControlPlane>,
    launch_configs: Arc<LaunchConfigManager>,
    leases: RoleLeases,
    phases: PhaseTable,
    notifier: Notifier,
    settings: RotationSettings,
    retry: RetryPolicy,
}

impl AutoscaleGroupManager {
    #[must_use]
    pub fn new(
        cloud: Arc<dyn CloudControlPlane>,
        launch_configs: Arc<LaunchConfigManager>,
        notifier: Notifier,
        settings: RotationSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            cloud,
            launch_configs,
            leases: RoleLeases::new(),
            phases: RwLock::new(HashMap::new()),
            notifier,
            settings,
            retry,
        }
    }

    /// Lease table guarding mutating operations.
    #[must_use]
    pub fn leases(&self) -> &RoleLeases {
        &self.leases
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Create the role's group.
    ///
    /// # Errors
    /// `AlreadyExists` if the role has a group; on any later failure the
    /// partially created group and launch configuration are removed.
    pub async fn create(&self, target: &ResolvedTarget) -> Result<RoleStatus> {
        let key = target.key();
        let _lease = self.leases.acquire(&key, Operation::Create)?;

        if let Some(existing) = self.observe(target).await?.first() {
            return Err(UdoError::AlreadyExists(existing.name.clone()));
        }

        let _phase = self.enter_phase(&key, GroupState::Provisioning);
        info!(role = %key, capacity = %target.role.capacity, "Creating group");

        let activation = self.launch_configs.activate(target).await?;
        let name = group_name(&key.cluster, &key.role, activation.version.version);
        let spec = self.group_spec(target, &name, &activation.version.name, target.role.capacity);

        match self.register_and_confirm(spec).await {
            Ok(description) => {
                info!(
                    role = %key,
                    group = %name,
                    launch_config = %activation.version.name,
                    "Group active"
                );
                Ok(RoleStatus {
                    role: key.to_string(),
                    state: GroupState::Active,
                    current_version: Some(activation.version.version),
                    groups: vec![name],
                    capacity: description.capacity,
                    healthy_instance_count: description.healthy_count(),
                })
            }
            Err(e) => {
                warn!(role = %key, group = %name, error = %e, "Group creation failed, cleaning up");
                // A conflicting name belongs to whoever registered it first.
                if !matches!(e, UdoError::AlreadyExists(_)) {
                    self.discard_group(&name).await;
                }
                if activation.created {
                    self.retire_launch_config(&activation.version.name).await;
                }
                Err(e)
            }
        }
    }

    /// Remove the role's groups and their launch configurations.
    ///
    /// # Errors
    /// `TimedOut` if instances do not terminate within the drain timeout.
    pub async fn destroy(&self, target: &ResolvedTarget) -> Result<DestroyOutcome> {
        let key = target.key();
        let _lease = self.leases.acquire(&key, Operation::Destroy)?;

        let groups = self.observe(target).await?;
        if groups.is_empty() {
            info!(role = %key, "No group to destroy");
            return Ok(DestroyOutcome::AlreadyAbsent);
        }

        let mut destroyed = Vec::with_capacity(groups.len());
        for group in groups.iter().rev() {
            let launch_config = match self.describe(&group.name).await {
                Ok(description) => description.launch_config,
                Err(UdoError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            info!(role = %key, group = %group.name, "Destroying group");
            self.teardown_group(&group.name).await?;
            if let Some(launch_config) = launch_config {
                self.retire_launch_config(&launch_config).await;
            }
            destroyed.push(group.name.clone());
        }

        Ok(DestroyOutcome::Destroyed { groups: destroyed })
    }

    /// Replace the role's group with one built from a new launch configuration.
    ///
    /// # Errors
    /// `RotationInProgress` if another rotation holds the role, `NotFound` if
    /// the role has no group, `RotationFailure` after a completed rollback.
    pub async fn reload(&self, target: &ResolvedTarget) -> Result<RotationReport> {
        let key = target.key();
        let _lease = self.leases.acquire(&key, Operation::Reload)?;

        let current = self.single_group(target).await?;
        self.rotate(target, &current, None).await
    }

    /// Bind the role's group to a launch configuration matching its definition.
    ///
    /// Swaps in place when the provider supports it, otherwise rotates.
    ///
    /// # Errors
    /// Same as [`Self::reload`].
    pub async fn update_lc(&self, target: &ResolvedTarget) -> Result<LaunchConfigUpdate> {
        let key = target.key();
        let _lease = self.leases.acquire(&key, Operation::UpdateLaunchConfig)?;

        let current = self.single_group(target).await?;
        let description = self.describe(&current.name).await?;
        let activation = self.launch_configs.activate(target).await?;

        if description.launch_config.as_deref() == Some(activation.version.name.as_str()) {
            info!(role = %key, launch_config = %activation.version.name, "Launch configuration unchanged");
            return Ok(LaunchConfigUpdate::Unchanged {
                launch_config: activation.version.name,
            });
        }

        if !self.cloud.supports_live_reattach() {
            info!(role = %key, "Provider cannot swap launch configurations in place, rotating");
            return self
                .rotate(target, &current, Some(activation))
                .await
                .map(LaunchConfigUpdate::Rotated);
        }

        let _phase = self.enter_phase(&key, GroupState::Rotating);
        let cloud = self.cloud.as_ref();
        let new_name = activation.version.name.as_str();
        if let Err(e) = with_retry(&self.retry, "attach launch configuration", || {
            cloud.attach_launch_config(&current.name, new_name)
        })
        .await
        {
            if activation.created {
                self.retire_launch_config(new_name).await;
            }
            return Err(e.into());
        }

        if let Some(old) = &description.launch_config {
            self.retire_launch_config(old).await;
        }
        info!(role = %key, group = %current.name, launch_config = %new_name, "Launch configuration swapped");

        Ok(LaunchConfigUpdate::Reattached {
            group: current.name,
            from: description.launch_config,
            to: activation.version.name,
        })
    }

    /// Set the role's desired capacity.
    ///
    /// # Errors
    /// `ScaleOutOfBounds` (capacity untouched) unless `min <= desired <= max`.
    pub async fn scale(&self, target: &ResolvedTarget, desired: u32) -> Result<Capacity> {
        let key = target.key();
        let _lease = self.leases.acquire(&key, Operation::Scale)?;

        let group = self.single_group(target).await?;
        let capacity = self.describe(&group.name).await?.capacity;
        if !capacity.allows(desired) {
            return Err(UdoError::ScaleOutOfBounds {
                desired,
                min: capacity.min,
                max: capacity.max,
            });
        }

        let cloud = self.cloud.as_ref();
        with_retry(&self.retry, "set desired capacity", || {
            cloud.set_desired_capacity(&group.name, desired)
        })
        .await?;
        info!(role = %key, group = %group.name, from = capacity.desired, to = desired, "Scaled group");

        Ok(Capacity { desired, ..capacity })
    }

    /// Current state of the role. Takes no lease.
    ///
    /// # Errors
    /// Returns `Cloud` if the provider cannot be queried.
    pub async fn status(&self, target: &ResolvedTarget) -> Result<RoleStatus> {
        let key = target.key();
        let groups = self.observe(target).await?;
        let phase = self
            .phases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied();

        let Some(active) = groups.first() else {
            return Ok(RoleStatus::absent(&key, phase.unwrap_or(GroupState::Absent)));
        };

        let description = self.describe(&active.name).await?;
        let mut healthy = description.healthy_count();
        for other in &groups[1..] {
            healthy += self.describe(&other.name).await?.healthy_count();
        }

        let observed = if groups.len() > 1 {
            GroupState::Rotating
        } else {
            GroupState::Active
        };

        Ok(RoleStatus {
            role: key.to_string(),
            state: phase.unwrap_or(observed),
            current_version: description
                .launch_config
                .as_deref()
                .and_then(|lc| version_of(&key.cluster, &key.role, lc)),
            groups: groups.into_iter().map(|g| g.name).collect(),
            capacity: description.capacity,
            healthy_instance_count: healthy,
        })
    }

    // =========================================================================
    // Rotation
    // =========================================================================

    async fn rotate(
        &self,
        target: &ResolvedTarget,
        current: &RoleGroup,
        prepared: Option<Activation>,
    ) -> Result<RotationReport> {
        let key = target.key();
        let old = self.describe(&current.name).await?;
        let from_version = old
            .launch_config
            .as_deref()
            .and_then(|lc| version_of(&key.cluster, &key.role, lc));

        let phase = self.enter_phase(&key, GroupState::Rotating);
        let start = Instant::now();
        let mut rollout = Rollout::default();

        if let Err(e) = self.bring_up(target, &old, prepared, &mut rollout).await {
            phase.set(GroupState::RolledBack);
            warn!(role = %key, error = %e, "Rotation failed, rolling back");
            self.roll_back(&rollout).await?;

            self.notifier.notify(FleetEvent::RotationRolledBack {
                cluster: key.cluster.clone(),
                role: key.role.clone(),
                reason: e.to_string(),
                timestamp: Utc::now(),
            });
            return Err(UdoError::RotationFailure {
                role: key.to_string(),
                reason: e.to_string(),
            });
        }

        let (Some(new_version), Some(new_group)) = (rollout.launch_config, rollout.group) else {
            return Err(UdoError::Config(format!("{key}: rotation finished without a new group")));
        };

        info!(role = %key, old_group = %old.name, new_group = %new_group, "New group healthy, retiring old group");
        self.teardown_group(&old.name).await?;
        if let Some(launch_config) = &old.launch_config {
            self.retire_launch_config(launch_config).await;
        }

        let report = RotationReport {
            role: key.to_string(),
            old_group: old.name,
            new_group,
            from_version,
            to_version: new_version.version,
            desired: old.capacity.desired,
            samples: rollout.samples,
            elapsed: start.elapsed(),
        };
        info!(
            role = %key,
            to_version = report.to_version,
            elapsed_secs = report.elapsed.as_secs(),
            "Rotation completed"
        );

        self.notifier.notify(FleetEvent::RotationCompleted {
            cluster: key.cluster.clone(),
            role: key.role.clone(),
            from_version: from_version.unwrap_or_default(),
            to_version: report.to_version,
            timestamp: Utc::now(),
        });
        Ok(report)
    }

    /// Register the replacement group and wait until it is fully healthy.
    async fn bring_up(
        &self,
        target: &ResolvedTarget,
        old: &GroupDescription,
        prepared: Option<Activation>,
        rollout: &mut Rollout,
    ) -> Result<()> {
        let key = target.key();
        let version = match prepared {
            Some(activation) => {
                rollout.owns_launch_config = activation.created;
                activation.version
            }
            None => {
                let version = self.launch_configs.create_version(target).await?;
                rollout.owns_launch_config = true;
                version
            }
        };

        let name = group_name(&key.cluster, &key.role, version.version);
        let spec = self.group_spec(target, &name, &version.name, old.capacity);
        rollout.launch_config = Some(version);

        let cloud = self.cloud.as_ref();
        with_retry(&self.retry, "register group", || cloud.register_group(spec.clone())).await?;
        rollout.group = Some(name.clone());
        info!(role = %key, old_group = %old.name, new_group = %name, capacity = %old.capacity, "Rotating");

        let desired = old.capacity.desired;
        let start = Instant::now();
        loop {
            let old_healthy = self.describe(&old.name).await?.healthy_count();
            let new_healthy = self.describe(&name).await?.healthy_count();
            rollout.samples.push(HealthSample {
                elapsed: start.elapsed(),
                old_healthy,
                new_healthy,
            });
            debug!(role = %key, old_healthy, new_healthy, desired, "Rotation health");

            if new_healthy >= desired {
                return Ok(());
            }
            if start.elapsed() >= self.settings.rotation_timeout {
                return Err(UdoError::TimedOut {
                    operation: format!("{name} to become healthy ({new_healthy}/{desired})"),
                    elapsed: start.elapsed(),
                });
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Remove whatever a failed rotation created.
    async fn roll_back(&self, rollout: &Rollout) -> Result<()> {
        if let Some(group) = &rollout.group {
            match self.teardown_group(group).await {
                Ok(()) | Err(UdoError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if rollout.owns_launch_config {
            if let Some(version) = &rollout.launch_config {
                match self.launch_configs.delete_by_name(&version.name).await {
                    Ok(()) | Err(UdoError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn enter_phase(&self, key: &RoleKey, state: GroupState) -> PhaseGuard<'_> {
        let guard = PhaseGuard {
            table: &self.phases,
            key: key.clone(),
        };
        guard.set(state);
        guard
    }

    /// The role's groups, oldest first.
    async fn observe(&self, target: &ResolvedTarget) -> Result<Vec<RoleGroup>> {
        let cloud = self.cloud.as_ref();
        let prefix = role_prefix(&target.cluster.name, &target.role.name);
        let names = with_retry(&self.retry, "list groups", || cloud.list_groups(&prefix)).await?;

        let mut groups: Vec<_> = names
            .into_iter()
            .filter_map(|name| {
                parse_group_version(&prefix, &name).map(|version| RoleGroup { version, name })
            })
            .collect();
        groups.sort_by_key(|g| g.version);
        Ok(groups)
    }

    /// The role's only group.
    async fn single_group(&self, target: &ResolvedTarget) -> Result<RoleGroup> {
        let mut groups = self.observe(target).await?;
        match groups.len() {
            0 => Err(UdoError::NotFound(format!("{} has no group", target.key()))),
            1 => Ok(groups.remove(0)),
            _ => Err(UdoError::RotationInProgress(target.key().to_string())),
        }
    }

    async fn describe(&self, name: &str) -> Result<GroupDescription> {
        let cloud = self.cloud.as_ref();
        Ok(with_retry(&self.retry, "describe group", || cloud.describe_group(name)).await?)
    }

    fn group_spec(
        &self,
        target: &ResolvedTarget,
        name: &str,
        launch_config: &str,
        capacity: Capacity,
    ) -> GroupSpec {
        GroupSpec {
            name: name.to_string(),
            launch_config: launch_config.to_string(),
            capacity,
            subnets: target.cluster.subnets.clone(),
            tags: BTreeMap::from([
                ("Name".to_string(), name.to_string()),
                ("udo:cluster".to_string(), target.cluster.name.clone()),
                ("udo:role".to_string(), target.role.name.clone()),
            ]),
        }
    }

    async fn register_and_confirm(&self, spec: GroupSpec) -> Result<GroupDescription> {
        let cloud = self.cloud.as_ref();
        let name = with_retry(&self.retry, "register group", || cloud.register_group(spec.clone())).await?;
        self.describe(&name).await
    }

    /// Scale a group to zero, wait for its instances to go, then delete it.
    async fn teardown_group(&self, name: &str) -> Result<()> {
        let cloud = self.cloud.as_ref();
        with_retry(&self.retry, "drain group", || {
            cloud.update_capacity(name, Capacity::zero())
        })
        .await?;
        self.wait_drained(name).await?;
        with_retry(&self.retry, "delete group", || cloud.delete_group(name)).await?;
        info!(group = %name, "Deleted group");
        Ok(())
    }

    async fn wait_drained(&self, name: &str) -> Result<()> {
        let start = Instant::now();
        loop {
            let remaining = match self.describe(name).await {
                Ok(description) => description.instances.len(),
                Err(UdoError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e),
            };
            if remaining == 0 {
                return Ok(());
            }
            if start.elapsed() >= self.settings.drain_timeout {
                return Err(UdoError::TimedOut {
                    operation: format!("{name} to drain ({remaining} instances left)"),
                    elapsed: start.elapsed(),
                });
            }
            debug!(group = %name, remaining, "Waiting for instances to terminate");
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Best-effort group removal used during cleanup.
    async fn discard_group(&self, name: &str) {
        match self.teardown_group(name).await {
            Ok(()) | Err(UdoError::NotFound(_)) => {}
            Err(e) => warn!(group = %name, error = %e, "Failed to remove group"),
        }
    }

    /// Delete a launch configuration unless something still references it.
    async fn retire_launch_config(&self, name: &str) {
        match self.launch_configs.delete_by_name(name).await {
            Ok(()) | Err(UdoError::NotFound(_)) => {}
            Err(e) => warn!(launch_config = %name, error = %e, "Launch configuration kept"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_names() {
        let prefix = role_prefix("prod", "web");
        assert_eq!(group_name("prod", "web", 4), "prod-web-v4");
        assert_eq!(parse_group_version(&prefix, "prod-web-v4"), Some(4));
        assert_eq!(parse_group_version(&prefix, "prod-web-v4-0a1b2c3d4e5f"), None);
        assert_eq!(parse_group_version(&prefix, "prod-web-v"), None);
        assert_eq!(parse_group_version(&prefix, "prod-web-api-v1"), None);
    }

    #[test]
    fn test_status_health() {
        let mut status = RoleStatus {
            role: "prod/web".to_string(),
            state: GroupState::Active,
            current_version: Some(2),
            groups: vec!["prod-web-v2".to_string()],
            capacity: Capacity::new(1, 4, 2),
            healthy_instance_count: 2,
        };
        assert!(status.is_healthy());
        status.healthy_instance_count = 1;
        assert!(!status.is_healthy());
        status.healthy_instance_count = 2;
        status.state = GroupState::Rotating;
        assert!(!status.is_healthy());
    }
}
