//! In-memory control plane and deployment service.
//!
//! Both fakes keep their whole state behind a mutex and answer immediately,
//! which makes them suitable for driving the fleet state machines in tests.
//! Group members are simulated lazily: every `describe_group` reconciles the
//! member list against the desired capacity and advances health according to
//! the group's [`HealthMode`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::deployments::{
    CreateDeploymentRequest, DeploymentGroupSummary, DeploymentService, DeploymentState,
};
use super::traits::{
    Capacity, CloudApiError, CloudControlPlane, GroupDescription, GroupInstance, GroupSpec,
    InstanceHealth, LaunchConfigRecord, LaunchConfigSpec, VpcSpec,
};

/// How simulated instances become healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthMode {
    /// Every member is healthy as soon as it exists.
    Immediate,
    /// Up to `per_poll` members turn healthy on each describe.
    Gradual { per_poll: u32 },
    /// Members never pass health checks.
    Never,
}

/// Kind of failure to inject into the next calls of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Throttling, classified transient.
    Transient,
    /// Validation error, classified permanent.
    Permanent,
    /// Name already taken, as when another writer wins a race.
    Conflict,
}

impl InjectedFailure {
    fn to_error(self, op: &str) -> CloudApiError {
        match self {
            Self::Transient => CloudApiError::Throttled(format!("{op}: Rate exceeded")),
            Self::Permanent => CloudApiError::Api {
                status: 400,
                message: format!("{op}: ValidationError"),
            },
            Self::Conflict => CloudApiError::AlreadyExists(format!("{op}: AlreadyExists")),
        }
    }
}

#[derive(Debug, Clone)]
struct MockGroup {
    launch_config: String,
    capacity: Capacity,
    instances: Vec<GroupInstance>,
    mode: HealthMode,
    /// Members stay put on scale-in.
    held: bool,
    created_at: chrono::DateTime<Utc>,
}

#[derive(Debug)]
struct ControlPlaneState {
    launch_configs: BTreeMap<String, (LaunchConfigSpec, chrono::DateTime<Utc>)>,
    groups: BTreeMap<String, MockGroup>,
    vpcs: BTreeMap<String, String>,
    default_mode: HealthMode,
    mode_overrides: Vec<(String, HealthMode)>,
    held_prefixes: Vec<String>,
    failures: HashMap<&'static str, VecDeque<InjectedFailure>>,
    calls: Vec<String>,
    health_samples: Vec<BTreeMap<String, u32>>,
    next_instance: u64,
}

/// In-memory [`CloudControlPlane`].
#[derive(Debug)]
pub struct MockControlPlane {
    state: Mutex<ControlPlaneState>,
    live_reattach: bool,
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MockControlPlane {
    /// Create an empty control plane whose instances are healthy immediately.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlPlaneState {
                launch_configs: BTreeMap::new(),
                groups: BTreeMap::new(),
                vpcs: BTreeMap::new(),
                default_mode: HealthMode::Immediate,
                mode_overrides: Vec::new(),
                held_prefixes: Vec::new(),
                failures: HashMap::new(),
                calls: Vec::new(),
                health_samples: Vec::new(),
                next_instance: 1,
            }),
            live_reattach: true,
        }
    }

    /// Toggle support for in-place launch configuration swaps.
    #[must_use]
    pub fn with_live_reattach(mut self, supported: bool) -> Self {
        self.live_reattach = supported;
        self
    }

    /// Health mode for groups that match no override.
    #[must_use]
    pub fn with_default_health(self, mode: HealthMode) -> Self {
        self.lock().default_mode = mode;
        self
    }

    /// Health mode for groups registered later whose name starts with `prefix`.
    pub fn set_health_mode(&self, prefix: impl Into<String>, mode: HealthMode) {
        self.lock().mode_overrides.push((prefix.into(), mode));
    }

    /// Instances of groups whose name starts with `prefix` never terminate.
    ///
    /// Applies to groups already registered and to later ones.
    pub fn hold_instances(&self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        let mut state = self.lock();
        for (name, group) in &mut state.groups {
            if name.starts_with(&prefix) {
                group.held = true;
            }
        }
        state.held_prefixes.push(prefix);
    }

    /// Make the next `count` calls of `op` fail.
    pub fn inject_failures(&self, op: &'static str, failure: InjectedFailure, count: usize) {
        let mut state = self.lock();
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat(failure).take(count));
    }

    /// Names of all registered launch configurations.
    #[must_use]
    pub fn launch_config_names(&self) -> Vec<String> {
        self.lock().launch_configs.keys().cloned().collect()
    }

    /// Definition a launch configuration was registered with.
    #[must_use]
    pub fn launch_config_spec(&self, name: &str) -> Option<LaunchConfigSpec> {
        self.lock()
            .launch_configs
            .get(name)
            .map(|(spec, _)| spec.clone())
    }

    /// Names of all registered groups.
    #[must_use]
    pub fn group_names(&self) -> Vec<String> {
        self.lock().groups.keys().cloned().collect()
    }

    /// Snapshot of a group without advancing its simulation.
    #[must_use]
    pub fn peek_group(&self, name: &str) -> Option<GroupDescription> {
        self.lock()
            .groups
            .get(name)
            .map(|group| Self::describe(name, group))
    }

    /// Mutating calls in the order they were made (`"op name"`).
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Healthy count of every group, sampled on each `describe_group`.
    #[must_use]
    pub fn health_samples(&self) -> Vec<BTreeMap<String, u32>> {
        self.lock().health_samples.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ControlPlaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(state: &mut ControlPlaneState, op: &'static str) -> Result<(), CloudApiError> {
        match state.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(failure) => Err(failure.to_error(op)),
            None => Ok(()),
        }
    }

    fn describe(name: &str, group: &MockGroup) -> GroupDescription {
        GroupDescription {
            name: name.to_string(),
            launch_config: Some(group.launch_config.clone()),
            capacity: group.capacity,
            instances: group.instances.clone(),
            created_at: Some(group.created_at),
        }
    }

    /// Bring the member list in line with desired capacity and advance health.
    fn simulate(group: &mut MockGroup, next_instance: &mut u64) {
        let desired = group.capacity.desired as usize;
        // Scale-in drops the newest members first.
        if !group.held {
            group.instances.truncate(desired);
        }
        while group.instances.len() < desired {
            group.instances.push(GroupInstance {
                id: format!("i-{:017x}", *next_instance),
                health: InstanceHealth::Unhealthy,
                launch_config: Some(group.launch_config.clone()),
            });
            *next_instance += 1;
        }

        let promote = match group.mode {
            HealthMode::Immediate => usize::MAX,
            HealthMode::Gradual { per_poll } => per_poll as usize,
            HealthMode::Never => 0,
        };
        group
            .instances
            .iter_mut()
            .filter(|i| i.health == InstanceHealth::Unhealthy)
            .take(promote)
            .for_each(|i| i.health = InstanceHealth::Healthy);
    }
}

#[async_trait]
impl CloudControlPlane for MockControlPlane {
    async fn register_launch_config(
        &self,
        spec: LaunchConfigSpec,
    ) -> Result<String, CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "register_launch_config")?;
        if state.launch_configs.contains_key(&spec.name) {
            return Err(CloudApiError::AlreadyExists(spec.name));
        }
        let name = spec.name.clone();
        state.calls.push(format!("register_launch_config {name}"));
        state.launch_configs.insert(name.clone(), (spec, Utc::now()));
        Ok(name)
    }

    async fn delete_launch_config(&self, name: &str) -> Result<(), CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "delete_launch_config")?;
        if !state.launch_configs.contains_key(name) {
            return Err(CloudApiError::NotFound(name.to_string()));
        }
        if state.groups.values().any(|g| g.launch_config == name) {
            return Err(CloudApiError::InUse(name.to_string()));
        }
        state.calls.push(format!("delete_launch_config {name}"));
        state.launch_configs.remove(name);
        Ok(())
    }

    async fn list_launch_configs(
        &self,
        prefix: &str,
    ) -> Result<Vec<LaunchConfigRecord>, CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "list_launch_configs")?;
        Ok(state
            .launch_configs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, (_, created_at))| LaunchConfigRecord {
                name: name.clone(),
                created_at: Some(*created_at),
            })
            .collect())
    }

    async fn register_group(&self, spec: GroupSpec) -> Result<String, CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "register_group")?;
        if state.groups.contains_key(&spec.name) {
            return Err(CloudApiError::AlreadyExists(spec.name));
        }
        if !state.launch_configs.contains_key(&spec.launch_config) {
            return Err(CloudApiError::Api {
                status: 400,
                message: format!("Launch configuration {} not found", spec.launch_config),
            });
        }
        let mode = state
            .mode_overrides
            .iter()
            .rev()
            .find(|(prefix, _)| spec.name.starts_with(prefix.as_str()))
            .map_or(state.default_mode, |(_, mode)| *mode);
        let held = state
            .held_prefixes
            .iter()
            .any(|prefix| spec.name.starts_with(prefix.as_str()));
        state.calls.push(format!("register_group {}", spec.name));
        state.groups.insert(
            spec.name.clone(),
            MockGroup {
                launch_config: spec.launch_config,
                capacity: spec.capacity,
                instances: Vec::new(),
                mode,
                held,
                created_at: Utc::now(),
            },
        );
        Ok(spec.name)
    }

    async fn delete_group(&self, name: &str) -> Result<(), CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "delete_group")?;
        let group = state
            .groups
            .get(name)
            .ok_or_else(|| CloudApiError::NotFound(name.to_string()))?;
        if group.capacity.desired > 0 || !group.instances.is_empty() {
            return Err(CloudApiError::InUse(format!(
                "{name} still has {} instances",
                group.instances.len()
            )));
        }
        state.calls.push(format!("delete_group {name}"));
        state.groups.remove(name);
        Ok(())
    }

    async fn set_desired_capacity(&self, name: &str, desired: u32) -> Result<(), CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "set_desired_capacity")?;
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| CloudApiError::NotFound(name.to_string()))?;
        if !group.capacity.allows(desired) {
            return Err(CloudApiError::Api {
                status: 400,
                message: format!("desired {desired} outside {}", group.capacity),
            });
        }
        group.capacity.desired = desired;
        state.calls.push(format!("set_desired_capacity {name} {desired}"));
        Ok(())
    }

    async fn update_capacity(&self, name: &str, capacity: Capacity) -> Result<(), CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "update_capacity")?;
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| CloudApiError::NotFound(name.to_string()))?;
        group.capacity = capacity;
        state.calls.push(format!("update_capacity {name} {capacity}"));
        Ok(())
    }

    async fn describe_group(&self, name: &str) -> Result<GroupDescription, CloudApiError> {
        let mut guard = self.lock();
        Self::check(&mut guard, "describe_group")?;
        let state = &mut *guard;
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| CloudApiError::NotFound(name.to_string()))?;
        Self::simulate(group, &mut state.next_instance);
        let description = Self::describe(name, group);

        let sample = state
            .groups
            .iter()
            .map(|(n, g)| {
                let healthy = g
                    .instances
                    .iter()
                    .filter(|i| i.health == InstanceHealth::Healthy)
                    .count();
                (n.clone(), u32::try_from(healthy).unwrap_or(u32::MAX))
            })
            .collect();
        state.health_samples.push(sample);

        Ok(description)
    }

    async fn list_groups(&self, prefix: &str) -> Result<Vec<String>, CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "list_groups")?;
        Ok(state
            .groups
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn supports_live_reattach(&self) -> bool {
        self.live_reattach
    }

    async fn attach_launch_config(
        &self,
        group: &str,
        launch_config: &str,
    ) -> Result<(), CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "attach_launch_config")?;
        if !self.live_reattach {
            return Err(CloudApiError::Config("live reattach unsupported".to_string()));
        }
        if !state.launch_configs.contains_key(launch_config) {
            return Err(CloudApiError::NotFound(launch_config.to_string()));
        }
        let entry = state
            .groups
            .get_mut(group)
            .ok_or_else(|| CloudApiError::NotFound(group.to_string()))?;
        entry.launch_config = launch_config.to_string();
        state
            .calls
            .push(format!("attach_launch_config {group} {launch_config}"));
        Ok(())
    }

    async fn ensure_vpc(&self, spec: VpcSpec) -> Result<String, CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "ensure_vpc")?;
        let next = state.vpcs.len() + 1;
        let id = state
            .vpcs
            .entry(spec.cluster.clone())
            .or_insert_with(|| format!("vpc-{next:08x}"))
            .clone();
        state.calls.push(format!("ensure_vpc {}", spec.cluster));
        Ok(id)
    }
}

// ============================================================================
// Deployment service
// ============================================================================

#[derive(Debug, Default)]
struct DeploymentServiceState {
    applications: BTreeMap<String, Vec<String>>,
    configs: Vec<String>,
    deployments: BTreeMap<String, (CreateDeploymentRequest, VecDeque<DeploymentState>)>,
    script: Vec<DeploymentState>,
    failures: HashMap<&'static str, VecDeque<InjectedFailure>>,
    status_queries: usize,
}

/// In-memory [`DeploymentService`].
///
/// Each created deployment walks through the configured status script, one
/// step per `get_status`, and then stays on the last status.
#[derive(Debug, Default)]
pub struct MockDeploymentService {
    state: Mutex<DeploymentServiceState>,
}

impl MockDeploymentService {
    /// Create an empty service whose deployments succeed on first query.
    #[must_use]
    pub fn new() -> Self {
        let service = Self::default();
        service.lock().script = vec![DeploymentState::Succeeded];
        service
    }

    /// Register an application and its deployment groups.
    #[must_use]
    pub fn with_application(self, name: &str, groups: &[&str]) -> Self {
        self.lock().applications.insert(
            name.to_string(),
            groups.iter().map(ToString::to_string).collect(),
        );
        self
    }

    /// Register deployment configuration names.
    #[must_use]
    pub fn with_configs(self, configs: &[&str]) -> Self {
        self.lock().configs = configs.iter().map(ToString::to_string).collect();
        self
    }

    /// Status sequence for deployments created from now on.
    pub fn script_statuses(&self, statuses: Vec<DeploymentState>) {
        self.lock().script = statuses;
    }

    /// Make the next `count` calls of `op` fail.
    pub fn inject_failures(&self, op: &'static str, failure: InjectedFailure, count: usize) {
        let mut state = self.lock();
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat(failure).take(count));
    }

    /// Requests received so far, keyed by deployment id.
    #[must_use]
    pub fn requests(&self) -> Vec<(String, CreateDeploymentRequest)> {
        self.lock()
            .deployments
            .iter()
            .map(|(id, (req, _))| (id.clone(), req.clone()))
            .collect()
    }

    /// Number of `get_status` calls that reached the service.
    #[must_use]
    pub fn status_queries(&self) -> usize {
        self.lock().status_queries
    }

    fn lock(&self) -> MutexGuard<'_, DeploymentServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(state: &mut DeploymentServiceState, op: &'static str) -> Result<(), CloudApiError> {
        match state.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(failure) => Err(failure.to_error(op)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DeploymentService for MockDeploymentService {
    async fn create_deployment(
        &self,
        req: CreateDeploymentRequest,
    ) -> Result<String, CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "create_deployment")?;
        let known = state
            .applications
            .get(&req.application)
            .is_some_and(|groups| groups.contains(&req.group));
        if !known {
            return Err(CloudApiError::NotFound(format!(
                "{}/{}",
                req.application, req.group
            )));
        }
        let id = format!("d-{:09}", state.deployments.len() + 1);
        let script = state.script.iter().copied().collect();
        state.deployments.insert(id.clone(), (req, script));
        Ok(id)
    }

    async fn get_status(&self, deployment_id: &str) -> Result<DeploymentState, CloudApiError> {
        let mut state = self.lock();
        state.status_queries += 1;
        Self::check(&mut state, "get_status")?;
        let (_, script) = state
            .deployments
            .get_mut(deployment_id)
            .ok_or_else(|| CloudApiError::NotFound(deployment_id.to_string()))?;
        let status = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().copied()
        };
        Ok(status.unwrap_or(DeploymentState::Unknown))
    }

    async fn list_applications(&self) -> Result<Vec<String>, CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "list_applications")?;
        Ok(state.applications.keys().cloned().collect())
    }

    async fn list_deployment_groups(
        &self,
        application: Option<&str>,
    ) -> Result<Vec<DeploymentGroupSummary>, CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "list_deployment_groups")?;
        Ok(state
            .applications
            .iter()
            .filter(|(app, _)| application.map_or(true, |wanted| wanted == app.as_str()))
            .flat_map(|(app, groups)| {
                groups.iter().map(|name| DeploymentGroupSummary {
                    application: app.clone(),
                    name: name.clone(),
                })
            })
            .collect())
    }

    async fn list_configs(&self) -> Result<Vec<String>, CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "list_configs")?;
        Ok(state.configs.clone())
    }

    async fn list_deployments(&self) -> Result<Vec<String>, CloudApiError> {
        let mut state = self.lock();
        Self::check(&mut state, "list_deployments")?;
        Ok(state.deployments.keys().cloned().collect())
    }
}
