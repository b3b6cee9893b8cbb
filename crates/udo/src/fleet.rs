//! Wiring of the managers around shared collaborators.

use std::sync::Arc;

use udo_cloud::{CloudControlPlane, DeploymentService};
use udo_notify::Notifier;

use crate::asgroup::{AutoscaleGroupManager, RotationSettings};
use crate::cluster::ClusterOrchestrator;
use crate::config::ConfigStore;
use crate::deploy::DeploymentCoordinator;
use crate::error::Result;
use crate::launch_config::LaunchConfigManager;
use crate::settings::Settings;
use crate::template::TemplateEngine;

/// Every manager, built over one control plane and deployment service.
pub struct Fleet {
    pub config: Arc<dyn ConfigStore>,
    pub launch_configs: Arc<LaunchConfigManager>,
    pub groups: Arc<AutoscaleGroupManager>,
    pub deployments: DeploymentCoordinator,
    pub clusters: ClusterOrchestrator,
    pub notifier: Notifier,
}

impl Fleet {
    /// Build the managers.
    ///
    /// # Errors
    /// Returns `Template` if the template directory cannot be loaded.
    pub fn new(
        config: Arc<dyn ConfigStore>,
        cloud: Arc<dyn CloudControlPlane>,
        deploy: Arc<dyn DeploymentService>,
        notifier: Notifier,
        settings: &Settings,
    ) -> Result<Self> {
        let templates = Arc::new(TemplateEngine::new(settings.template_dir.as_deref())?);

        let launch_configs = Arc::new(LaunchConfigManager::new(
            Arc::clone(&cloud),
            templates,
            settings.region.clone(),
            settings.retry.clone(),
        ));

        let groups = Arc::new(AutoscaleGroupManager::new(
            Arc::clone(&cloud),
            Arc::clone(&launch_configs),
            notifier.clone(),
            RotationSettings::from(settings),
            settings.retry.clone(),
        ));

        let deployments = DeploymentCoordinator::new(
            Arc::clone(&config),
            deploy,
            notifier.clone(),
            settings.retry.clone().with_deadline(settings.deploy_timeout),
        )
        .with_wait(settings.poll_interval, settings.deploy_timeout);

        let clusters = ClusterOrchestrator::new(
            Arc::clone(&config),
            cloud,
            Arc::clone(&groups),
            notifier.clone(),
            settings.retry.clone(),
        );

        Ok(Self {
            config,
            launch_configs,
            groups,
            deployments,
            clusters,
            notifier,
        })
    }
}
