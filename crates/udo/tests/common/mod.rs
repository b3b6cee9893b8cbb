//! Shared fixtures for fleet integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use udo::{resolve, Fleet, ResolvedTarget, RetryPolicy, Settings, YamlConfigStore};
use udo_cloud::mock::{MockControlPlane, MockDeploymentService};
use udo_notify::Notifier;

/// `prod` has a single role; `stage` has two.
pub const FLEET_YAML: &str = r"
clusters:
  prod:
    application: shop
    repository: udo-fleet/shop
    subnets: [subnet-0a, subnet-0b]
    roles:
      web:
        image_id: ami-0a1b2c3d
        instance_type: t3.small
        security_groups: [sg-web]
        capacity: { min: 1, max: 4, desired: 2 }
        vars:
          PORT: '8080'
  stage:
    application: shop
    roles:
      web:
        image_id: ami-0a1b2c3d
        instance_type: t3.small
        capacity: { min: 1, max: 2, desired: 1 }
      worker:
        image_id: ami-0a1b2c3d
        instance_type: t3.medium
        capacity: { min: 0, max: 3, desired: 1 }
";

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        backoff_multiplier: 2.0,
        deadline: None,
    }
}

pub fn fast_settings() -> Settings {
    Settings {
        rotation_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(10),
        drain_timeout: Duration::from_millis(300),
        deploy_timeout: Duration::from_secs(1),
        retry: fast_retry(),
        ..Settings::default()
    }
}

pub struct Harness {
    pub fleet: Fleet,
    pub cloud: Arc<MockControlPlane>,
    pub deploy: Arc<MockDeploymentService>,
    pub store: Arc<YamlConfigStore>,
}

impl Harness {
    pub fn new(cloud: MockControlPlane) -> Self {
        Self::with_deploy(
            cloud,
            MockDeploymentService::new().with_application("shop", &["prod-web", "stage-web"]),
        )
    }

    pub fn with_deploy(cloud: MockControlPlane, deploy: MockDeploymentService) -> Self {
        Self::with_settings(cloud, deploy, &fast_settings())
    }

    pub fn with_settings(
        cloud: MockControlPlane,
        deploy: MockDeploymentService,
        settings: &Settings,
    ) -> Self {
        let store = Arc::new(YamlConfigStore::from_yaml(FLEET_YAML).unwrap());
        let cloud = Arc::new(cloud);
        let deploy = Arc::new(deploy);
        let fleet = Fleet::new(
            store.clone(),
            cloud.clone(),
            deploy.clone(),
            Notifier::disabled(),
            settings,
        )
        .unwrap();
        Self {
            fleet,
            cloud,
            deploy,
            store,
        }
    }

    pub fn target(&self, cluster: &str, role: &str) -> ResolvedTarget {
        resolve(self.store.as_ref(), cluster, Some(role)).unwrap()
    }

    /// Launch configurations registered for a role.
    pub fn launch_configs(&self, cluster: &str, role: &str) -> Vec<String> {
        let prefix = format!("{cluster}-{role}-v");
        self.cloud
            .launch_config_names()
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect()
    }
}

/// `prod/web` with a different image, as after a configuration edit.
pub fn edited_prod_web() -> ResolvedTarget {
    let yaml = FLEET_YAML.replacen("ami-0a1b2c3d", "ami-0f0e0d0c", 1);
    let store = YamlConfigStore::from_yaml(&yaml).unwrap();
    resolve(&store, "prod", Some("web")).unwrap()
}
