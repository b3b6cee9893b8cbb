//! Immutable, versioned launch configurations per role.
//!
//! Launch configurations are named `{cluster}-{role}-v{version}-{hash}` where
//! `hash` is the first 12 hex digits of a SHA-1 over the rendered boot spec.
//! The provider listing is the source of truth for which versions exist.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};
use udo_cloud::{CloudApiError, CloudControlPlane, LaunchConfigSpec};

use crate::error::{Result, UdoError};
use crate::resolve::ResolvedTarget;
use crate::retry::{with_retry, RetryPolicy};
use crate::template::{BootContext, TemplateEngine};

/// Hex digits of the content hash kept in names.
const HASH_LEN: usize = 12;

/// Name prefix shared by a role's launch configurations and groups.
#[must_use]
pub fn role_prefix(cluster: &str, role: &str) -> String {
    format!("{cluster}-{role}-v")
}

/// Launch configuration name for a version.
#[must_use]
pub fn launch_config_name(cluster: &str, role: &str, version: u32, hash: &str) -> String {
    format!("{}{version}-{hash}", role_prefix(cluster, role))
}

/// Parse `{prefix}{version}-{hash}`.
fn parse_launch_config_name(prefix: &str, name: &str) -> Option<(u32, String)> {
    let (version, hash) = name.strip_prefix(prefix)?.split_once('-')?;
    let valid_hash = hash.len() == HASH_LEN && hash.chars().all(|c| c.is_ascii_hexdigit());
    if !valid_hash || version.is_empty() || !version.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((version.parse().ok()?, hash.to_string()))
}

/// Version number embedded in a launch configuration name.
#[must_use]
pub fn version_of(cluster: &str, role: &str, name: &str) -> Option<u32> {
    parse_launch_config_name(&role_prefix(cluster, role), name).map(|(version, _)| version)
}

/// Short content hash of a boot spec.
#[must_use]
pub fn content_hash(spec: &LaunchConfigSpec) -> String {
    let security_groups = spec.security_groups.join(",");
    let mut hasher = Sha1::new();
    for part in [
        spec.image_id.as_str(),
        spec.instance_type.as_str(),
        spec.key_name.as_deref().unwrap_or_default(),
        spec.instance_profile.as_deref().unwrap_or_default(),
        security_groups.as_str(),
        spec.user_data.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(HASH_LEN);
    digest
}

/// A registered launch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchConfigVersion {
    pub cluster: String,
    pub role: String,
    pub version: u32,
    pub hash: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Result of [`LaunchConfigManager::activate`].
#[derive(Debug, Clone)]
pub struct Activation {
    pub version: LaunchConfigVersion,
    /// Whether a new version was registered.
    pub created: bool,
}

/// Creates and retires launch configurations.
pub struct LaunchConfigManager {
    cloud: Arc<dyn CloudControlPlane>,
    templates: Arc<TemplateEngine>,
    region: String,
    retry: RetryPolicy,
}

impl LaunchConfigManager {
    #[must_use]
    pub fn new(
        cloud: Arc<dyn CloudControlPlane>,
        templates: Arc<TemplateEngine>,
        region: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            cloud,
            templates,
            region: region.into(),
            retry,
        }
    }

    /// Rendered boot script for the role. No side effects.
    ///
    /// # Errors
    /// Returns `Template` if rendering fails.
    pub fn cloud_init_script(&self, target: &ResolvedTarget) -> Result<String> {
        let context = BootContext {
            cluster: target.cluster.name.clone(),
            role: target.role.name.clone(),
            region: self.region.clone(),
            vpc: target.cluster.vpc_id.clone(),
            image_id: target.role.image_id.clone(),
            instance_type: target.role.instance_type.clone(),
            vars: target.role.vars.clone(),
        };
        self.templates.render(target.role.template.as_deref(), &context)
    }

    /// Unnamed spec for the role's current definition, with its hash.
    fn render_spec(&self, target: &ResolvedTarget) -> Result<(LaunchConfigSpec, String)> {
        let spec = LaunchConfigSpec {
            name: String::new(),
            image_id: target.role.image_id.clone(),
            instance_type: target.role.instance_type.clone(),
            user_data: self.cloud_init_script(target)?,
            key_name: target.role.key_name.clone(),
            security_groups: target.role.security_groups.clone(),
            instance_profile: target.role.instance_profile.clone(),
        };
        let hash = content_hash(&spec);
        Ok((spec, hash))
    }

    /// Registered versions for the role, oldest first.
    ///
    /// # Errors
    /// Returns `Cloud` if the listing fails.
    pub async fn versions(&self, target: &ResolvedTarget) -> Result<Vec<LaunchConfigVersion>> {
        let cloud = self.cloud.as_ref();
        let prefix = role_prefix(&target.cluster.name, &target.role.name);
        let records = with_retry(&self.retry, "list launch configurations", || {
            cloud.list_launch_configs(&prefix)
        })
        .await?;

        let mut versions: Vec<_> = records
            .into_iter()
            .filter_map(|record| {
                let (version, hash) = parse_launch_config_name(&prefix, &record.name)?;
                Some(LaunchConfigVersion {
                    cluster: target.cluster.name.clone(),
                    role: target.role.name.clone(),
                    version,
                    hash,
                    name: record.name,
                    created_at: record.created_at,
                })
            })
            .collect();
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    /// Newest registered version, if any.
    ///
    /// # Errors
    /// Returns `Cloud` if the listing fails.
    pub async fn latest(&self, target: &ResolvedTarget) -> Result<Option<LaunchConfigVersion>> {
        Ok(self.versions(target).await?.pop())
    }

    /// Register a new version from the role's current definition.
    ///
    /// # Errors
    /// Returns `Template` on render failure, `AlreadyExists` if another writer
    /// took the version number, or `Cloud` on API failure.
    pub async fn create_version(&self, target: &ResolvedTarget) -> Result<LaunchConfigVersion> {
        let (spec, hash) = self.render_spec(target)?;
        let next = self.latest(target).await?.map_or(1, |v| v.version + 1);
        self.register(target, spec, next, hash).await
    }

    async fn register(
        &self,
        target: &ResolvedTarget,
        mut spec: LaunchConfigSpec,
        version: u32,
        hash: String,
    ) -> Result<LaunchConfigVersion> {
        let cloud = self.cloud.as_ref();
        spec.name = launch_config_name(&target.cluster.name, &target.role.name, version, &hash);

        let name = with_retry(&self.retry, "register launch configuration", || {
            cloud.register_launch_config(spec.clone())
        })
        .await?;

        info!(role = %target.key(), launch_config = %name, version, "Registered launch configuration");

        Ok(LaunchConfigVersion {
            cluster: target.cluster.name.clone(),
            role: target.role.name.clone(),
            version,
            hash,
            name,
            created_at: Some(Utc::now()),
        })
    }

    /// Ensure a version matching the current definition is the newest.
    ///
    /// No-op when the newest version's hash matches.
    ///
    /// # Errors
    /// Same as [`Self::create_version`].
    pub async fn activate(&self, target: &ResolvedTarget) -> Result<Activation> {
        let (spec, hash) = self.render_spec(target)?;
        let latest = self.latest(target).await?;

        if let Some(latest) = latest.as_ref().filter(|v| v.hash == hash) {
            debug!(role = %target.key(), launch_config = %latest.name, "Launch configuration up to date");
            return Ok(Activation {
                version: latest.clone(),
                created: false,
            });
        }

        let next = latest.map_or(1, |v| v.version + 1);
        let version = self.register(target, spec, next, hash).await?;
        Ok(Activation {
            version,
            created: true,
        })
    }

    /// Delete a version.
    ///
    /// # Errors
    /// `NotFound` if the version does not exist, `VersionInUse` if a group
    /// still references it.
    pub async fn deactivate(&self, target: &ResolvedTarget, version: u32) -> Result<()> {
        let found = self
            .versions(target)
            .await?
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| UdoError::NotFound(format!("{} launch config v{version}", target.key())))?;
        self.delete_by_name(&found.name).await
    }

    /// Delete the newest version.
    ///
    /// # Errors
    /// Same as [`Self::deactivate`].
    pub async fn deactivate_latest(&self, target: &ResolvedTarget) -> Result<LaunchConfigVersion> {
        let latest = self
            .latest(target)
            .await?
            .ok_or_else(|| UdoError::NotFound(format!("{} launch configs", target.key())))?;
        self.delete_by_name(&latest.name).await?;
        Ok(latest)
    }

    /// Delete a launch configuration by name.
    ///
    /// # Errors
    /// `VersionInUse` if referenced, `NotFound` if absent.
    pub async fn delete_by_name(&self, name: &str) -> Result<()> {
        let cloud = self.cloud.as_ref();
        match with_retry(&self.retry, "delete launch configuration", || {
            cloud.delete_launch_config(name)
        })
        .await
        .map_err(crate::retry::RetryError::into_inner)
        {
            Ok(()) => {
                info!(launch_config = %name, "Deleted launch configuration");
                Ok(())
            }
            Err(CloudApiError::InUse(_)) => {
                warn!(launch_config = %name, "Launch configuration still referenced");
                Err(UdoError::VersionInUse(name.to_string()))
            }
            Err(CloudApiError::NotFound(_)) => Err(UdoError::NotFound(name.to_string())),
            Err(e) => Err(UdoError::Cloud(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        let name = launch_config_name("prod", "web", 12, "0a1b2c3d4e5f");
        assert_eq!(name, "prod-web-v12-0a1b2c3d4e5f");
        assert_eq!(version_of("prod", "web", &name), Some(12));
    }

    #[test]
    fn test_foreign_names_are_ignored() {
        let prefix = role_prefix("prod", "web");
        assert!(parse_launch_config_name(&prefix, "prod-web-v3").is_none());
        assert!(parse_launch_config_name(&prefix, "prod-web-v3-xyz").is_none());
        assert!(parse_launch_config_name(&prefix, "prod-web-vx-0a1b2c3d4e5f").is_none());
        assert!(parse_launch_config_name(&prefix, "prod-web-api-v1-0a1b2c3d4e5f").is_none());
    }

    #[test]
    fn test_hash_tracks_content() {
        let spec = LaunchConfigSpec {
            name: "ignored".to_string(),
            image_id: "ami-1".to_string(),
            instance_type: "t3.small".to_string(),
            user_data: "#cloud-config".to_string(),
            key_name: None,
            security_groups: vec![],
            instance_profile: None,
        };
        let hash = content_hash(&spec);
        assert_eq!(hash.len(), HASH_LEN);

        let renamed = LaunchConfigSpec {
            name: "other".to_string(),
            ..spec.clone()
        };
        assert_eq!(content_hash(&renamed), hash);

        let new_image = LaunchConfigSpec {
            image_id: "ami-2".to_string(),
            ..spec
        };
        assert_ne!(content_hash(&new_image), hash);
    }
}
