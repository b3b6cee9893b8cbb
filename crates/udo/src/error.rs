//! Error types for fleet operations.

use std::time::Duration;

use thiserror::Error;
use udo_cloud::CloudApiError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, UdoError>;

/// Errors returned by fleet operations.
#[derive(Debug, Error)]
pub enum UdoError {
    /// Static configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No role was given and the cluster has more than one.
    #[error("Multiple roles available for cluster {cluster}: {}", roles.join(", "))]
    AmbiguousRole { cluster: String, roles: Vec<String> },

    /// Cluster is not configured.
    #[error("Unknown cluster: {0}")]
    UnknownCluster(String),

    /// Role is not configured for the cluster.
    #[error("Unknown role {role} for cluster {cluster}")]
    UnknownRole { cluster: String, role: String },

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Requested desired capacity is outside the group's bounds.
    #[error("Desired capacity {desired} outside bounds [{min}, {max}]")]
    ScaleOutOfBounds { desired: u32, min: u32, max: u32 },

    /// Launch configuration is still referenced by a group.
    #[error("Launch configuration {0} is still in use")]
    VersionInUse(String),

    /// Another rotation holds the role.
    #[error("Rotation already in progress for {0}")]
    RotationInProgress(String),

    /// Rotation failed; the new group was removed and the old one kept.
    #[error("Rotation of {role} failed and was rolled back: {reason}")]
    RotationFailure { role: String, reason: String },

    /// A non-rotation operation holds the role.
    #[error("{role} is busy ({operation} in progress)")]
    RoleBusy { role: String, operation: String },

    /// An operation exceeded its deadline.
    #[error("Timed out after {}s waiting for {operation}", elapsed.as_secs())]
    TimedOut { operation: String, elapsed: Duration },

    /// Cloud-init template could not be loaded or rendered.
    #[error("Template error: {0}")]
    Template(String),

    /// Cloud API call failed.
    #[error(transparent)]
    Cloud(#[from] CloudApiError),
}

impl UdoError {
    /// Whether the underlying cloud failure was transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Cloud(e) if e.is_transient())
    }
}

impl From<handlebars::RenderError> for UdoError {
    fn from(e: handlebars::RenderError) -> Self {
        Self::Template(e.to_string())
    }
}

impl From<handlebars::TemplateError> for UdoError {
    fn from(e: handlebars::TemplateError) -> Self {
        Self::Template(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_role_lists_names() {
        let err = UdoError::AmbiguousRole {
            cluster: "prod".to_string(),
            roles: vec!["web".to_string(), "worker".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Multiple roles available for cluster prod: web, worker"
        );
    }

    #[test]
    fn test_transient_passthrough() {
        let err = UdoError::from(CloudApiError::Throttled("Rate exceeded".to_string()));
        assert!(err.is_transient());
        assert!(!UdoError::NotFound("prod/web".to_string()).is_transient());
    }
}
