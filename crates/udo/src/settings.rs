//! Runtime settings shared by the fleet managers.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Timeouts, intervals and locations used by the managers.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Region rendered into cloud-init and used for API endpoints.
    pub region: String,
    /// How long a new group may take to become healthy during rotation.
    pub rotation_timeout: Duration,
    /// Delay between group health polls.
    pub poll_interval: Duration,
    /// How long scale-to-zero may take before a group is deleted.
    pub drain_timeout: Duration,
    /// Overall budget for following a deployment.
    pub deploy_timeout: Duration,
    /// Directory holding `<template>.hbs` cloud-init templates.
    pub template_dir: Option<PathBuf>,
    /// Backoff for individual cloud calls.
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            rotation_timeout: Duration::from_secs(900),
            poll_interval: Duration::from_secs(15),
            drain_timeout: Duration::from_secs(600),
            deploy_timeout: Duration::from_secs(1800),
            template_dir: None,
            retry: RetryPolicy::default(),
        }
    }
}
