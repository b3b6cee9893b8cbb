//! Notifications for udo fleet operations.
//!
//! Rotations, rollbacks, deployments and cluster bring-up publish a
//! [`FleetEvent`]. The [`Notifier`] fans each event out to every enabled
//! [`NotifyChannel`]; delivery failures are logged and never fail the
//! operation that produced the event.
//!
//! # Configuration
//!
//! - `SLACK_WEBHOOK_URL`: Slack incoming webhook (enables the Slack channel)
//! - `NOTIFY_DISABLED`: set to "true" or "1" to turn all notifications off

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::slack::SlackChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::{FleetEvent, Severity};

use std::sync::Arc;
use tracing::{debug, error, info};

/// Environment variable to disable all notifications.
const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Dispatches fleet events to the configured channels.
#[derive(Clone)]
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
}

impl Notifier {
    /// Create a notifier from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let disabled = std::env::var(ENV_NOTIFY_DISABLED)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        if disabled {
            info!("Notifications disabled via NOTIFY_DISABLED");
            return Self::disabled();
        }

        let mut channels: Vec<Arc<dyn NotifyChannel>> = vec![];

        let slack = SlackChannel::from_env();
        if slack.enabled() {
            channels.push(Arc::new(slack));
        }

        if channels.is_empty() {
            debug!("No notification channels configured");
        } else {
            info!(
                channel_count = channels.len(),
                "Notification system initialized"
            );
        }

        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a notifier with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a notifier that drops every event.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
        }
    }

    /// Check if any notification channels are enabled.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.disabled && !self.channels.is_empty()
    }

    /// Send an event to all enabled channels without waiting.
    ///
    /// Must be called from within a Tokio runtime. Errors are logged.
    pub fn notify(&self, event: FleetEvent) {
        if !self.has_channels() {
            debug!(event = %event.title(), "No active channels, skipping event");
            return;
        }

        let event = Arc::new(event);

        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let event = Arc::clone(&event);

            tokio::spawn(async move {
                let channel_name = channel.name();

                if !channel.enabled() {
                    debug!(channel = channel_name, "Channel disabled, skipping");
                    return;
                }

                if let Err(e) = channel.send(&event).await {
                    error!(
                        channel = channel_name,
                        error = %e,
                        "Failed to send notification"
                    );
                }
            });
        }
    }

    /// Send an event and wait for every channel, returning per-channel results.
    pub async fn notify_and_wait(
        &self,
        event: FleetEvent,
    ) -> Vec<(String, Result<(), ChannelError>)> {
        if !self.has_channels() {
            return vec![];
        }

        let mut results = vec![];

        for channel in &self.channels {
            let channel_name = channel.name().to_string();
            let result = channel.send(&event).await;
            results.push((channel_name, result));
        }

        results
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_disabled_notifier() {
        let notifier = Notifier::disabled();
        assert!(!notifier.has_channels());
    }

    #[test]
    fn test_severity_colors() {
        assert_eq!(Severity::Info.color(), "#3498db");
        assert_eq!(Severity::Warning.color(), "#f39c12");
        assert_eq!(Severity::Critical.color(), "#e74c3c");
    }

    #[test]
    fn test_event_titles_and_severity() {
        let event = FleetEvent::RotationCompleted {
            cluster: "prod".to_string(),
            role: "web".to_string(),
            from_version: 3,
            to_version: 4,
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(event.title(), "Rotation Completed: prod/web");
        assert_eq!(event.severity(), Severity::Info);

        let event = FleetEvent::ClusterCreated {
            cluster: "prod".to_string(),
            succeeded: vec!["web".to_string()],
            failed: vec!["worker".to_string()],
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(event.severity(), Severity::Critical);
    }

    #[test]
    #[serial]
    fn test_from_env_respects_disable_flag() {
        std::env::set_var("SLACK_WEBHOOK_URL", "http://localhost:1/hook");
        std::env::set_var(ENV_NOTIFY_DISABLED, "true");
        assert!(!Notifier::from_env().has_channels());

        std::env::remove_var(ENV_NOTIFY_DISABLED);
        assert!(Notifier::from_env().has_channels());

        std::env::remove_var("SLACK_WEBHOOK_URL");
        assert!(!Notifier::from_env().has_channels());
    }

    #[tokio::test]
    async fn test_notify_and_wait_on_disabled_returns_nothing() {
        let notifier = Notifier::disabled();
        let results = notifier
            .notify_and_wait(FleetEvent::IntegrationTest {
                message: "hello".to_string(),
                timestamp: chrono::Utc::now(),
            })
            .await;
        assert!(results.is_empty());
    }
}
