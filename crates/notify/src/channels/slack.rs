//! Slack webhook notification channel.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::events::FleetEvent;
use crate::NotifyChannel;

/// Environment variable for Slack webhook URL.
const ENV_SLACK_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";

/// Slack webhook notification channel.
pub struct SlackChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl SlackChannel {
    /// Create a new Slack channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let webhook_url = std::env::var(ENV_SLACK_WEBHOOK_URL)
            .ok()
            .filter(|url| !url.is_empty());

        if webhook_url.is_some() {
            debug!("Slack notifications enabled");
        } else {
            debug!("Slack notifications disabled (SLACK_WEBHOOK_URL not set)");
        }

        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    /// Create a Slack channel with a specific webhook URL.
    #[must_use]
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url: Some(webhook_url),
            client: reqwest::Client::new(),
        }
    }

    /// Format an event as a Slack webhook payload.
    fn format_payload(event: &FleetEvent) -> SlackPayload {
        let fields = Self::format_fields(event)
            .into_iter()
            .map(|(title, value)| SlackField {
                title,
                value,
                short: true,
            })
            .collect();

        let attachment = SlackAttachment {
            fallback: event.title(),
            color: event.severity().color().to_string(),
            author_name: Some("udo".to_string()),
            title: event.title(),
            text: Self::format_description(event),
            fields,
            footer: Some(format!(
                "{} | {}",
                event.severity().as_str(),
                event.timestamp().format("%Y-%m-%d %H:%M:%S UTC")
            )),
            ts: Some(event.timestamp().timestamp()),
        };

        SlackPayload {
            attachments: vec![attachment],
        }
    }

    /// Format the description for an event.
    fn format_description(event: &FleetEvent) -> String {
        match event {
            FleetEvent::RotationCompleted {
                from_version,
                to_version,
                ..
            } => format!("Instances moved from launch config v{from_version} to v{to_version}"),

            FleetEvent::RotationRolledBack { reason, .. } => {
                format!("New group discarded, previous group kept\n*Reason:* {reason}")
            }

            FleetEvent::DeploymentCreated { commit, .. } => {
                format!("Deploying commit `{commit}`")
            }

            FleetEvent::ClusterCreated {
                succeeded, failed, ..
            } => {
                if failed.is_empty() {
                    format!("All {} roles are up", succeeded.len())
                } else {
                    format!("Failed roles: {}", failed.join(", "))
                }
            }

            FleetEvent::IntegrationTest { message, .. } => message.clone(),
        }
    }

    /// Format additional fields for an event.
    fn format_fields(event: &FleetEvent) -> Vec<(String, String)> {
        match event {
            FleetEvent::RotationCompleted { cluster, role, .. }
            | FleetEvent::RotationRolledBack { cluster, role, .. } => vec![
                ("Cluster".to_string(), cluster.clone()),
                ("Role".to_string(), role.clone()),
            ],

            FleetEvent::DeploymentCreated {
                cluster,
                role,
                application,
                group,
                deployment_id,
                ..
            } => vec![
                ("Cluster".to_string(), cluster.clone()),
                ("Role".to_string(), role.clone()),
                ("Application".to_string(), application.clone()),
                ("Group".to_string(), group.clone()),
                ("Deployment".to_string(), deployment_id.clone()),
            ],

            FleetEvent::ClusterCreated { cluster, .. } => {
                vec![("Cluster".to_string(), cluster.clone())]
            }

            FleetEvent::IntegrationTest { .. } => vec![],
        }
    }
}

#[async_trait]
impl NotifyChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, event: &FleetEvent) -> Result<(), ChannelError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(ENV_SLACK_WEBHOOK_URL.to_string()))?;

        let payload = Self::format_payload(event);

        debug!(channel = "slack", event_type = ?event.title(), "Sending notification");

        let response = self.client.post(webhook_url).json(&payload).send().await?;

        if response.status().is_success() {
            debug!(channel = "slack", "Notification sent successfully");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "slack",
                status = %status,
                body = %body,
                "Slack webhook request failed"
            );

            Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

// =============================================================================
// Slack API types
// =============================================================================

#[derive(Debug, Serialize)]
struct SlackPayload {
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    fallback: String,
    color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_name: Option<String>,
    title: String,
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<SlackField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_rollback_payload() {
        let event = FleetEvent::RotationRolledBack {
            cluster: "prod".to_string(),
            role: "web".to_string(),
            reason: "timed out".to_string(),
            timestamp: Utc::now(),
        };
        let payload = SlackChannel::format_payload(&event);
        let attachment = &payload.attachments[0];
        assert_eq!(attachment.color, "#f39c12");
        assert_eq!(attachment.title, "Rotation Rolled Back: prod/web");
        assert!(attachment.text.contains("timed out"));
        assert_eq!(attachment.fields.len(), 2);
    }

    #[test]
    fn test_integration_payload_has_no_fields() {
        let event = FleetEvent::IntegrationTest {
            message: "Testing udo integrations".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(SlackChannel::format_payload(&event)).unwrap();
        assert!(json["attachments"][0].get("fields").is_none());
        assert_eq!(json["attachments"][0]["text"], "Testing udo integrations");
    }
}
