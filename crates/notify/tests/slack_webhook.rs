//! Slack channel delivery against a local webhook.

use std::sync::Arc;

use udo_notify::{ChannelError, FleetEvent, Notifier, SlackChannel};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn deployment_event() -> FleetEvent {
    FleetEvent::DeploymentCreated {
        cluster: "prod".to_string(),
        role: "web".to_string(),
        application: "shop".to_string(),
        group: "prod-web".to_string(),
        commit: "abc123".to_string(),
        deployment_id: "d-42".to_string(),
        timestamp: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn test_delivers_attachment_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_string_contains("Deployment Created: prod/web"))
        .and(body_string_contains("abc123"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let slack = SlackChannel::new(format!("{}/hook", server.uri()));
    let notifier = Notifier::with_channels(vec![Arc::new(slack)]);

    let results = notifier.notify_and_wait(deployment_event()).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "slack");
    assert!(results[0].1.is_ok());
}

#[tokio::test]
async fn test_rejected_webhook_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no_service"))
        .mount(&server)
        .await;

    let slack = SlackChannel::new(format!("{}/hook", server.uri()));
    let notifier = Notifier::with_channels(vec![Arc::new(slack)]);

    let results = notifier.notify_and_wait(deployment_event()).await;
    match &results[0].1 {
        Err(ChannelError::Rejected { status, body }) => {
            assert_eq!(*status, 404);
            assert_eq!(body, "no_service");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}
