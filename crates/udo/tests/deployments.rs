//! Target resolution and deployment tracking.

mod common;

use std::time::{Duration, Instant};

use common::{fast_settings, Harness};
use udo::{resolve, DeploymentStatus, Settings, UdoError};
use udo_cloud::mock::{InjectedFailure, MockControlPlane, MockDeploymentService};
use udo_cloud::DeploymentState;

#[test]
fn test_resolution_single_role() {
    let h = Harness::new(MockControlPlane::new());

    let target = resolve(h.store.as_ref(), "prod", None).unwrap();
    assert_eq!(target.role.name, "web");
    assert_eq!(
        target.notice.as_deref(),
        Some("No role specified, assuming web")
    );
}

#[test]
fn test_resolution_ambiguous() {
    let h = Harness::new(MockControlPlane::new());

    let err = resolve(h.store.as_ref(), "stage", None).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Multiple roles available for cluster stage: web, worker"
    );

    let err = resolve(h.store.as_ref(), "stage", Some("db")).unwrap_err();
    assert!(matches!(err, UdoError::UnknownRole { .. }));

    let err = resolve(h.store.as_ref(), "qa", None).unwrap_err();
    assert!(matches!(err, UdoError::UnknownCluster(name) if name == "qa"));
}

#[tokio::test]
async fn test_create_targets_single_role_group() {
    let h = Harness::new(MockControlPlane::new());

    let deployment = h
        .fleet
        .deployments
        .create("prod", None, "9f1c2e7")
        .await
        .unwrap();

    assert_eq!(deployment.application, "shop");
    assert_eq!(deployment.group, "prod-web");
    assert_eq!(deployment.revision, "9f1c2e7");
    assert_eq!(deployment.status, DeploymentStatus::Pending);

    let requests = h.deploy.requests();
    assert_eq!(requests.len(), 1);
    let (id, request) = &requests[0];
    assert_eq!(id, &deployment.id);
    assert_eq!(request.group, "prod-web");
    assert_eq!(request.repository.as_deref(), Some("udo-fleet/shop"));
}

#[tokio::test]
async fn test_create_requires_role_on_multi_role_cluster() {
    let h = Harness::new(MockControlPlane::new());

    let err = h
        .fleet
        .deployments
        .create("stage", None, "9f1c2e7")
        .await
        .unwrap_err();
    assert!(matches!(err, UdoError::AmbiguousRole { .. }));
    assert!(h.deploy.requests().is_empty());

    let deployment = h
        .fleet
        .deployments
        .create("stage", Some("web"), "9f1c2e7")
        .await
        .unwrap();
    assert_eq!(deployment.group, "stage-web");
}

#[tokio::test]
async fn test_poll_follows_service_status() {
    let h = Harness::new(MockControlPlane::new());
    h.deploy.script_statuses(vec![
        DeploymentState::Queued,
        DeploymentState::InProgress,
        DeploymentState::Succeeded,
    ]);
    let mut deployment = h
        .fleet
        .deployments
        .create("prod", None, "9f1c2e7")
        .await
        .unwrap();

    let fleet = &h.fleet;
    assert_eq!(
        fleet.deployments.poll_status(&mut deployment).await.unwrap(),
        DeploymentStatus::Pending
    );
    assert_eq!(
        fleet.deployments.poll_status(&mut deployment).await.unwrap(),
        DeploymentStatus::InProgress
    );
    assert_eq!(
        fleet.deployments.poll_status(&mut deployment).await.unwrap(),
        DeploymentStatus::Succeeded
    );

    // Terminal statuses are not re-queried.
    let queries = h.deploy.status_queries();
    assert_eq!(
        fleet.deployments.poll_status(&mut deployment).await.unwrap(),
        DeploymentStatus::Succeeded
    );
    assert_eq!(h.deploy.status_queries(), queries);
}

#[tokio::test]
async fn test_status_retried_past_attempt_budget() {
    let h = Harness::new(MockControlPlane::new());
    let mut deployment = h
        .fleet
        .deployments
        .create("prod", None, "9f1c2e7")
        .await
        .unwrap();
    // More failures than the three attempts the retry policy allows on its own.
    h.deploy
        .inject_failures("get_status", InjectedFailure::Transient, 8);

    let status = h.fleet.deployments.poll_status(&mut deployment).await.unwrap();
    assert_eq!(status, DeploymentStatus::Succeeded);
    assert_eq!(h.deploy.status_queries(), 9);
}

#[tokio::test]
async fn test_unreachable_status_times_out_then_recovers() {
    let settings = Settings {
        deploy_timeout: Duration::from_millis(60),
        ..fast_settings()
    };
    let h = Harness::with_settings(
        MockControlPlane::new(),
        MockDeploymentService::new().with_application("shop", &["prod-web"]),
        &settings,
    );
    let mut deployment = h
        .fleet
        .deployments
        .create("prod", None, "9f1c2e7")
        .await
        .unwrap();
    h.deploy
        .inject_failures("get_status", InjectedFailure::Transient, 10_000);

    let started = Instant::now();
    let status = h.fleet.deployments.poll_status(&mut deployment).await.unwrap();
    assert_eq!(status, DeploymentStatus::TimedOut);
    assert_eq!(deployment.status, DeploymentStatus::TimedOut);
    assert!(h.deploy.status_queries() > 3);
    assert!(started.elapsed() < Duration::from_secs(1));

    // Timed out is not terminal: the next poll asks the service again.
    let queries = h.deploy.status_queries();
    let status = h.fleet.deployments.poll_status(&mut deployment).await.unwrap();
    assert_eq!(status, DeploymentStatus::TimedOut);
    assert!(h.deploy.status_queries() > queries);
}

#[tokio::test]
async fn test_permanent_status_error_is_returned() {
    let h = Harness::new(MockControlPlane::new());
    let mut deployment = h
        .fleet
        .deployments
        .create("prod", None, "9f1c2e7")
        .await
        .unwrap();
    h.deploy
        .inject_failures("get_status", InjectedFailure::Permanent, 1);

    let err = h
        .fleet
        .deployments
        .poll_status(&mut deployment)
        .await
        .unwrap_err();
    assert!(matches!(err, UdoError::Cloud(_)));
    assert_eq!(deployment.status, DeploymentStatus::Pending);
}

#[tokio::test]
async fn test_wait_until_terminal() {
    let h = Harness::new(MockControlPlane::new());
    h.deploy.script_statuses(vec![
        DeploymentState::InProgress,
        DeploymentState::InProgress,
        DeploymentState::Failed,
    ]);
    let mut deployment = h
        .fleet
        .deployments
        .create("prod", None, "9f1c2e7")
        .await
        .unwrap();

    let status = h.fleet.deployments.wait(&mut deployment).await.unwrap();
    assert_eq!(status, DeploymentStatus::Failed);
    assert_eq!(h.deploy.status_queries(), 3);
}

#[tokio::test]
async fn test_unknown_deployment_group() {
    let h = Harness::with_deploy(
        MockControlPlane::new(),
        MockDeploymentService::new().with_application("shop", &["other"]),
    );

    let err = h
        .fleet
        .deployments
        .create("prod", None, "9f1c2e7")
        .await
        .unwrap_err();
    assert!(matches!(err, UdoError::NotFound(_)));
}

#[tokio::test]
async fn test_listings() {
    let h = Harness::with_deploy(
        MockControlPlane::new(),
        MockDeploymentService::new()
            .with_application("shop", &["prod-web", "stage-web"])
            .with_application("billing", &["prod-billing"])
            .with_configs(&["CodeDeployDefault.OneAtATime"]),
    );

    assert_eq!(
        h.fleet.deployments.list_applications().await.unwrap(),
        vec!["billing", "shop"]
    );
    let groups = h.fleet.deployments.list_groups(Some("shop")).await.unwrap();
    assert_eq!(groups.len(), 2);
    assert!(groups.iter().all(|g| g.application == "shop"));
    assert_eq!(h.fleet.deployments.list_groups(None).await.unwrap().len(), 3);
    assert_eq!(
        h.fleet.deployments.list_configs().await.unwrap(),
        vec!["CodeDeployDefault.OneAtATime"]
    );

    h.fleet
        .deployments
        .create("prod", None, "9f1c2e7")
        .await
        .unwrap();
    assert_eq!(h.fleet.deployments.list_deployments().await.unwrap().len(), 1);
}
