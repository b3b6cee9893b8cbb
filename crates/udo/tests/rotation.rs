//! Blue/green rotation, rollback and per-role leases.

mod common;

use std::time::Duration;

use common::{edited_prod_web, Harness};
use udo::{GroupState, LaunchConfigUpdate, UdoError};
use udo_cloud::mock::{HealthMode, InjectedFailure, MockControlPlane};

/// Healthy instances across every `prod/web` group in one provider sample.
fn prod_web_healthy(sample: &std::collections::BTreeMap<String, u32>) -> u32 {
    sample
        .iter()
        .filter(|(name, _)| name.starts_with("prod-web-v"))
        .map(|(_, healthy)| healthy)
        .sum()
}

#[tokio::test]
async fn test_reload_keeps_capacity_serving() {
    let h = Harness::new(MockControlPlane::new());
    h.cloud
        .set_health_mode("prod-web-v2", HealthMode::Gradual { per_poll: 1 });
    let target = h.target("prod", "web");
    h.fleet.groups.create(&target).await.unwrap();
    let before = h.cloud.health_samples().len();

    let report = h.fleet.groups.reload(&target).await.unwrap();

    assert_eq!(report.old_group, "prod-web-v1");
    assert_eq!(report.new_group, "prod-web-v2");
    assert_eq!(report.from_version, Some(1));
    assert_eq!(report.to_version, 2);
    assert_eq!(report.desired, 2);
    assert!(report.samples.len() >= 2);
    for sample in &report.samples {
        assert!(sample.old_healthy + sample.new_healthy >= report.desired);
    }

    let samples = h.cloud.health_samples();
    assert!(samples.len() > before);
    for sample in &samples[before..] {
        assert!(prod_web_healthy(sample) >= 2, "capacity dipped: {sample:?}");
    }

    assert_eq!(h.cloud.group_names(), vec!["prod-web-v2"]);
    let launch_configs = h.launch_configs("prod", "web");
    assert_eq!(launch_configs.len(), 1);
    assert!(launch_configs[0].starts_with("prod-web-v2-"));

    let status = h.fleet.groups.status(&target).await.unwrap();
    assert_eq!(status.state, GroupState::Active);
    assert_eq!(status.current_version, Some(2));
}

#[tokio::test]
async fn test_unhealthy_rotation_rolls_back() {
    let h = Harness::new(MockControlPlane::new());
    h.cloud.set_health_mode("prod-web-v2", HealthMode::Never);
    let target = h.target("prod", "web");
    h.fleet.groups.create(&target).await.unwrap();
    let original = h.launch_configs("prod", "web");

    let err = h.fleet.groups.reload(&target).await.unwrap_err();
    assert!(matches!(err, UdoError::RotationFailure { ref role, .. } if role == "prod/web"));

    assert_eq!(h.cloud.group_names(), vec!["prod-web-v1"]);
    assert_eq!(h.launch_configs("prod", "web"), original);

    let old = h.cloud.peek_group("prod-web-v1").unwrap();
    assert_eq!(old.capacity.desired, 2);
    assert_eq!(old.healthy_count(), 2);

    let status = h.fleet.groups.status(&target).await.unwrap();
    assert_eq!(status.state, GroupState::Active);
    assert_eq!(status.current_version, Some(1));
}

#[tokio::test]
async fn test_failed_registration_rolls_back() {
    let h = Harness::new(MockControlPlane::new());
    let target = h.target("prod", "web");
    h.fleet.groups.create(&target).await.unwrap();
    let original = h.launch_configs("prod", "web");
    h.cloud
        .inject_failures("register_group", InjectedFailure::Permanent, 1);

    let err = h.fleet.groups.reload(&target).await.unwrap_err();
    assert!(matches!(err, UdoError::RotationFailure { ref role, .. } if role == "prod/web"));

    // The old group never stopped serving and the new version is gone.
    assert_eq!(h.cloud.group_names(), vec!["prod-web-v1"]);
    assert_eq!(h.launch_configs("prod", "web"), original);
    let calls = h.cloud.calls();
    assert!(calls
        .iter()
        .any(|c| c.starts_with("register_launch_config prod-web-v2-")));
    assert!(calls
        .iter()
        .any(|c| c.starts_with("delete_launch_config prod-web-v2-")));
    assert!(!calls.iter().any(|c| c.starts_with("update_capacity prod-web-v1")));

    let old = h.cloud.peek_group("prod-web-v1").unwrap();
    assert_eq!(old.capacity.desired, 2);
    assert_eq!(old.healthy_count(), 2);

    let status = h.fleet.groups.status(&target).await.unwrap();
    assert_eq!(status.state, GroupState::Active);
    assert_eq!(status.current_version, Some(1));
}

#[tokio::test]
async fn test_reload_without_group() {
    let h = Harness::new(MockControlPlane::new());
    let target = h.target("prod", "web");

    let err = h.fleet.groups.reload(&target).await.unwrap_err();
    assert!(matches!(err, UdoError::NotFound(_)));
    assert!(h.launch_configs("prod", "web").is_empty());
}

#[tokio::test]
async fn test_concurrent_reloads() {
    let h = Harness::new(MockControlPlane::new());
    h.cloud
        .set_health_mode("prod-web-v2", HealthMode::Gradual { per_poll: 1 });
    let target = h.target("prod", "web");
    h.fleet.groups.create(&target).await.unwrap();

    let (first, second) = tokio::join!(
        h.fleet.groups.reload(&target),
        h.fleet.groups.reload(&target)
    );

    assert_eq!(first.unwrap().new_group, "prod-web-v2");
    assert!(matches!(second, Err(UdoError::RotationInProgress(role)) if role == "prod/web"));
    assert_eq!(h.cloud.group_names(), vec!["prod-web-v2"]);
}

#[tokio::test]
async fn test_scale_during_rotation_is_refused() {
    let h = Harness::new(MockControlPlane::new());
    h.cloud
        .set_health_mode("prod-web-v2", HealthMode::Gradual { per_poll: 1 });
    let target = h.target("prod", "web");
    h.fleet.groups.create(&target).await.unwrap();

    let (reload, scale) = tokio::join!(
        h.fleet.groups.reload(&target),
        h.fleet.groups.scale(&target, 3)
    );
    reload.unwrap();
    assert!(matches!(scale, Err(UdoError::RotationInProgress(_))));

    // Lease released once the rotation returns.
    h.fleet.groups.scale(&target, 3).await.unwrap();
    assert_eq!(h.cloud.peek_group("prod-web-v2").unwrap().capacity.desired, 3);
}

#[tokio::test]
async fn test_status_during_rotation() {
    let h = Harness::new(MockControlPlane::new());
    h.cloud
        .set_health_mode("prod-web-v2", HealthMode::Gradual { per_poll: 1 });
    let target = h.target("prod", "web");
    h.fleet.groups.create(&target).await.unwrap();

    let observe = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.fleet.groups.status(&target).await
    };
    let (reload, status) = tokio::join!(h.fleet.groups.reload(&target), observe);

    reload.unwrap();
    let status = status.unwrap();
    assert_eq!(status.state, GroupState::Rotating);
    assert_eq!(status.groups, vec!["prod-web-v1", "prod-web-v2"]);
}

#[tokio::test]
async fn test_distinct_roles_run_in_parallel() {
    let h = Harness::new(MockControlPlane::new());
    let web = h.target("stage", "web");
    let worker = h.target("stage", "worker");

    let (web, worker) = tokio::join!(h.fleet.groups.create(&web), h.fleet.groups.create(&worker));
    web.unwrap();
    worker.unwrap();
    assert_eq!(h.cloud.group_names(), vec!["stage-web-v1", "stage-worker-v1"]);
}

#[tokio::test]
async fn test_update_lc_unchanged() {
    let h = Harness::new(MockControlPlane::new());
    let target = h.target("prod", "web");
    h.fleet.groups.create(&target).await.unwrap();

    let outcome = h.fleet.groups.update_lc(&target).await.unwrap();
    match outcome {
        LaunchConfigUpdate::Unchanged { launch_config } => {
            assert_eq!(vec![launch_config], h.launch_configs("prod", "web"));
        }
        other => panic!("expected unchanged, got {other:?}"),
    }
}

#[tokio::test]
async fn test_update_lc_reattaches_in_place() {
    let h = Harness::new(MockControlPlane::new());
    h.fleet.groups.create(&h.target("prod", "web")).await.unwrap();
    let edited = edited_prod_web();

    let outcome = h.fleet.groups.update_lc(&edited).await.unwrap();
    let (group, from, to) = match outcome {
        LaunchConfigUpdate::Reattached { group, from, to } => (group, from, to),
        other => panic!("expected reattach, got {other:?}"),
    };
    assert_eq!(group, "prod-web-v1");
    assert!(from.unwrap().starts_with("prod-web-v1-"));
    assert!(to.starts_with("prod-web-v2-"));

    // Group keeps its name; the replaced launch configuration is retired.
    assert_eq!(h.cloud.group_names(), vec!["prod-web-v1"]);
    assert_eq!(h.launch_configs("prod", "web"), vec![to.clone()]);
    assert_eq!(
        h.cloud.peek_group("prod-web-v1").unwrap().launch_config,
        Some(to)
    );

    let status = h.fleet.groups.status(&edited).await.unwrap();
    assert_eq!(status.current_version, Some(2));
}

#[tokio::test]
async fn test_update_lc_rotates_without_live_reattach() {
    let h = Harness::new(MockControlPlane::new().with_live_reattach(false));
    h.fleet.groups.create(&h.target("prod", "web")).await.unwrap();

    let outcome = h.fleet.groups.update_lc(&edited_prod_web()).await.unwrap();
    let report = match outcome {
        LaunchConfigUpdate::Rotated(report) => report,
        other => panic!("expected rotation, got {other:?}"),
    };
    assert_eq!(report.new_group, "prod-web-v2");
    assert_eq!(h.cloud.group_names(), vec!["prod-web-v2"]);
    assert_eq!(h.launch_configs("prod", "web").len(), 1);
    assert!(!h
        .cloud
        .calls()
        .iter()
        .any(|c| c.starts_with("attach_launch_config")));
}
