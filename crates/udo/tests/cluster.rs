//! Cluster-wide create and status.

mod common;

use common::Harness;
use udo::{GroupState, UdoError};
use udo_cloud::mock::{HealthMode, InjectedFailure, MockControlPlane};

#[test]
fn test_list_clusters() {
    let h = Harness::new(MockControlPlane::new());

    let clusters = h.fleet.clusters.list();
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].name, "prod");
    assert_eq!(clusters[0].roles, vec!["web"]);
    assert_eq!(clusters[1].name, "stage");
    assert_eq!(clusters[1].roles, vec!["web", "worker"]);
}

#[tokio::test]
async fn test_create_cluster() {
    let h = Harness::new(MockControlPlane::new());

    let report = h.fleet.clusters.create("stage").await.unwrap();

    assert!(report.is_success());
    assert!(report.vpc_id.starts_with("vpc-"));
    assert_eq!(report.roles.len(), 2);
    assert!(h.cloud.calls().contains(&"ensure_vpc stage".to_string()));
    assert_eq!(h.cloud.group_names(), vec!["stage-web-v1", "stage-worker-v1"]);

    let status = h.fleet.clusters.status("stage").await.unwrap();
    assert!(status.healthy());
    for role in status.roles.values() {
        assert_eq!(role.as_ref().unwrap().state, GroupState::Active);
    }
}

#[tokio::test]
async fn test_create_cluster_boots_roles_into_its_vpc() {
    let h = Harness::new(MockControlPlane::new());

    let report = h.fleet.clusters.create("stage").await.unwrap();

    let launch_configs = h.cloud.launch_config_names();
    assert_eq!(launch_configs.len(), 2);
    for name in &launch_configs {
        let spec = h.cloud.launch_config_spec(name).unwrap();
        assert!(
            spec.user_data.contains(&format!("UDO_VPC={}", report.vpc_id)),
            "{name} boots without its VPC:\n{}",
            spec.user_data
        );
    }
}

#[tokio::test]
async fn test_empty_status_is_not_healthy() {
    let h = Harness::new(MockControlPlane::new());
    h.fleet.clusters.create("stage").await.unwrap();

    let mut status = h.fleet.clusters.status("stage").await.unwrap();
    assert!(status.healthy());
    status.roles.clear();
    assert!(!status.healthy());
}

#[tokio::test]
async fn test_create_cluster_reports_failed_roles() {
    let h = Harness::new(MockControlPlane::new());
    h.cloud
        .inject_failures("register_group", InjectedFailure::Permanent, 1);

    let report = h.fleet.clusters.create("stage").await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failed_roles().len(), 1);
    // The failed role leaves nothing behind; the other role is untouched.
    assert_eq!(h.cloud.group_names().len(), 1);
    assert_eq!(h.cloud.launch_config_names().len(), 1);
}

#[tokio::test]
async fn test_status_of_partially_healthy_cluster() {
    let h = Harness::new(MockControlPlane::new());
    h.cloud.set_health_mode("stage-worker", HealthMode::Never);
    h.fleet.clusters.create("stage").await.unwrap();

    let status = h.fleet.clusters.status("stage").await.unwrap();
    assert!(!status.healthy());
    let worker = status.roles["worker"].as_ref().unwrap();
    assert_eq!(worker.healthy_instance_count, 0);
    assert!(status.roles["web"].as_ref().unwrap().is_healthy());
}

#[tokio::test]
async fn test_unknown_cluster() {
    let h = Harness::new(MockControlPlane::new());

    let err = h.fleet.clusters.create("qa").await.unwrap_err();
    assert!(matches!(err, UdoError::UnknownCluster(_)));
    assert!(h.cloud.calls().is_empty());
}
