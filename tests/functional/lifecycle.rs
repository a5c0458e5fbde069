//! Phase lifecycle scenarios

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use lotus_operator::Error;
use lotus_operator::config::{Config, DataSourceKind};
use lotus_operator::controller::sync;
use lotus_operator::crd::{Lotus, LotusPhase, StageSpec};

use super::{Harness, KEY};
use crate::common::*;

const NS: &str = TEST_NAMESPACE;

fn lotus(h: &Harness) -> Lotus {
    h.cluster().object::<Lotus>(NS, "load-001").unwrap()
}

/// Drive a fresh load-001 up to `Running` with a successful preparer
async fn run_to_running(h: &Harness) {
    assert_eq!(h.step(KEY).await, LotusPhase::Pending);
    assert_eq!(h.step(KEY).await, LotusPhase::Preparing);
    assert_eq!(h.step(KEY).await, LotusPhase::Preparing);
    h.cluster().set_job_status(NS, "load-001-preparer", 1, 0);
    assert_eq!(h.step(KEY).await, LotusPhase::Running);
}

#[tokio::test]
async fn test_successful_run_reaches_succeeded() {
    let h = Harness::new();
    h.insert(&load_001().build());

    run_to_running(&h).await;

    assert_eq!(h.step(KEY).await, LotusPhase::Running);
    assert!(h.cluster().exists::<Job>(NS, "load-001-monitor"));
    h.cluster().set_job_status(NS, "load-001-monitor", 1, 0);

    assert_eq!(h.step(KEY).await, LotusPhase::Cleaning);
    assert!(!h.cluster().exists::<Deployment>(NS, "load-001-worker"));

    assert_eq!(h.step(KEY).await, LotusPhase::Cleaning);
    h.cluster().set_job_status(NS, "load-001-cleaner", 1, 0);
    assert_eq!(h.step(KEY).await, LotusPhase::Succeeded);

    let status = lotus(&h).status.unwrap();
    assert!(status.preparer_start_time.is_some());
    assert!(status.preparer_completion_time.is_some());
    assert!(status.worker_start_time.is_some());
    assert!(status.worker_completion_time.is_some());
    assert!(status.cleaner_start_time.is_some());
    assert!(status.cleaner_completion_time.is_some());
}

#[tokio::test]
async fn test_failed_monitor_routes_through_failure_cleaning() {
    let h = Harness::new();
    h.insert(&load_001().build());
    run_to_running(&h).await;

    h.step(KEY).await;
    h.cluster().set_job_status(NS, "load-001-monitor", 0, 1);
    assert_eq!(h.step(KEY).await, LotusPhase::FailureCleaning);
    assert!(!h.cluster().exists::<Deployment>(NS, "load-001-worker"));

    h.step(KEY).await;
    h.cluster().set_job_status(NS, "load-001-cleaner", 1, 0);
    assert_eq!(h.step(KEY).await, LotusPhase::Failed);
}

#[tokio::test]
async fn test_failed_cleaner_after_success_fails_the_test() {
    let h = Harness::new();
    h.insert(&load_001().build());
    run_to_running(&h).await;

    h.step(KEY).await;
    h.cluster().set_job_status(NS, "load-001-monitor", 1, 0);
    assert_eq!(h.step(KEY).await, LotusPhase::Cleaning);

    h.step(KEY).await;
    h.cluster().set_job_status(NS, "load-001-cleaner", 0, 1);
    assert_eq!(h.step(KEY).await, LotusPhase::Failed);
}

#[tokio::test]
async fn test_preparer_failure_skips_the_run() {
    let h = Harness::new();
    h.insert(&load_001().build());

    h.step(KEY).await;
    h.step(KEY).await;
    h.step(KEY).await;
    h.cluster().set_job_status(NS, "load-001-preparer", 0, 1);
    assert_eq!(h.step(KEY).await, LotusPhase::FailureCleaning);

    assert!(!h.cluster().exists::<Deployment>(NS, "load-001-worker"));
    assert!(!h.cluster().exists::<Pod>(NS, "load-001-prometheus"));
    assert!(!h.cluster().exists::<Job>(NS, "load-001-monitor"));

    let status = lotus(&h).status.unwrap();
    assert!(status.preparer_completion_time.is_some());
    assert!(status.worker_start_time.is_none());
    assert!(status.cleaner_start_time.is_some());
}

#[tokio::test]
async fn test_without_preparer_or_cleaner() {
    let h = Harness::new();
    h.insert(&LotusBuilder::new("load-001", NS).build());

    assert_eq!(h.step(KEY).await, LotusPhase::Pending);
    assert_eq!(h.step(KEY).await, LotusPhase::Preparing);
    // No preparer: straight to Running in the same sync
    assert_eq!(h.step(KEY).await, LotusPhase::Running);
    assert!(!h.cluster().exists::<Job>(NS, "load-001-preparer"));

    h.step(KEY).await;
    h.cluster().set_job_status(NS, "load-001-monitor", 1, 0);
    assert_eq!(h.step(KEY).await, LotusPhase::Cleaning);
    assert_eq!(h.step(KEY).await, LotusPhase::Succeeded);
    assert!(!h.cluster().exists::<Job>(NS, "load-001-cleaner"));

    let status = lotus(&h).status.unwrap();
    assert!(status.worker_start_time.is_some());
    assert!(status.worker_completion_time.is_some());
    assert!(status.preparer_start_time.is_none());
    assert!(status.cleaner_start_time.is_none());
}

#[tokio::test]
async fn test_single_replica_end_to_end() {
    let h = Harness::new();
    h.insert(
        &LotusBuilder::new("load-001", NS)
            .with_worker(|w| w.replicas = Some(1))
            .build(),
    );

    h.step(KEY).await;
    h.step(KEY).await;
    assert_eq!(h.step(KEY).await, LotusPhase::Running);

    let c = h.cluster();
    let deployment = c.object::<Deployment>(NS, "load-001-worker").unwrap();
    let spec = deployment.spec.unwrap();
    assert_eq!(spec.replicas, Some(1));
    let pod = spec.template.spec.unwrap();
    assert_eq!(pod.containers.len(), 1);
    assert_eq!(pod.containers[0].name, "worker");
    let service = c.object::<Service>(NS, "load-001-worker").unwrap();
    assert_eq!(service.spec.unwrap().ports.unwrap()[0].port, 8081);

    h.step(KEY).await;
    assert!(c.exists::<Job>(NS, "load-001-monitor"));
    c.set_job_status(NS, "load-001-monitor", 1, 0);
    assert_eq!(h.step(KEY).await, LotusPhase::Cleaning);
    assert!(!c.exists::<Deployment>(NS, "load-001-worker"));
    assert_eq!(h.step(KEY).await, LotusPhase::Succeeded);

    let status = lotus(&h).status.unwrap();
    assert!(status.worker_start_time.is_some());
    assert!(status.worker_completion_time.is_some());
    assert!(status.cleaner_start_time.is_none());
}

#[tokio::test]
async fn test_failure_without_cleaner() {
    let h = Harness::new();
    h.insert(&LotusBuilder::new("load-001", NS).build());

    h.step(KEY).await;
    h.step(KEY).await;
    h.step(KEY).await;
    h.step(KEY).await;
    h.cluster().set_job_status(NS, "load-001-monitor", 0, 1);
    assert_eq!(h.step(KEY).await, LotusPhase::FailureCleaning);
    assert_eq!(h.step(KEY).await, LotusPhase::Failed);
    assert!(!h.cluster().exists::<Deployment>(NS, "load-001-worker"));

    let status = lotus(&h).status.unwrap();
    assert!(status.worker_completion_time.is_some());
    assert!(status.cleaner_start_time.is_none());
}

#[tokio::test]
async fn test_accepting_creates_nothing() {
    let h = Harness::new();
    h.insert(&load_001().build());

    assert_eq!(h.step(KEY).await, LotusPhase::Pending);
    assert_eq!(h.creates(), 0);
    assert_eq!(h.step(KEY).await, LotusPhase::Preparing);
    assert_eq!(h.creates(), 0);
}

#[tokio::test]
async fn test_running_path_creates_observability_resources() {
    let h = Harness::new();
    h.insert(&load_001().build());
    run_to_running(&h).await;

    let c = h.cluster();
    assert!(c.exists::<ConfigMap>(NS, "load-001-prometheus"));
    assert!(c.exists::<Pod>(NS, "load-001-prometheus"));
    assert!(c.exists::<Service>(NS, "load-001-prometheus"));
    assert!(c.exists::<Service>(NS, "load-001-worker"));
    assert!(c.exists::<ConfigMap>(NS, "load-001-monitor"));

    let worker = c.object::<Deployment>(NS, "load-001-worker").unwrap();
    assert_eq!(worker.spec.unwrap().replicas, Some(3));

    let pod = c.object::<Pod>(NS, "load-001-prometheus").unwrap();
    assert_eq!(
        pod.spec.unwrap().service_account_name.as_deref(),
        Some("lotus-prometheus")
    );
}

#[tokio::test]
async fn test_monitor_config_points_checks_at_local_prometheus() {
    let h = Harness::new();
    h.insert(&load_001().build());
    run_to_running(&h).await;

    let cm = h
        .cluster()
        .object::<ConfigMap>(NS, "load-001-monitor")
        .unwrap();
    let config = Config::from_yaml(&cm.data.unwrap()["config.yaml"]).unwrap();

    let local = config
        .data_sources
        .iter()
        .find(|d| d.name == "_LocalPrometheus")
        .unwrap();
    let DataSourceKind::Prometheus(p) = &local.kind;
    assert_eq!(
        p.address,
        "http://load-001-prometheus.load.svc.cluster.local:9090"
    );

    let global = config
        .checks
        .iter()
        .find(|c| c.name == "GlobalFailureRate")
        .unwrap();
    assert_eq!(global.data_source(), Some("thanos"));
    let declared = config.checks.iter().find(|c| c.name == "HighLatency").unwrap();
    assert_eq!(declared.data_source(), Some("_LocalPrometheus"));
    assert_eq!(config.receivers.len(), 2);
}

#[tokio::test]
async fn test_repeated_syncs_are_idempotent() {
    let h = Harness::new();
    h.insert(&load_001().build());
    run_to_running(&h).await;

    h.step(KEY).await;
    let creates = h.creates();
    let writes = h.status_writes();
    for _ in 0..5 {
        assert_eq!(h.step(KEY).await, LotusPhase::Running);
    }
    assert_eq!(h.creates(), creates);
    assert_eq!(h.status_writes(), writes);
    assert_eq!(h.cluster().names("Job").len(), 2);
}

#[tokio::test]
async fn test_terminal_phases_are_left_alone() {
    for phase in [LotusPhase::Succeeded, LotusPhase::Failed] {
        let h = Harness::new();
        h.insert(&load_001().with_phase(phase).build());

        assert_eq!(h.step(KEY).await, phase);
        assert_eq!(h.creates(), 0);
        assert_eq!(h.status_writes(), 0);
    }
}

#[tokio::test]
async fn test_unknown_phase_is_ignored() {
    let h = Harness::new();
    h.insert(&load_001().with_phase(LotusPhase::Unknown).build());

    assert_eq!(h.step(KEY).await, LotusPhase::Unknown);
    assert_eq!(h.creates(), 0);
    assert_eq!(h.status_writes(), 0);
}

#[tokio::test]
async fn test_deleted_lotus_is_not_an_error() {
    let h = Harness::new();
    sync(&h.ctx, "load/gone").await.unwrap();
    assert_eq!(h.creates(), 0);
}

#[tokio::test]
async fn test_invalid_key() {
    let h = Harness::new();
    let err = sync(&h.ctx, "not-a-key").await.unwrap_err();
    assert!(matches!(err, Error::InvalidKey(_)));
}

#[tokio::test]
async fn test_init_and_pending_do_not_validate() {
    let h = Harness::new();
    h.insert(
        &LotusBuilder::new("load-001", NS)
            .without_worker()
            .with_check("Latency", "x > 1", "soon")
            .build(),
    );

    assert_eq!(h.step(KEY).await, LotusPhase::Pending);
    assert_eq!(h.step(KEY).await, LotusPhase::Preparing);
    assert_eq!(h.creates(), 0);
}

#[tokio::test]
async fn test_missing_worker_fails_before_running() {
    let h = Harness::new();
    h.insert(&LotusBuilder::new("load-001", NS).without_worker().build());

    h.step(KEY).await;
    h.step(KEY).await;
    assert_eq!(h.step(KEY).await, LotusPhase::FailureCleaning);
    assert_eq!(h.step(KEY).await, LotusPhase::Failed);
    assert_eq!(h.creates(), 0);

    let status = lotus(&h).status.unwrap();
    assert!(status.worker_start_time.is_none());
    assert!(status.cleaner_start_time.is_none());
}

#[tokio::test]
async fn test_unparseable_check_fails_before_running() {
    let h = Harness::new();
    h.insert(
        &LotusBuilder::new("load-001", NS)
            .with_check("Latency", "x > 1", "soon")
            .with_phase(LotusPhase::Preparing)
            .build(),
    );

    assert_eq!(h.step(KEY).await, LotusPhase::FailureCleaning);
    assert!(h.cluster().names("Job").is_empty());
    assert!(!h.cluster().exists::<Deployment>(NS, "load-001-worker"));
}

#[tokio::test]
async fn test_invalid_declaration_skips_the_preparer_but_still_cleans() {
    let h = Harness::new();
    h.insert(
        &load_001()
            .with_phase(LotusPhase::Preparing)
            .with_worker(|w| w.metrics_port = None)
            .build(),
    );

    assert_eq!(h.step(KEY).await, LotusPhase::FailureCleaning);
    assert_eq!(h.creates(), 0);

    h.step(KEY).await;
    assert_eq!(h.cluster().names("Job"), vec!["load-001-cleaner".to_string()]);
    h.cluster().set_job_status(NS, "load-001-cleaner", 1, 0);
    assert_eq!(h.step(KEY).await, LotusPhase::Failed);
}

#[tokio::test]
async fn test_empty_cleaner_fails_the_test() {
    let h = Harness::new();
    h.insert(
        &LotusBuilder::new("load-001", NS)
            .with_spec(|s| s.cleaner = Some(StageSpec::default()))
            .with_phase(LotusPhase::Cleaning)
            .build(),
    );

    assert_eq!(h.step(KEY).await, LotusPhase::Failed);
    assert_eq!(h.creates(), 0);
}

#[tokio::test]
async fn test_stale_cache_skips_status_write() {
    let h = Harness::new();
    h.insert(&load_001().with_phase(LotusPhase::Pending).build());
    // Another writer already moved the test on; the cache has not seen it yet
    h.cluster()
        .set_live_phase(NS, "load-001", LotusPhase::Preparing);

    sync(&h.ctx, KEY).await.unwrap();
    assert_eq!(h.status_writes(), 0);
    assert_eq!(h.cluster().phase(NS, "load-001"), LotusPhase::Preparing);

    h.cluster().refresh_cache(NS, "load-001");
    sync(&h.ctx, KEY).await.unwrap();
    assert_eq!(h.cluster().names("Job"), vec!["load-001-preparer".to_string()]);
}

#[tokio::test]
async fn test_conflicting_status_write_is_retried() {
    let h = Harness::new();
    h.insert(&load_001().build());

    h.cluster().fail_next("LotusStatus", 409);
    let err = sync(&h.ctx, KEY).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(h.cluster().phase(NS, "load-001"), LotusPhase::Init);

    assert_eq!(h.step(KEY).await, LotusPhase::Pending);
}

#[tokio::test]
async fn test_failed_create_leaves_phase_unchanged() {
    let h = Harness::new();
    h.insert(&load_001().with_phase(LotusPhase::Preparing).build());

    h.cluster().fail_next("Job", 500);
    assert!(sync(&h.ctx, KEY).await.is_err());
    assert_eq!(h.cluster().phase(NS, "load-001"), LotusPhase::Preparing);

    assert_eq!(h.step(KEY).await, LotusPhase::Preparing);
    assert!(h.cluster().exists::<Job>(NS, "load-001-preparer"));
}

#[tokio::test]
async fn test_timestamps_never_move() {
    let h = Harness::new();
    h.insert(&load_001().build());
    run_to_running(&h).await;

    let before = lotus(&h).status.unwrap();
    for _ in 0..3 {
        h.step(KEY).await;
    }
    let after = lotus(&h).status.unwrap();
    assert_eq!(before.preparer_start_time, after.preparer_start_time);
    assert_eq!(before.worker_start_time, after.worker_start_time);
    assert!(after.worker_completion_time.is_none());
}
