//! Unit tests for resource generators
//!
//! Tests for the run-once Jobs, the worker Deployment and Service, and the
//! per-test Prometheus.

use lotus_operator::Error;
use lotus_operator::resources::ResourceFactory;
use tempfile::NamedTempFile;

use crate::common::*;

fn factory_with<R>(yaml: &str, f: impl FnOnce(&ResourceFactory<'_>) -> R) -> R {
    let config: NamedTempFile = write_config_file(yaml);
    let settings = test_settings(&config);
    let lotus = load_001().build();
    let factory = ResourceFactory::new(&lotus, &settings);
    f(&factory)
}

mod job_tests {
    use super::*;
    use kube::ResourceExt;

    #[test]
    fn test_preparer_job_runs_once() {
        let job = factory_with(SAMPLE_CONFIG, |f| f.preparer_job().unwrap());

        assert_eq!(job.name_any(), "load-001-preparer");
        assert_eq!(job.namespace().as_deref(), Some(TEST_NAMESPACE));
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.containers[0].name, "preparer");
    }

    #[test]
    fn test_job_labels() {
        let job = factory_with(SAMPLE_CONFIG, |f| f.cleaner_job().unwrap());
        let labels = job.labels();
        assert_eq!(labels.get("app").map(String::as_str), Some("lotus-job"));
        assert_eq!(labels.get("lotus").map(String::as_str), Some("load-001"));
        assert_eq!(labels.get("job-type").map(String::as_str), Some("cleaner"));
        assert_eq!(
            labels.get("app.kubernetes.io/managed-by").map(String::as_str),
            Some("lotus-operator")
        );
    }

    #[test]
    fn test_owned_by_lotus() {
        let job = factory_with(SAMPLE_CONFIG, |f| f.preparer_job().unwrap());
        let owners = job.owner_references();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Lotus");
        assert_eq!(owners[0].name, "load-001");
        assert_eq!(owners[0].uid, "uid-load-001");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn test_missing_stage_is_a_validation_error() {
        let config = write_config_file(SAMPLE_CONFIG);
        let settings = test_settings(&config);
        let lotus = LotusBuilder::new("load-001", TEST_NAMESPACE).build();
        let factory = ResourceFactory::new(&lotus, &settings);
        assert!(matches!(
            factory.preparer_job(),
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn test_monitor_job_args_and_credentials() {
        let job = factory_with(SAMPLE_CONFIG, |f| f.monitor_job().unwrap());
        let pod = job.spec.unwrap().template.spec.unwrap();
        let monitor = &pod.containers[0];

        assert_eq!(monitor.image.as_deref(), Some("lotusload/lotus:test"));
        let args = monitor.args.clone().unwrap();
        assert_eq!(args[0], "monitor");
        assert!(args.contains(&"--test-id=load-001".to_string()));
        assert!(args.contains(&"--run-time=10m".to_string()));
        assert!(args.contains(&"--collect-summary-datasource=_LocalPrometheus".to_string()));

        let env = monitor.env.clone().unwrap();
        assert_eq!(env[0].name, "GOOGLE_APPLICATION_CREDENTIALS");
        assert_eq!(
            env[0].value.as_deref(),
            Some("/etc/creds/reports/key.json")
        );

        let volumes = pod.volumes.unwrap();
        assert!(volumes.iter().any(|v| v
            .secret
            .as_ref()
            .and_then(|s| s.secret_name.as_deref())
            == Some("gcs-sa")));
    }

    #[test]
    fn test_monitor_check_overrides() {
        let config = write_config_file(SAMPLE_CONFIG);
        let settings = test_settings(&config);
        let lotus = load_001()
            .with_check_interval(90)
            .with_check_initial_delay(30)
            .build();
        let job = ResourceFactory::new(&lotus, &settings).monitor_job().unwrap();
        let args = job.spec.unwrap().template.spec.unwrap().containers[0]
            .args
            .clone()
            .unwrap();
        assert!(args.contains(&"--check-interval=1m30s".to_string()));
        assert!(args.contains(&"--check-initial-delay=30s".to_string()));
    }
}

mod worker_tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use kube::ResourceExt;

    #[test]
    fn test_worker_deployment() {
        let deployment = factory_with(SAMPLE_CONFIG, |f| f.worker_deployment().unwrap());
        assert_eq!(deployment.name_any(), "load-001-worker");

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        let selector = spec.selector.match_labels.unwrap();
        assert_eq!(selector.get("app").map(String::as_str), Some("lotus-worker"));
        let template_labels = spec.template.metadata.unwrap().labels.unwrap();
        assert_eq!(template_labels, selector);
    }

    #[test]
    fn test_replicas_default_to_one() {
        let config = write_config_file(SAMPLE_CONFIG);
        let settings = test_settings(&config);
        for replicas in [None, Some(1)] {
            let lotus = LotusBuilder::new("load-001", TEST_NAMESPACE)
                .with_worker(|w| w.replicas = replicas)
                .build();
            let deployment = ResourceFactory::new(&lotus, &settings)
                .worker_deployment()
                .unwrap();
            let spec = deployment.spec.unwrap();
            assert_eq!(spec.replicas, Some(1));
            let pod = spec.template.spec.unwrap();
            assert_eq!(pod.restart_policy.as_deref(), Some("Always"));
        }
    }

    #[test]
    fn test_worker_service_exposes_metrics_port() {
        let service = factory_with(SAMPLE_CONFIG, |f| f.worker_service().unwrap());
        let spec = service.spec.unwrap();
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.name.as_deref(), Some("metrics"));
        assert_eq!(port.port, 8081);
        assert_eq!(port.target_port, Some(IntOrString::Int(8081)));
        assert_eq!(
            spec.selector.unwrap().get("lotus").map(String::as_str),
            Some("load-001")
        );
    }
}

mod prometheus_tests {
    use super::*;
    use kube::ResourceExt;

    #[test]
    fn test_config_map_scrapes_worker_service() {
        let cm = factory_with(SAMPLE_CONFIG, |f| f.prometheus_config_map().unwrap());
        let data = cm.data.unwrap();

        let config = &data["prometheus-config.yaml"];
        assert!(config.contains("regex: load-001-worker"));
        assert!(config.contains("- load"));
        assert!(config.contains("replica: load-001-prometheus"));
        assert!(config.contains("/etc/prometheus/prometheus-rule.yaml"));
    }

    #[test]
    fn test_rules_list_global_checks_first() {
        let cm = factory_with(SAMPLE_CONFIG, |f| f.prometheus_config_map().unwrap());
        let rules = &cm.data.unwrap()["prometheus-rule.yaml"];

        let global = rules.find("alert: \"GlobalFailureRate\"").unwrap();
        let declared = rules.find("alert: \"HighLatency\"").unwrap();
        assert!(global < declared);
        assert!(rules.contains("for: \"30s\""));
        assert!(rules.contains("record: lotus_virtual_user_failure_percentage"));
    }

    #[test]
    fn test_pod_without_storage() {
        let pod = factory_with(SAMPLE_CONFIG, |f| f.prometheus_pod().unwrap());
        assert_eq!(pod.name_any(), "load-001-prometheus");
        assert_eq!(
            pod.labels().get("lotus-thanos-peer").map(String::as_str),
            Some("lotus")
        );

        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        let names: Vec<_> = spec.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["prometheus", "thanos-sidecar"]);
        assert!(spec.containers[1].env.is_none());
        assert_eq!(spec.volumes.unwrap().len(), 2);
    }

    #[test]
    fn test_pod_with_storage_mounts_store_config() {
        let yaml = format!("{}{}", SAMPLE_CONFIG, STORAGE_SECTION);
        let pod = factory_with(&yaml, |f| f.prometheus_pod().unwrap());
        let spec = pod.spec.unwrap();

        let sidecar = &spec.containers[1];
        let args = sidecar.args.clone().unwrap();
        assert!(args.iter().any(|a| a.starts_with("--objstore.config-file=")));
        let env = sidecar.env.clone().unwrap();
        assert!(env.iter().any(|e| e.name == "GOOGLE_APPLICATION_CREDENTIALS"));

        let volumes = spec.volumes.unwrap();
        assert!(volumes.iter().any(|v| v.name == "time-series-store-config"));
        assert!(volumes.iter().any(|v| v.name == "gcs-credentials"));
    }

    #[test]
    fn test_service() {
        let service = factory_with(SAMPLE_CONFIG, |f| f.prometheus_service());
        let spec = service.spec.unwrap();
        assert_eq!(spec.ports.unwrap()[0].port, 9090);
        assert_eq!(
            spec.selector.unwrap().get("app").map(String::as_str),
            Some("lotus-prometheus")
        );
    }
}
