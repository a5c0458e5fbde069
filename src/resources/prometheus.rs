//! Per-test Prometheus with a Thanos sidecar
//!
//! Each test gets its own short-lived Prometheus scraping the worker
//! Service. The sidecar exposes the collected series to the release-wide
//! Thanos query and, when long-term storage is configured, uploads blocks.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, Pod,
    PodSpec, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::config::{Config, DataSource, DataSourceKind, PrometheusDataSource};
use crate::controller::error::Result;
use crate::crd::{Lotus, LotusCheck};
use crate::resources::common::{
    PROMETHEUS_IMAGE, THANOS_IMAGE, owner_reference, prometheus_name, prometheus_pod_labels,
    prometheus_service_labels, standard_labels, with_standard_labels, worker_name,
};
use crate::resources::templates::{render_prometheus_config, render_prometheus_rules};
use crate::resources::thanos::{set_gcs_credentials, set_time_series_store_config, thanos_ports};

/// Name of the data source pointing at the test's own Prometheus
pub const LOCAL_PROMETHEUS_DATA_SOURCE: &str = "_LocalPrometheus";

const CONFIG_DIR: &str = "/etc/prometheus";
const CONFIG_FILE: &str = "prometheus-config.yaml";
const RULE_FILE: &str = "prometheus-rule.yaml";
const DATA_DIR: &str = "/var/prometheus";
const PORT: i32 = 9090;
const BLOCK_DURATION: &str = "1m";

/// Data source the monitor uses to query the test's Prometheus
pub fn local_data_source(lotus: &Lotus) -> DataSource {
    DataSource {
        name: LOCAL_PROMETHEUS_DATA_SOURCE.to_string(),
        kind: DataSourceKind::Prometheus(PrometheusDataSource {
            address: format!(
                "http://{}.{}.svc.cluster.local:{}",
                prometheus_name(&lotus.name_any()),
                lotus.namespace().unwrap_or_default(),
                PORT
            ),
        }),
    }
}

/// Generate the Prometheus config and rules ConfigMap
///
/// Global checks from the static config come first, followed by the test's
/// own checks.
pub fn generate_prometheus_config_map(
    lotus: &Lotus,
    global_checks: &[LotusCheck],
) -> Result<ConfigMap> {
    let lotus_name = lotus.name_any();
    let config = render_prometheus_config(
        &prometheus_name(&lotus_name),
        &lotus.namespace().unwrap_or_default(),
        &worker_name(&lotus_name),
        &[format!("{}/{}", CONFIG_DIR, RULE_FILE)],
    )?;

    let alerts: Vec<LotusCheck> = global_checks
        .iter()
        .chain(lotus.spec.checks.iter())
        .cloned()
        .collect();
    let rules = render_prometheus_rules(&alerts)?;

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(prometheus_name(&lotus_name)),
            namespace: lotus.namespace(),
            labels: Some(standard_labels()),
            owner_references: Some(vec![owner_reference(lotus)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (CONFIG_FILE.to_string(), config),
            (RULE_FILE.to_string(), rules),
        ])),
        ..Default::default()
    })
}

fn shared_mounts() -> Vec<VolumeMount> {
    vec![
        VolumeMount {
            name: "config".to_string(),
            mount_path: CONFIG_DIR.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: "db".to_string(),
            mount_path: DATA_DIR.to_string(),
            ..Default::default()
        },
    ]
}

/// Generate the Prometheus Pod
pub fn generate_prometheus_pod(
    lotus: &Lotus,
    config: &Config,
    release: &str,
    service_account: Option<&str>,
) -> Pod {
    let lotus_name = lotus.name_any();

    let mut volumes = vec![
        Volume {
            name: "db".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: prometheus_name(&lotus_name),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    let prometheus = Container {
        name: "prometheus".to_string(),
        image: Some(PROMETHEUS_IMAGE.to_string()),
        args: Some(vec![
            format!("--config.file={}/{}", CONFIG_DIR, CONFIG_FILE),
            format!("--storage.tsdb.path={}", DATA_DIR),
            format!("--storage.tsdb.min-block-duration={}", BLOCK_DURATION),
            format!("--storage.tsdb.max-block-duration={}", BLOCK_DURATION),
            "--storage.tsdb.retention=6h".to_string(),
            "--web.enable-lifecycle".to_string(),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("prom-http".to_string()),
            container_port: PORT,
            ..Default::default()
        }]),
        volume_mounts: Some(shared_mounts()),
        ..Default::default()
    };

    let mut sidecar = Container {
        name: "thanos-sidecar".to_string(),
        image: Some(THANOS_IMAGE.to_string()),
        args: Some(vec![
            "sidecar".to_string(),
            format!("--tsdb.path={}", DATA_DIR),
            format!("--prometheus.url=http://127.0.0.1:{}", PORT),
            "--cluster.disable".to_string(),
        ]),
        ports: Some(thanos_ports()),
        volume_mounts: Some(shared_mounts()),
        ..Default::default()
    };

    if let Some(storage) = &config.time_series_storage {
        set_time_series_store_config(&mut sidecar, &mut volumes, release);
        if let Some(credentials) = storage.credentials() {
            set_gcs_credentials(&mut sidecar, &mut volumes, credentials);
        }
    }

    let labels = prometheus_pod_labels(&lotus_name, release);
    Pod {
        metadata: ObjectMeta {
            name: Some(prometheus_name(&lotus_name)),
            namespace: lotus.namespace(),
            labels: Some(with_standard_labels(&labels)),
            owner_references: Some(vec![owner_reference(lotus)]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![prometheus, sidecar],
            volumes: Some(volumes),
            service_account_name: service_account.map(str::to_string),
            ..Default::default()
        }),
        status: None,
    }
}

/// Generate the Service the monitor queries the Prometheus through
pub fn generate_prometheus_service(lotus: &Lotus) -> Service {
    let lotus_name = lotus.name_any();
    Service {
        metadata: ObjectMeta {
            name: Some(prometheus_name(&lotus_name)),
            namespace: lotus.namespace(),
            labels: Some(standard_labels()),
            owner_references: Some(vec![owner_reference(lotus)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(prometheus_service_labels(&lotus_name)),
            ports: Some(vec![ServicePort {
                name: Some("metrics".to_string()),
                port: PORT,
                target_port: Some(IntOrString::Int(PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}
