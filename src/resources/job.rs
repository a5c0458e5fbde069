//! Run-once Jobs: preparer, monitor and cleaner

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, PodSpec, PodTemplateSpec,
    SecretVolumeSource, Volume, VolumeMount,
};
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::config::{Config, ReceiverKind};
use crate::crd::Lotus;
use crate::resources::common::{
    JobRole, job_labels, job_name, owner_reference, standard_labels, with_standard_labels,
};
use crate::resources::prometheus::LOCAL_PROMETHEUS_DATA_SOURCE;

const MONITOR_CONFIG_DIR: &str = "/etc/monitor/config";
pub const MONITOR_CONFIG_FILE: &str = "config.yaml";

/// Generate a Job running `containers` once, without retries
pub fn generate_job(
    lotus: &Lotus,
    role: JobRole,
    containers: Vec<Container>,
    volumes: Vec<Volume>,
) -> Job {
    let lotus_name = lotus.name_any();
    let labels = job_labels(&lotus_name, role);

    Job {
        metadata: ObjectMeta {
            name: Some(job_name(&lotus_name, role)),
            namespace: lotus.namespace(),
            labels: Some(with_standard_labels(&labels)),
            owner_references: Some(vec![owner_reference(lotus)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers,
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Arguments of the monitor process for `lotus`
pub fn monitor_args(lotus: &Lotus) -> Vec<String> {
    let run_time = lotus
        .spec
        .worker
        .as_ref()
        .map(|w| w.run_time.as_str())
        .unwrap_or_default();

    let mut args = vec![
        "monitor".to_string(),
        format!("--test-id={}", lotus.name_any()),
        format!("--run-time={}", run_time),
        format!("--config-file={}/{}", MONITOR_CONFIG_DIR, MONITOR_CONFIG_FILE),
        format!(
            "--collect-summary-datasource={}",
            LOCAL_PROMETHEUS_DATA_SOURCE
        ),
    ];
    if let Some(secs) = lotus.spec.check_interval_seconds {
        args.push(format!("--check-interval={}", format_seconds(secs)));
    }
    if let Some(secs) = lotus.spec.check_initial_delay_seconds {
        args.push(format!("--check-initial-delay={}", format_seconds(secs)));
    }
    args
}

/// Format seconds as a compact duration such as `1m30s`
fn format_seconds(secs: i32) -> String {
    let secs = u64::try_from(secs).unwrap_or(0);
    if secs == 0 {
        return "0s".to_string();
    }
    humantime::format_duration(Duration::from_secs(secs))
        .to_string()
        .replace(' ', "")
}

/// Generate the monitor Job
///
/// The monitor reads its config from the monitor ConfigMap. Credentials of
/// GCS receivers are mounted from their secrets and exposed through
/// `GOOGLE_APPLICATION_CREDENTIALS`.
pub fn generate_monitor_job(lotus: &Lotus, config: &Config, image: &str) -> Job {
    let config_map = job_name(&lotus.name_any(), JobRole::Monitor);

    let mut volumes = vec![Volume {
        name: "config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map,
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: "config".to_string(),
        mount_path: MONITOR_CONFIG_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];
    let mut env = Vec::new();

    for receiver in &config.receivers {
        let ReceiverKind::Gcs(gcs) = &receiver.kind else {
            continue;
        };
        let Some(credentials) = &gcs.credentials else {
            continue;
        };
        let volume_name = format!("gcs-credentials-{}", receiver.name);
        volumes.push(Volume {
            name: volume_name.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(credentials.secret.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: volume_name,
            mount_path: receiver.credentials_mount_path(),
            read_only: Some(true),
            ..Default::default()
        });
        env.push(EnvVar {
            name: "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
            value: Some(receiver.credentials_file(&credentials.file)),
            ..Default::default()
        });
    }

    let container = Container {
        name: "monitor".to_string(),
        image: Some(image.to_string()),
        args: Some(monitor_args(lotus)),
        env: (!env.is_empty()).then_some(env),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    generate_job(lotus, JobRole::Monitor, vec![container], volumes)
}

/// Generate the ConfigMap holding the monitor's rendered config
pub fn generate_monitor_config_map(lotus: &Lotus, config_yaml: String) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(job_name(&lotus.name_any(), JobRole::Monitor)),
            namespace: lotus.namespace(),
            labels: Some(standard_labels()),
            owner_references: Some(vec![owner_reference(lotus)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            MONITOR_CONFIG_FILE.to_string(),
            config_yaml,
        )])),
        ..Default::default()
    }
}
