//! Release-wide Thanos components
//!
//! Every per-test Prometheus runs a Thanos sidecar labelled as a peer of the
//! release. A headless Service gathers those peers (and the optional store
//! gateway) so a single query Deployment can fan out to all of them.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, PodSpec, PodTemplateSpec,
    SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;

use crate::config::{Config, SecretFile};
use crate::resources::common::{
    THANOS_IMAGE, THANOS_PEER_LABEL, store_config_secret_name, thanos_peer_name,
    thanos_query_name, thanos_store_name, standard_labels,
};

pub const THANOS_HTTP_PORT: i32 = 10902;
pub const THANOS_GRPC_PORT: i32 = 10901;
pub const QUERY_SERVICE_PORT: i32 = 9090;

const STORE_CONFIG_VOLUME: &str = "time-series-store-config";
const STORE_CONFIG_DIR: &str = "/creds/objstore/";
pub const STORE_CONFIG_FILE: &str = "store-config.yaml";
const GCS_CREDENTIALS_VOLUME: &str = "gcs-credentials";
const GCS_CREDENTIALS_DIR: &str = "/creds/gcs/";
const STORE_DATA_DIR: &str = "/var/thanos/store";

/// Named http and grpc ports shared by every Thanos container
pub fn thanos_ports() -> Vec<ContainerPort> {
    vec![
        ContainerPort {
            name: Some("http".to_string()),
            container_port: THANOS_HTTP_PORT,
            ..Default::default()
        },
        ContainerPort {
            name: Some("grpc".to_string()),
            container_port: THANOS_GRPC_PORT,
            ..Default::default()
        },
    ]
}

fn push_arg(container: &mut Container, arg: String) {
    container.args.get_or_insert_with(Vec::new).push(arg);
}

fn push_mount(container: &mut Container, name: &str, path: &str) {
    container
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: name.to_string(),
            mount_path: path.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
}

fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Point a Thanos container at the release's object store config
pub fn set_time_series_store_config(
    container: &mut Container,
    volumes: &mut Vec<Volume>,
    release: &str,
) {
    push_arg(
        container,
        format!("--objstore.config-file={}{}", STORE_CONFIG_DIR, STORE_CONFIG_FILE),
    );
    push_mount(container, STORE_CONFIG_VOLUME, STORE_CONFIG_DIR);
    volumes.push(secret_volume(
        STORE_CONFIG_VOLUME,
        &store_config_secret_name(release),
    ));
}

/// Mount GCS service account credentials and export them to the container
pub fn set_gcs_credentials(
    container: &mut Container,
    volumes: &mut Vec<Volume>,
    credentials: &SecretFile,
) {
    push_mount(container, GCS_CREDENTIALS_VOLUME, GCS_CREDENTIALS_DIR);
    container.env.get_or_insert_with(Vec::new).push(EnvVar {
        name: "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
        value: Some(format!("{}{}", GCS_CREDENTIALS_DIR, credentials.file)),
        ..Default::default()
    });
    volumes.push(secret_volume(GCS_CREDENTIALS_VOLUME, &credentials.secret));
}

fn meta(name: String, namespace: &str, owner: &OwnerReference) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels: Some(standard_labels()),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

/// Headless Service resolving to every store API peer of the release
pub fn generate_peers_service(release: &str, namespace: &str, owner: &OwnerReference) -> Service {
    Service {
        metadata: meta(thanos_peer_name(release), namespace, owner),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(BTreeMap::from([(
                THANOS_PEER_LABEL.to_string(),
                release.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some("grpc".to_string()),
                port: THANOS_GRPC_PORT,
                target_port: Some(IntOrString::String("grpc".to_string())),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Store gateway serving blocks uploaded to long-term storage
pub fn generate_store_stateful_set(
    release: &str,
    namespace: &str,
    owner: &OwnerReference,
    config: &Config,
) -> StatefulSet {
    let name = thanos_store_name(release);
    let labels = BTreeMap::from([
        ("app".to_string(), name.clone()),
        (THANOS_PEER_LABEL.to_string(), release.to_string()),
    ]);

    let mut volumes = vec![Volume {
        name: "data".to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }];
    let mut container = Container {
        name: "thanos-store".to_string(),
        image: Some(THANOS_IMAGE.to_string()),
        args: Some(vec![
            "store".to_string(),
            format!("--data-dir={}", STORE_DATA_DIR),
            "--cluster.disable".to_string(),
        ]),
        ports: Some(thanos_ports()),
        volume_mounts: Some(vec![VolumeMount {
            name: "data".to_string(),
            mount_path: STORE_DATA_DIR.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };
    set_time_series_store_config(&mut container, &mut volumes, release);
    if let Some(credentials) = config
        .time_series_storage
        .as_ref()
        .and_then(|s| s.credentials())
    {
        set_gcs_credentials(&mut container, &mut volumes, credentials);
    }

    StatefulSet {
        metadata: meta(name, namespace, owner),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Query frontend fanning out to every peer
pub fn generate_query_deployment(
    release: &str,
    namespace: &str,
    owner: &OwnerReference,
) -> Deployment {
    let name = thanos_query_name(release);
    let labels = BTreeMap::from([("app".to_string(), name.clone())]);

    let container = Container {
        name: "thanos-query".to_string(),
        image: Some(THANOS_IMAGE.to_string()),
        args: Some(vec![
            "query".to_string(),
            "--query.replica-label=replica".to_string(),
            "--cluster.disable".to_string(),
            format!(
                "--store=dns+{}.{}.svc.cluster.local:{}",
                thanos_peer_name(release),
                namespace,
                THANOS_GRPC_PORT
            ),
        ]),
        ports: Some(thanos_ports()),
        ..Default::default()
    };

    Deployment {
        metadata: meta(name, namespace, owner),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub fn generate_query_service(release: &str, namespace: &str, owner: &OwnerReference) -> Service {
    let name = thanos_query_name(release);
    Service {
        metadata: meta(name.clone(), namespace, owner),
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([("app".to_string(), name)])),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: QUERY_SERVICE_PORT,
                target_port: Some(IntOrString::String("http".to_string())),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}
