//! Common utilities for Kubernetes resource generation
//!
//! Names, labels and owner references shared by every generator. Names are
//! pure functions of the Lotus (or release) name and the resource's role.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::Lotus;

/// Operator field manager name
pub const FIELD_MANAGER: &str = "lotus-operator";

pub const PROMETHEUS_IMAGE: &str = "quay.io/prometheus/prometheus:v2.3.2";
pub const THANOS_IMAGE: &str = "improbable/thanos:v0.2.0";
pub const DEFAULT_LOTUS_IMAGE: &str = concat!("lotusload/lotus:v", env!("CARGO_PKG_VERSION"));

/// Label selecting every pod that serves Thanos store APIs for a release
pub const THANOS_PEER_LABEL: &str = "lotus-thanos-peer";

/// Run-once stages of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobRole {
    Preparer,
    Monitor,
    Cleaner,
}

impl JobRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRole::Preparer => "preparer",
            JobRole::Monitor => "monitor",
            JobRole::Cleaner => "cleaner",
        }
    }
}

impl std::fmt::Display for JobRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn job_name(lotus_name: &str, role: JobRole) -> String {
    format!("{}-{}", lotus_name, role)
}

pub fn worker_name(lotus_name: &str) -> String {
    format!("{}-worker", lotus_name)
}

pub fn prometheus_name(lotus_name: &str) -> String {
    format!("{}-prometheus", lotus_name)
}

pub fn thanos_store_name(release: &str) -> String {
    format!("{}-thanos-store", release)
}

pub fn thanos_query_name(release: &str) -> String {
    format!("{}-thanos-query", release)
}

pub fn thanos_peer_name(release: &str) -> String {
    format!("{}-thanos-peers", release)
}

pub fn store_config_secret_name(release: &str) -> String {
    format!("{}-time-series-store-config", release)
}

/// Controller owner reference pointing at the Lotus
///
/// Derived objects are garbage collected when the Lotus is deleted.
pub fn owner_reference(lotus: &Lotus) -> OwnerReference {
    OwnerReference {
        api_version: Lotus::api_version(&()).to_string(),
        kind: Lotus::kind(&()).to_string(),
        name: lotus.name_any(),
        uid: lotus.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Controller owner reference pointing at the controller's own Deployment
pub fn deployment_owner_reference(deployment: &Deployment) -> OwnerReference {
    OwnerReference {
        api_version: Deployment::api_version(&()).to_string(),
        kind: Deployment::kind(&()).to_string(),
        name: deployment.name_any(),
        uid: deployment.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Labels put on every object the operator creates
pub fn standard_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "app.kubernetes.io/managed-by".to_string(),
        FIELD_MANAGER.to_string(),
    )])
}

/// Labels of a role-specific pod selector plus the standard labels
pub fn with_standard_labels(selector: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = standard_labels();
    labels.extend(selector.iter().map(|(k, v)| (k.clone(), v.clone())));
    labels
}

pub fn job_labels(lotus_name: &str, role: JobRole) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "lotus-job".to_string()),
        ("lotus".to_string(), lotus_name.to_string()),
        ("job-type".to_string(), role.to_string()),
    ])
}

pub fn worker_labels(lotus_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "lotus-worker".to_string()),
        ("lotus".to_string(), lotus_name.to_string()),
    ])
}

pub fn prometheus_service_labels(lotus_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "lotus-prometheus".to_string()),
        ("lotus".to_string(), lotus_name.to_string()),
    ])
}

pub fn prometheus_pod_labels(lotus_name: &str, release: &str) -> BTreeMap<String, String> {
    let mut labels = prometheus_service_labels(lotus_name);
    labels.insert(THANOS_PEER_LABEL.to_string(), release.to_string());
    labels
}
