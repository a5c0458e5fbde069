use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::controller::error::{Error, Result};
use crate::crd::{Lotus, WorkerSpec};
use crate::resources::common::{owner_reference, with_standard_labels, worker_labels, worker_name};

fn worker_spec(lotus: &Lotus) -> Result<&WorkerSpec> {
    lotus
        .spec
        .worker
        .as_ref()
        .ok_or_else(|| Error::ValidationError(format!("{} declares no worker", lotus.name_any())))
}

/// Generate the worker Deployment running the user's load generator
pub fn generate_worker_deployment(lotus: &Lotus) -> Result<Deployment> {
    let worker = worker_spec(lotus)?;
    let lotus_name = lotus.name_any();
    let labels = worker_labels(&lotus_name);

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(worker_name(&lotus_name)),
            namespace: lotus.namespace(),
            labels: Some(with_standard_labels(&labels)),
            owner_references: Some(vec![owner_reference(lotus)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(worker.replicas()),
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
                    restart_policy: Some("Always".to_string()),
                    containers: worker.containers.clone(),
                    volumes: (!worker.volumes.is_empty()).then(|| worker.volumes.clone()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

/// Generate the Service the test's Prometheus scrapes the workers through
pub fn generate_worker_service(lotus: &Lotus) -> Result<Service> {
    let worker = worker_spec(lotus)?;
    let metrics_port = worker.metrics_port.ok_or_else(|| {
        Error::ValidationError(format!("{} declares no worker metricsPort", lotus.name_any()))
    })?;
    let lotus_name = lotus.name_any();
    let labels = worker_labels(&lotus_name);

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(worker_name(&lotus_name)),
            namespace: lotus.namespace(),
            labels: Some(with_standard_labels(&labels)),
            owner_references: Some(vec![owner_reference(lotus)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("metrics".to_string()),
                port: metrics_port,
                target_port: Some(IntOrString::Int(metrics_port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    })
}
