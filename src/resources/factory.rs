//! Derived objects of a single test
//!
//! [`ResourceFactory`] binds a Lotus to the controller settings and computes
//! every object the test needs. Each method is pure apart from reading the
//! static config file, so the same declaration always yields the same specs.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use kube::ResourceExt;

use crate::config::Config;
use crate::controller::context::ControllerSettings;
use crate::controller::error::{Error, Result};
use crate::crd::{Lotus, StageSpec};
use crate::resources::common::{JobRole, job_name, prometheus_name, worker_name};
use crate::resources::job::{generate_job, generate_monitor_config_map, generate_monitor_job};
use crate::resources::prometheus::{
    LOCAL_PROMETHEUS_DATA_SOURCE, generate_prometheus_config_map, generate_prometheus_pod,
    generate_prometheus_service, local_data_source,
};
use crate::resources::worker::{generate_worker_deployment, generate_worker_service};

pub struct ResourceFactory<'a> {
    lotus: &'a Lotus,
    settings: &'a ControllerSettings,
}

impl<'a> ResourceFactory<'a> {
    pub fn new(lotus: &'a Lotus, settings: &'a ControllerSettings) -> Self {
        Self { lotus, settings }
    }

    pub fn namespace(&self) -> String {
        self.lotus.namespace().unwrap_or_default()
    }

    pub fn job_name(&self, role: JobRole) -> String {
        job_name(&self.lotus.name_any(), role)
    }

    pub fn worker_name(&self) -> String {
        worker_name(&self.lotus.name_any())
    }

    pub fn prometheus_name(&self) -> String {
        prometheus_name(&self.lotus.name_any())
    }

    fn stage_job(&self, role: JobRole, stage: Option<&StageSpec>) -> Result<Job> {
        let stage = stage.ok_or_else(|| {
            Error::ValidationError(format!("{} declares no {}", self.lotus.name_any(), role))
        })?;
        Ok(generate_job(
            self.lotus,
            role,
            stage.containers.clone(),
            stage.volumes.clone(),
        ))
    }

    pub fn preparer_job(&self) -> Result<Job> {
        self.stage_job(JobRole::Preparer, self.lotus.spec.preparer.as_ref())
    }

    pub fn cleaner_job(&self) -> Result<Job> {
        self.stage_job(JobRole::Cleaner, self.lotus.spec.cleaner.as_ref())
    }

    pub fn monitor_job(&self) -> Result<Job> {
        let config = self.lotus_config()?;
        Ok(generate_monitor_job(
            self.lotus,
            &config,
            &self.settings.lotus_image,
        ))
    }

    /// Config the monitor runs with
    ///
    /// The static config plus the test's own Prometheus as a data source and
    /// the declared checks. Checks that name no data source query the test's
    /// Prometheus.
    pub fn lotus_config(&self) -> Result<Config> {
        let mut config = Config::from_file(&self.settings.config_file)?;
        config.data_sources.push(local_data_source(self.lotus));
        config.add_checks(&self.lotus.spec.checks);
        for check in &mut config.checks {
            if check.data_source().is_none() {
                check.data_source = Some(LOCAL_PROMETHEUS_DATA_SOURCE.to_string());
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn monitor_config_map(&self) -> Result<ConfigMap> {
        let yaml = self.lotus_config()?.to_yaml()?;
        Ok(generate_monitor_config_map(self.lotus, yaml))
    }

    pub fn worker_deployment(&self) -> Result<Deployment> {
        generate_worker_deployment(self.lotus)
    }

    pub fn worker_service(&self) -> Result<Service> {
        generate_worker_service(self.lotus)
    }

    pub fn prometheus_config_map(&self) -> Result<ConfigMap> {
        let config = Config::from_file(&self.settings.config_file)?;
        generate_prometheus_config_map(self.lotus, &config.checks)
    }

    pub fn prometheus_pod(&self) -> Result<Pod> {
        let config = Config::from_file(&self.settings.config_file)?;
        Ok(generate_prometheus_pod(
            self.lotus,
            &config,
            &self.settings.release,
            self.settings.prometheus_service_account.as_deref(),
        ))
    }

    pub fn prometheus_service(&self) -> Service {
        generate_prometheus_service(self.lotus)
    }
}
