//! Validation of Lotus declarations
//!
//! Accepting a Lotus never depends on its contents. Each stage is checked
//! right before the controller converges objects for it: the preparer and the
//! run (worker, checks, monitor overrides) while `Preparing`, the cleaner
//! while cleaning. A declaration that fails there takes the failure branch.

use std::collections::HashSet;
use std::time::Duration;

use kube::ResourceExt;

use crate::controller::error::{Error, Result};
use crate::crd::{Lotus, LotusCheck, StageSpec};

pub const MIN_PORT: i32 = 1;
pub const MAX_PORT: i32 = 65535;

/// Validate the whole declaration
pub fn validate_lotus(lotus: &Lotus) -> Result<()> {
    validate_preparer(lotus)?;
    validate_run(lotus)?;
    validate_cleaner(lotus)
}

pub fn validate_preparer(lotus: &Lotus) -> Result<()> {
    match &lotus.spec.preparer {
        Some(preparer) => validate_stage(&lotus.name_any(), "preparer", preparer),
        None => Ok(()),
    }
}

/// Everything the `Running` path needs: the worker, the checks and the
/// monitor overrides
pub fn validate_run(lotus: &Lotus) -> Result<()> {
    validate_worker(lotus)?;
    validate_checks(&lotus.spec.checks)?;
    validate_positive("checkIntervalSeconds", lotus.spec.check_interval_seconds)?;
    validate_positive(
        "checkInitialDelaySeconds",
        lotus.spec.check_initial_delay_seconds,
    )
}

pub fn validate_cleaner(lotus: &Lotus) -> Result<()> {
    match &lotus.spec.cleaner {
        Some(cleaner) => validate_stage(&lotus.name_any(), "cleaner", cleaner),
        None => Ok(()),
    }
}

fn validate_worker(lotus: &Lotus) -> Result<()> {
    let worker = lotus
        .spec
        .worker
        .as_ref()
        .ok_or_else(|| Error::ValidationError("a worker must be declared".to_string()))?;

    if worker.containers.is_empty() {
        return Err(Error::ValidationError(
            "worker needs at least one container".to_string(),
        ));
    }

    match worker.metrics_port {
        Some(port) if (MIN_PORT..=MAX_PORT).contains(&port) => {}
        Some(port) => {
            return Err(Error::ValidationError(format!(
                "worker metricsPort {} is outside {}..={}",
                port, MIN_PORT, MAX_PORT
            )));
        }
        None => {
            return Err(Error::ValidationError(
                "worker metricsPort is required".to_string(),
            ));
        }
    }

    if worker.replicas() < 0 {
        return Err(Error::ValidationError(format!(
            "worker replicas {} must not be negative",
            worker.replicas()
        )));
    }

    parse_duration("worker runTime", &worker.run_time)?;
    Ok(())
}

fn validate_stage(lotus_name: &str, role: &str, stage: &StageSpec) -> Result<()> {
    if stage.containers.is_empty() {
        return Err(Error::ValidationError(format!(
            "{} of {} needs at least one container",
            role, lotus_name
        )));
    }
    Ok(())
}

fn validate_checks(checks: &[LotusCheck]) -> Result<()> {
    let mut seen = HashSet::new();
    for check in checks {
        if check.name.is_empty() {
            return Err(Error::ValidationError(
                "check name must not be empty".to_string(),
            ));
        }
        if !seen.insert(check.name.as_str()) {
            return Err(Error::ValidationError(format!(
                "duplicate check name: {}",
                check.name
            )));
        }
        if check.expr.is_empty() {
            return Err(Error::ValidationError(format!(
                "check {} has an empty expr",
                check.name
            )));
        }
        parse_duration(&format!("check {} for", check.name), &check.for_)?;
    }
    Ok(())
}

fn validate_positive(field: &str, value: Option<i32>) -> Result<()> {
    match value {
        Some(v) if v <= 0 => Err(Error::ValidationError(format!(
            "{} must be positive, got {}",
            field, v
        ))),
        _ => Ok(()),
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| Error::ValidationError(format!("{} {:?}: {}", field, value, e)))
}
