//! Reconciliation logic for Lotus resources
//!
//! `sync` is level triggered: it reads the cached Lotus, looks at its phase
//! and the state of the derived objects, and performs at most one phase
//! write. Every step is idempotent, so the same key can be synced any
//! number of times and a write that loses a race is simply retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{ClusterClient, delete_if_exists, ensure};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::events::split_meta_namespace_key;
use crate::controller::state_machine::{JobOutcome, LotusEvent};
use crate::controller::status::StatusManager;
use crate::controller::validation::{validate_cleaner, validate_preparer, validate_run};
use crate::controller::work_queue::WorkQueue;
use crate::crd::{Lotus, LotusPhase};
use crate::resources::{JobRole, ResourceFactory};

const KNOWN_PHASES: [LotusPhase; 8] = [
    LotusPhase::Init,
    LotusPhase::Pending,
    LotusPhase::Preparing,
    LotusPhase::Running,
    LotusPhase::Cleaning,
    LotusPhase::FailureCleaning,
    LotusPhase::Succeeded,
    LotusPhase::Failed,
];

/// Bring the Lotus named by `key` one step closer to completion
#[instrument(skip(ctx))]
pub async fn sync<C: ClusterClient>(ctx: &Context<C>, key: &str) -> Result<()> {
    let object_key = split_meta_namespace_key(key)?;
    let Some(lotus) = ctx.lotuses.get(&object_key.namespace, &object_key.name) else {
        debug!("Lotus no longer exists");
        return Ok(());
    };

    let phase = lotus.phase();
    if phase.is_terminal() {
        debug!(%phase, "Lotus already finished");
        return Ok(());
    }
    if phase == LotusPhase::Unknown {
        warn!("Lotus has a phase this controller does not know, ignoring");
        return Ok(());
    }

    let reconciler = LotusReconciler::new(&lotus, ctx);
    match phase {
        LotusPhase::Init => reconciler.write(LotusEvent::Accepted).await,
        LotusPhase::Pending => reconciler.write(LotusEvent::PreparationStarted).await,
        LotusPhase::Preparing => reconciler.reconcile_preparing().await,
        LotusPhase::Running => reconciler.reconcile_running().await,
        LotusPhase::Cleaning | LotusPhase::FailureCleaning => {
            reconciler.reconcile_cleaning().await
        }
        LotusPhase::Succeeded | LotusPhase::Failed | LotusPhase::Unknown => Ok(()),
    }
}

struct LotusReconciler<'a, C> {
    lotus: &'a Lotus,
    ctx: &'a Context<C>,
    factory: ResourceFactory<'a>,
    ns: String,
}

impl<'a, C: ClusterClient> LotusReconciler<'a, C> {
    fn new(lotus: &'a Lotus, ctx: &'a Context<C>) -> Self {
        let factory = ResourceFactory::new(lotus, &ctx.settings);
        let ns = factory.namespace();
        Self {
            lotus,
            ctx,
            factory,
            ns,
        }
    }

    async fn write(&self, event: LotusEvent) -> Result<()> {
        StatusManager::new(self.lotus, self.ctx)
            .apply_event(event)
            .await
            .map(|_| ())
    }

    /// Move a declaration that cannot run onto the failure branch
    async fn reject(&self, event: LotusEvent, err: Error) -> Result<()> {
        warn!(error = %err, "Rejecting declaration");
        self.write(event).await
    }

    async fn reconcile_preparing(&self) -> Result<()> {
        // Nothing is created for a declaration that could never reach Running
        if let Err(e) = validate_preparer(self.lotus).and_then(|_| validate_run(self.lotus)) {
            return self.reject(LotusEvent::DeclarationRejected, e).await;
        }

        if self.lotus.spec.preparer.is_none() {
            return self.start_running(LotusEvent::PreparerSkipped).await;
        }

        let name = self.factory.job_name(JobRole::Preparer);
        let job = ensure(&self.ctx.client, &self.ns, &name, || {
            self.factory.preparer_job()
        })
        .await?;

        match job_outcome(&job) {
            JobOutcome::Active => {
                debug!(job = %name, "Preparer still running");
                Ok(())
            }
            JobOutcome::Succeeded => self.start_running(LotusEvent::PreparerSucceeded).await,
            JobOutcome::Failed => {
                warn!(job = %name, "Preparer failed");
                self.write(LotusEvent::PreparerFailed).await
            }
        }
    }

    /// Create the per-test Prometheus, the workers and the monitor config,
    /// then move to `Running`
    async fn start_running(&self, event: LotusEvent) -> Result<()> {
        let ctx = self.ctx;
        let ns = self.ns.as_str();
        let factory = &self.factory;

        let prometheus = factory.prometheus_name();
        ensure::<_, ConfigMap, _>(&ctx.client, ns, &prometheus, || {
            factory.prometheus_config_map()
        })
        .await?;
        ensure::<_, Pod, _>(&ctx.client, ns, &prometheus, || factory.prometheus_pod()).await?;
        ensure::<_, Service, _>(&ctx.client, ns, &prometheus, || {
            Ok(factory.prometheus_service())
        })
        .await?;

        let worker = factory.worker_name();
        ensure::<_, Service, _>(&ctx.client, ns, &worker, || factory.worker_service()).await?;
        ensure::<_, Deployment, _>(&ctx.client, ns, &worker, || {
            factory.worker_deployment()
        })
        .await?;

        let monitor = factory.job_name(JobRole::Monitor);
        ensure::<_, ConfigMap, _>(&ctx.client, ns, &monitor, || {
            factory.monitor_config_map()
        })
        .await?;

        self.write(event).await
    }

    async fn reconcile_running(&self) -> Result<()> {
        let name = self.factory.job_name(JobRole::Monitor);
        let job = ensure(&self.ctx.client, &self.ns, &name, || {
            self.factory.monitor_job()
        })
        .await?;

        let outcome = job_outcome(&job);
        if outcome == JobOutcome::Active {
            return Ok(());
        }

        // Stop generating load before cleaning up
        let worker = self.factory.worker_name();
        delete_if_exists::<_, Deployment>(&self.ctx.client, &self.ns, &worker).await?;
        info!(deployment = %worker, "Deleted worker deployment");

        match outcome {
            JobOutcome::Failed => {
                warn!(job = %name, "Monitor reported a failed test");
                self.write(LotusEvent::MonitorFailed).await
            }
            _ => self.write(LotusEvent::MonitorSucceeded).await,
        }
    }

    async fn reconcile_cleaning(&self) -> Result<()> {
        if self.lotus.spec.cleaner.is_none() {
            return self.write(LotusEvent::CleanerSkipped).await;
        }
        if let Err(e) = validate_cleaner(self.lotus) {
            return self.reject(LotusEvent::CleanerFailed, e).await;
        }

        let name = self.factory.job_name(JobRole::Cleaner);
        let job = ensure(&self.ctx.client, &self.ns, &name, || {
            self.factory.cleaner_job()
        })
        .await?;

        match job_outcome(&job) {
            JobOutcome::Active => {
                debug!(job = %name, "Cleaner still running");
                Ok(())
            }
            JobOutcome::Succeeded => self.write(LotusEvent::CleanerSucceeded).await,
            JobOutcome::Failed => {
                warn!(job = %name, "Cleaner failed");
                self.write(LotusEvent::CleanerFailed).await
            }
        }
    }
}

fn job_outcome(job: &Job) -> JobOutcome {
    let status = job.status.as_ref();
    JobOutcome::from_counts(
        status.and_then(|s| s.succeeded).unwrap_or(0),
        status.and_then(|s| s.failed).unwrap_or(0),
    )
}

/// Process keys from `queue` until it is shut down and drained
///
/// A sync still in flight when `token` is cancelled is abandoned; its key is
/// dropped rather than retried. Other failures are requeued with backoff
/// when [`Error::is_retryable`] says so.
pub async fn run_worker<C: ClusterClient>(
    ctx: Arc<Context<C>>,
    queue: Arc<WorkQueue<String>>,
    token: CancellationToken,
) {
    while let Some(key) = queue.get().await {
        let started = Instant::now();
        let result = tokio::select! {
            result = sync(&ctx, &key) => result,
            _ = token.cancelled() => Err(Error::Cancelled),
        };
        handle_result(&ctx, &queue, &key, result, started).await;
        queue.done(&key).await;
    }
    debug!("Worker stopped");
}

async fn handle_result<C: ClusterClient>(
    ctx: &Context<C>,
    queue: &Arc<WorkQueue<String>>,
    key: &str,
    result: Result<()>,
    started: Instant,
) {
    let (ns, name) = key.split_once('/').unwrap_or(("", key));
    let key = key.to_string();

    match result {
        Ok(()) => {
            queue.forget(&key).await;
            if let Some(health) = &ctx.health {
                health
                    .metrics
                    .record_reconcile(ns, name, started.elapsed().as_secs_f64());
                health.touch();
            }
        }
        Err(Error::Cancelled) => {
            debug!(%key, "Sync cancelled, dropping key");
        }
        Err(e) if !e.is_retryable() => {
            error!(%key, error = %e, "Sync failed on a malformed key, dropping it");
            if let Some(health) = &ctx.health {
                health.metrics.record_error(ns, name);
            }
            queue.forget(&key).await;
        }
        Err(e) => {
            let retries = queue.num_requeues(&key).await;
            error!(%key, retries, error = %e, "Sync failed, requeuing");
            if let Some(health) = &ctx.health {
                health.metrics.record_error(ns, name);
            }
            queue.add_rate_limited(key).await;
        }
    }

    if let Some(health) = &ctx.health {
        health.metrics.set_queue_depth(queue.len().await);
        update_phase_metrics(ctx);
    }
}

fn update_phase_metrics<C>(ctx: &Context<C>) {
    let Some(health) = &ctx.health else {
        return;
    };
    let mut counts: HashMap<LotusPhase, i64> = HashMap::new();
    for lotus in ctx.lotuses.list() {
        *counts.entry(lotus.phase()).or_default() += 1;
    }
    for phase in KNOWN_PHASES {
        health
            .metrics
            .set_tests_by_phase(&phase.to_string(), counts.get(&phase).copied().unwrap_or(0));
    }
}
