pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use client::{ClusterClient, KubeClusterClient, Lister};
pub use config::{Config, ConfigError};
pub use controller::{BackoffConfig, Context, ControllerSettings, Error, Result, WorkQueue};
pub use crd::{Lotus, LotusPhase, LotusSpec, LotusStatus};
pub use health::{HealthState, Metrics};

use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::reflector::{self, Store, store::Writer};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use controller::events::{ChangeEvent, ChangeTracker, ObjectKey, lotus_event_key, owner_event_key};
use resources::ensure_static_resources;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Feed the watch stream of `api` into `writer` and enqueue the keys
/// `key_for` derives from each change
async fn watch_changes<K, F>(
    api: Api<K>,
    mut writer: Writer<K>,
    queue: Arc<WorkQueue<String>>,
    token: CancellationToken,
    mut key_for: F,
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    F: FnMut(&ChangeEvent<K>) -> Option<ObjectKey> + Send + 'static,
{
    let mut tracker = ChangeTracker::new();
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);

    loop {
        let event = tokio::select! {
            event = stream.next() => event,
            _ = token.cancelled() => break,
        };
        match event {
            Some(Ok(event)) => {
                // Keys go out only after the store holds the event
                for change in tracker.apply(&event, &mut writer) {
                    if let Some(key) = key_for(&change) {
                        queue.add(key.to_string()).await;
                    }
                }
            }
            Some(Err(e)) => {
                tracing::warn!(kind = %K::kind(&()), error = %e, "Watch failed, retrying");
            }
            None => break,
        }
    }
    tracing::debug!(kind = %K::kind(&()), "Watch stopped");
}

/// Run the Lotus controller until `token` is cancelled
///
/// Watches Lotus resources and the Jobs derived from them, waits for both
/// caches to sync, makes sure the release-wide resources exist, then serves
/// reconciliations with `settings.workers` workers. Failing to sync the
/// caches or to create the static resources is fatal.
pub async fn run_controller(
    client: Client,
    settings: ControllerSettings,
    health: Option<Arc<HealthState>>,
    token: CancellationToken,
) -> Result<()> {
    let watch_namespace = settings
        .watch_namespace
        .clone()
        .unwrap_or_else(|| settings.namespace.clone());
    tracing::info!(
        namespace = %watch_namespace,
        release = %settings.release,
        workers = settings.workers,
        "Starting controller for Lotus resources"
    );

    let queue = Arc::new(WorkQueue::<String>::default());
    let (lotuses, lotus_writer) = reflector::store::<Lotus>();
    let (jobs, job_writer) = reflector::store::<Job>();

    let lotus_watch = tokio::spawn(watch_changes(
        scoped_api::<Lotus>(client.clone(), Some(&watch_namespace)),
        lotus_writer,
        queue.clone(),
        token.clone(),
        lotus_event_key,
    ));

    let owners = lotuses.clone();
    let job_watch = tokio::spawn(watch_changes(
        scoped_api::<Job>(client.clone(), Some(&watch_namespace)),
        job_writer,
        queue.clone(),
        token.clone(),
        move |change: &ChangeEvent<Job>| {
            let key = owner_event_key(change, &owners);
            if key.is_none() {
                tracing::trace!(job = %change.object().name_any(), "Job has no known Lotus owner");
            }
            key
        },
    ));

    tokio::select! {
        ready = wait_for_caches(&lotuses, &jobs) => ready?,
        _ = token.cancelled() => return Ok(()),
    }
    tracing::info!("Caches synced");

    let ctx = Arc::new(Context::new(
        KubeClusterClient::new(client),
        Arc::new(lotuses) as Arc<dyn Lister<Lotus>>,
        settings,
        health,
    ));

    ensure_static_resources(&ctx.client, &ctx.settings).await?;

    if let Some(health) = &ctx.health {
        health.set_ready(true).await;
    }

    let workers: Vec<_> = (0..ctx.settings.workers.max(1))
        .map(|_| {
            tokio::spawn(controller::run_worker(
                ctx.clone(),
                queue.clone(),
                token.clone(),
            ))
        })
        .collect();

    token.cancelled().await;
    tracing::info!("Shutting down controller");

    if let Some(health) = &ctx.health {
        health.set_ready(false).await;
    }
    queue.shut_down_with_drain().await;
    for result in futures::future::join_all(workers).await {
        if let Err(e) = result {
            tracing::error!("Worker task panicked: {}", e);
        }
    }
    let (lotus_result, job_result) = tokio::join!(lotus_watch, job_watch);
    for (kind, result) in [("Lotus", lotus_result), ("Job", job_result)] {
        if let Err(e) = result {
            tracing::error!(kind, "Watch task panicked: {}", e);
        }
    }

    tracing::info!("Controller stopped");
    Ok(())
}

async fn wait_for_caches(lotuses: &Store<Lotus>, jobs: &Store<Job>) -> Result<()> {
    lotuses
        .wait_until_ready()
        .await
        .map_err(|_| Error::CacheNotReady("Lotus".to_string()))?;
    jobs.wait_until_ready()
        .await
        .map_err(|_| Error::CacheNotReady("Job".to_string()))?;
    Ok(())
}
