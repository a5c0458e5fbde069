//! Idempotent operations over the Kubernetes API
//!
//! [`ClusterClient`] exposes the raw typed primitives; [`ensure`], [`apply`]
//! and [`delete_if_exists`] build the convergence protocol on top of them:
//!
//! - `ensure` creates an object only if it does not exist yet and never
//!   touches an existing one (the factory is not even invoked)
//! - `apply` creates or replaces the object with a freshly computed spec
//! - `delete_if_exists` treats an already absent object as success

mod kube_client;

pub use kube_client::KubeClusterClient;

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::crd::Lotus;

/// Any namespaced object the controller reads or writes
pub trait ClusterResource:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> ClusterResource for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Typed access to the orchestration API
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch an object, `None` if it does not exist
    async fn get<K: ClusterResource>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn create<K: ClusterResource>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Replace an existing object; the object carries the resourceVersion it replaces
    async fn replace<K: ClusterResource>(&self, namespace: &str, name: &str, obj: &K)
    -> Result<K>;

    /// Delete an object, failing with a not-found error if it is absent
    async fn delete<K: ClusterResource>(&self, namespace: &str, name: &str) -> Result<()>;

    /// Write `lotus.status`, guarded by `lotus.metadata.resourceVersion`
    async fn update_lotus_status(&self, lotus: &Lotus) -> Result<Lotus>;
}

/// Objects converged with [`apply`]
///
/// `carry_over` copies fields the API server owns from the live object into
/// the desired one before it replaces the live object.
pub trait Applicable: ClusterResource {
    fn carry_over(&mut self, _existing: &Self) {}
}

impl Applicable for Deployment {}
impl Applicable for StatefulSet {}
impl Applicable for Secret {}
impl Applicable for ConfigMap {}

impl Applicable for Service {
    fn carry_over(&mut self, existing: &Self) {
        // clusterIP is immutable once allocated
        if let (Some(desired), Some(live)) = (self.spec.as_mut(), existing.spec.as_ref()) {
            if desired.cluster_ip.is_none() {
                desired.cluster_ip = live.cluster_ip.clone();
            }
            if desired.cluster_ips.is_none() {
                desired.cluster_ips = live.cluster_ips.clone();
            }
        }
    }
}

/// Return the named object, creating it from `factory` if it does not exist
pub async fn ensure<C, K, F>(client: &C, namespace: &str, name: &str, factory: F) -> Result<K>
where
    C: ClusterClient,
    K: ClusterResource,
    F: FnOnce() -> Result<K> + Send,
{
    if let Some(existing) = client.get::<K>(namespace, name).await? {
        return Ok(existing);
    }

    let desired = factory()?;
    debug!(kind = %K::kind(&()), %namespace, %name, "Creating");
    match client.create(namespace, &desired).await {
        Ok(created) => Ok(created),
        // Created concurrently between our get and create
        Err(e) if e.is_conflict() => client
            .get::<K>(namespace, name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{}/{}", namespace, name))),
        Err(e) => Err(e),
    }
}

/// Create the object, or replace the live one with `desired`
pub async fn apply<C, K>(client: &C, namespace: &str, name: &str, mut desired: K) -> Result<K>
where
    C: ClusterClient,
    K: Applicable,
{
    match client.get::<K>(namespace, name).await? {
        None => {
            debug!(kind = %K::kind(&()), %namespace, %name, "Creating");
            client.create(namespace, &desired).await
        }
        Some(existing) => {
            debug!(kind = %K::kind(&()), %namespace, %name, "Updating");
            desired.meta_mut().resource_version = existing.resource_version();
            desired.carry_over(&existing);
            client.replace(namespace, name, &desired).await
        }
    }
}

/// Delete the named object; an absent object counts as deleted
pub async fn delete_if_exists<C, K>(client: &C, namespace: &str, name: &str) -> Result<()>
where
    C: ClusterClient,
    K: ClusterResource,
{
    match client.delete::<K>(namespace, name).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!(kind = %K::kind(&()), %namespace, %name, "Already deleted");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Read access to a local cache of objects
pub trait Lister<K>: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>>;

    fn list(&self) -> Vec<Arc<K>>;
}

impl<K> Lister<K> for Store<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        Store::get(self, &ObjectRef::new(name).within(namespace))
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.state()
    }
}
