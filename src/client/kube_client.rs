use async_trait::async_trait;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};

use crate::client::{ClusterClient, ClusterResource};
use crate::controller::error::{Error, Result};
use crate::crd::Lotus;
use crate::resources::FIELD_MANAGER;

/// [`ClusterClient`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: ClusterResource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get<K: ClusterResource>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create<K: ClusterResource>(&self, namespace: &str, obj: &K) -> Result<K> {
        Ok(self
            .api::<K>(namespace)
            .create(&Self::post_params(), obj)
            .await?)
    }

    async fn replace<K: ClusterResource>(
        &self,
        namespace: &str,
        name: &str,
        obj: &K,
    ) -> Result<K> {
        Ok(self
            .api::<K>(namespace)
            .replace(name, &Self::post_params(), obj)
            .await?)
    }

    async fn delete<K: ClusterResource>(&self, namespace: &str, name: &str) -> Result<()> {
        // Background propagation lets the garbage collector remove a
        // deployment's replica sets and pods
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn update_lotus_status(&self, lotus: &Lotus) -> Result<Lotus> {
        let namespace = lotus
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let name = lotus.name_any();

        // The resourceVersion turns the merge patch into a conditional write
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": lotus.resource_version() },
            "status": lotus.status,
        });

        Ok(self
            .api::<Lotus>(&namespace)
            .patch_status(
                &name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?)
    }
}
