//! Release-wide objects shared by every test
//!
//! Created once at startup and owned by the controller's own Deployment, so
//! they go away with the release rather than with any single test.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::info;

use crate::client::{ClusterClient, apply};
use crate::config::{Config, TimeSeriesStorage};
use crate::controller::context::ControllerSettings;
use crate::controller::error::{Error, Result};
use crate::resources::common::{
    deployment_owner_reference, store_config_secret_name, thanos_peer_name, thanos_query_name,
    thanos_store_name,
};
use crate::resources::secret::generate_store_config_secret;
use crate::resources::thanos::{
    generate_peers_service, generate_query_deployment, generate_query_service,
    generate_store_stateful_set,
};

pub struct StaticResourceFactory {
    release: String,
    namespace: String,
    owner: OwnerReference,
    config: Config,
}

impl StaticResourceFactory {
    pub fn new(release: &str, namespace: &str, owner: OwnerReference, config: Config) -> Self {
        Self {
            release: release.to_string(),
            namespace: namespace.to_string(),
            owner,
            config,
        }
    }

    pub fn time_series_storage(&self) -> Option<&TimeSeriesStorage> {
        self.config.time_series_storage.as_ref()
    }

    pub fn peers_service(&self) -> Service {
        generate_peers_service(&self.release, &self.namespace, &self.owner)
    }

    pub fn store_config_secret(&self) -> Result<Option<Secret>> {
        self.time_series_storage()
            .map(|storage| {
                generate_store_config_secret(&self.release, &self.namespace, &self.owner, storage)
            })
            .transpose()
    }

    pub fn store_stateful_set(&self) -> Option<StatefulSet> {
        self.time_series_storage().map(|_| {
            generate_store_stateful_set(&self.release, &self.namespace, &self.owner, &self.config)
        })
    }

    pub fn query_deployment(&self) -> Deployment {
        generate_query_deployment(&self.release, &self.namespace, &self.owner)
    }

    pub fn query_service(&self) -> Service {
        generate_query_service(&self.release, &self.namespace, &self.owner)
    }
}

/// Create or update the release-wide objects
///
/// Fails when the controller's own Deployment cannot be found, since it owns
/// everything created here.
pub async fn ensure_static_resources<C: ClusterClient>(
    client: &C,
    settings: &ControllerSettings,
) -> Result<()> {
    let ns = settings.namespace.as_str();
    let release = settings.release.as_str();

    let controller = client
        .get::<Deployment>(ns, &settings.controller_deployment)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "controller deployment {}/{}",
                ns, settings.controller_deployment
            ))
        })?;

    let config = Config::from_file(&settings.config_file)?;
    let factory =
        StaticResourceFactory::new(release, ns, deployment_owner_reference(&controller), config);

    apply(client, ns, &thanos_peer_name(release), factory.peers_service()).await?;

    if let Some(secret) = factory.store_config_secret()? {
        apply(client, ns, &store_config_secret_name(release), secret).await?;
    }
    if let Some(store) = factory.store_stateful_set() {
        apply(client, ns, &thanos_store_name(release), store).await?;
    }

    let query = thanos_query_name(release);
    apply(client, ns, &query, factory.query_deployment()).await?;
    apply(client, ns, &query, factory.query_service()).await?;

    info!(
        namespace = %ns,
        release = %release,
        long_term_storage = factory.time_series_storage().is_some(),
        "Static resources ensured"
    );
    Ok(())
}
