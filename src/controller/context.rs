use std::path::PathBuf;
use std::sync::Arc;

use crate::client::Lister;
use crate::crd::Lotus;
use crate::health::HealthState;
use crate::resources::DEFAULT_LOTUS_IMAGE;

/// Process-wide settings of the controller
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Namespace the controller runs in; release-wide resources live here
    pub namespace: String,
    /// Namespace to watch for Lotus resources, `None` for all namespaces
    pub watch_namespace: Option<String>,
    /// Release name prefixing the release-wide resources
    pub release: String,
    /// Path of the static configuration file
    pub config_file: PathBuf,
    /// Service account for the per-test Prometheus pods
    pub prometheus_service_account: Option<String>,
    /// Name of the controller's own Deployment, owner of the release-wide resources
    pub controller_deployment: String,
    /// Image running the monitor
    pub lotus_image: String,
    /// Number of concurrent workers
    pub workers: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            watch_namespace: None,
            release: "lotus".to_string(),
            config_file: PathBuf::from("/etc/lotus/config.yaml"),
            prometheus_service_account: None,
            controller_deployment: "lotus-controller".to_string(),
            lotus_image: DEFAULT_LOTUS_IMAGE.to_string(),
            workers: 2,
        }
    }
}

/// Shared context for the controller
pub struct Context<C> {
    pub client: C,
    /// Local cache of Lotus objects
    pub lotuses: Arc<dyn Lister<Lotus>>,
    pub settings: ControllerSettings,
    pub health: Option<Arc<HealthState>>,
}

impl<C> Context<C> {
    pub fn new(
        client: C,
        lotuses: Arc<dyn Lister<Lotus>>,
        settings: ControllerSettings,
        health: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            lotuses,
            settings,
            health,
        }
    }
}
