use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::ObjectMeta;
use serde::Serialize;

use crate::config::{ConfigError, TimeSeriesStorage};
use crate::controller::error::Result;
use crate::resources::common::{standard_labels, store_config_secret_name};
use crate::resources::thanos::STORE_CONFIG_FILE;

/// Thanos object store configuration file
#[derive(Serialize)]
struct ObjectStoreConfig<'a> {
    #[serde(rename = "type")]
    type_: &'static str,
    config: BucketConfig<'a>,
}

#[derive(Serialize)]
struct BucketConfig<'a> {
    bucket: &'a str,
}

/// Render the Thanos objstore config for `storage`
pub fn object_store_config(storage: &TimeSeriesStorage) -> Result<String> {
    let config = match storage {
        TimeSeriesStorage::Gcs(gcs) => ObjectStoreConfig {
            type_: "GCS",
            config: BucketConfig {
                bucket: &gcs.bucket,
            },
        },
    };
    serde_yaml::to_string(&config).map_err(|e| ConfigError::from(e).into())
}

/// Generate the Secret holding the release's object store config
pub fn generate_store_config_secret(
    release: &str,
    namespace: &str,
    owner: &OwnerReference,
    storage: &TimeSeriesStorage,
) -> Result<Secret> {
    let string_data = BTreeMap::from([(
        STORE_CONFIG_FILE.to_string(),
        object_store_config(storage)?,
    )]);

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(store_config_secret_name(release)),
            namespace: Some(namespace.to_string()),
            labels: Some(standard_labels()),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(string_data),
        ..Default::default()
    })
}
