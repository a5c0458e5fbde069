//! Static configuration shared by every test of a release
//!
//! The file is YAML and lists the data sources checks may query, global
//! checks appended to every test, receivers the monitor reports to and the
//! optional long-term time-series storage. Receivers, data sources and the
//! storage backend are tagged unions: the key naming the backend sits next
//! to the entry's name, e.g.
//!
//! ```yaml
//! receivers:
//! - name: reports
//!   gcs:
//!     bucket: lotus-reports
//!     credentials:
//!       secret: gcs-sa
//!       file: key.json
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crd::LotusCheck;

/// Errors loading or validating the static configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_sources: Vec<DataSource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<LotusCheck>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receivers: Vec<Receiver>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_series_storage: Option<TimeSeriesStorage>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DataSource {
    pub name: String,
    #[serde(flatten)]
    pub kind: DataSourceKind,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum DataSourceKind {
    Prometheus(PrometheusDataSource),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PrometheusDataSource {
    pub address: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Receiver {
    pub name: String,
    #[serde(flatten)]
    pub kind: ReceiverKind,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ReceiverKind {
    Logger(LoggerReceiver),
    Gcs(GcsBucket),
    Slack(SlackReceiver),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LoggerReceiver {}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlackReceiver {
    pub hook_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// A GCS bucket, optionally accessed with service account credentials
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GcsBucket {
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretFile>,
}

/// A file inside a Kubernetes Secret
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SecretFile {
    /// Secret name, in the namespace of the pod that mounts it
    pub secret: String,
    /// Key of the secret holding the credentials
    pub file: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum TimeSeriesStorage {
    Gcs(GcsBucket),
}

impl TimeSeriesStorage {
    pub fn credentials(&self) -> Option<&SecretFile> {
        match self {
            TimeSeriesStorage::Gcs(gcs) => gcs.credentials.as_ref(),
        }
    }
}

impl Receiver {
    /// Directory the receiver's credentials are mounted at in the monitor
    pub fn credentials_mount_path(&self) -> String {
        format!("/etc/creds/{}/", self.name)
    }

    pub fn credentials_file(&self, file: &str) -> String {
        format!("{}{}", self.credentials_mount_path(), file)
    }
}

impl Config {
    /// Load and validate the config file at `path`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self, ConfigError> {
        // An empty document is a valid, empty config
        let config: Config = if data.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(data)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn add_checks(&mut self, checks: &[LotusCheck]) {
        self.checks.extend_from_slice(checks);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        unique_names("data source", self.data_sources.iter().map(|d| d.name.as_str()))?;
        unique_names("check", self.checks.iter().map(|c| c.name.as_str()))?;
        unique_names("receiver", self.receivers.iter().map(|r| r.name.as_str()))?;

        for ds in &self.data_sources {
            match &ds.kind {
                DataSourceKind::Prometheus(p) if p.address.is_empty() => {
                    return Err(ConfigError::Invalid(format!(
                        "data source {} has an empty prometheus address",
                        ds.name
                    )));
                }
                DataSourceKind::Prometheus(_) => {}
            }
        }

        for receiver in &self.receivers {
            let problem = match &receiver.kind {
                ReceiverKind::Logger(_) => None,
                ReceiverKind::Gcs(gcs) => validate_bucket(gcs).err(),
                ReceiverKind::Slack(slack) if slack.hook_url.is_empty() => {
                    Some("hookUrl must not be empty".to_string())
                }
                ReceiverKind::Slack(_) => None,
            };
            if let Some(problem) = problem {
                return Err(ConfigError::Invalid(format!(
                    "receiver {}: {}",
                    receiver.name, problem
                )));
            }
        }

        if let Some(TimeSeriesStorage::Gcs(gcs)) = &self.time_series_storage {
            validate_bucket(gcs)
                .map_err(|e| ConfigError::Invalid(format!("timeSeriesStorage: {}", e)))?;
        }

        for check in &self.checks {
            if check.expr.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "check {} has an empty expr",
                    check.name
                )));
            }
        }

        Ok(())
    }
}

fn unique_names<'a>(
    what: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(ConfigError::Invalid(format!("{} name must not be empty", what)));
        }
        if !seen.insert(name) {
            return Err(ConfigError::Invalid(format!("duplicate {} name: {}", what, name)));
        }
    }
    Ok(())
}

fn validate_bucket(gcs: &GcsBucket) -> Result<(), String> {
    if gcs.bucket.is_empty() {
        return Err("bucket must not be empty".to_string());
    }
    if let Some(creds) = &gcs.credentials
        && (creds.secret.is_empty() || creds.file.is_empty())
    {
        return Err("credentials need both secret and file".to_string());
    }
    Ok(())
}
