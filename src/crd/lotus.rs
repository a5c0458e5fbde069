use k8s_openapi::api::core::v1::{Container, Volume};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lotus is the Schema for the lotuses API
///
/// A Lotus declares one load test: an optional preparation job, a worker
/// workload that generates the load, an optional cleanup job and the checks
/// the monitor evaluates while the worker runs.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "lotus.lotusload.io",
    version = "v1beta1",
    kind = "Lotus",
    plural = "lotuses",
    shortname = "lt",
    namespaced,
    status = "LotusStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LotusSpec {
    /// Seconds to keep the test around once it reached a terminal phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,

    /// Overrides the monitor's check interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_interval_seconds: Option<i32>,

    /// Overrides the delay before the monitor evaluates the first check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_initial_delay_seconds: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preparer: Option<StageSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaner: Option<StageSpec>,

    /// Alerting checks evaluated by the monitor against the test's metrics
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<LotusCheck>,
}

/// A run-once stage (preparer or cleaner)
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageSpec {
    #[serde(default)]
    pub containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

/// The load generating workload
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    /// How long the worker generates load (e.g. "10m", "1h30m")
    pub run_time: String,

    /// Number of worker pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Port on which worker pods expose Prometheus metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<i32>,

    #[serde(default)]
    pub containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

impl WorkerSpec {
    pub fn replicas(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }
}

/// An alert rule evaluated during the test
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LotusCheck {
    pub name: String,

    /// PromQL expression; the check fails while it returns results
    pub expr: String,

    /// How long `expr` must hold before the check fires (e.g. "30s")
    #[serde(rename = "for")]
    pub for_: String,

    /// Data source the expression is evaluated against. Checks without one
    /// are evaluated against the test's own Prometheus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
}

impl LotusCheck {
    /// The named data source, treating an empty name as absent
    pub fn data_source(&self) -> Option<&str> {
        self.data_source.as_deref().filter(|s| !s.is_empty())
    }
}

/// Status of a Lotus, written only by the controller
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LotusStatus {
    #[serde(default)]
    pub phase: LotusPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preparer_start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preparer_completion_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_completion_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaner_start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaner_completion_time: Option<String>,
}

/// Lotus lifecycle phase
///
/// A freshly created Lotus has no phase, which is serialized as the empty
/// string and read back as `Init`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum LotusPhase {
    #[default]
    #[serde(rename = "")]
    Init,
    /// Accepted by the controller
    Pending,
    /// The preparer job runs
    Preparing,
    /// Worker and monitor run
    Running,
    /// The cleaner job runs after a successful test
    Cleaning,
    /// The cleaner job runs after a failed test
    FailureCleaning,
    Succeeded,
    Failed,
    /// A phase this controller does not know about
    #[serde(other)]
    Unknown,
}

impl LotusPhase {
    /// Terminal phases never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, LotusPhase::Succeeded | LotusPhase::Failed)
    }
}

impl std::fmt::Display for LotusPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LotusPhase::Init => write!(f, "Init"),
            LotusPhase::Pending => write!(f, "Pending"),
            LotusPhase::Preparing => write!(f, "Preparing"),
            LotusPhase::Running => write!(f, "Running"),
            LotusPhase::Cleaning => write!(f, "Cleaning"),
            LotusPhase::FailureCleaning => write!(f, "FailureCleaning"),
            LotusPhase::Succeeded => write!(f, "Succeeded"),
            LotusPhase::Failed => write!(f, "Failed"),
            LotusPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

impl Lotus {
    /// Current phase, `Init` when no status has been written yet
    pub fn phase(&self) -> LotusPhase {
        self.status
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or_default()
    }
}
