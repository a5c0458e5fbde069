//! Error types for the Lotus controller

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::crd::LotusPhase;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `ValidationError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Static config error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Template error: {0}")]
    TemplateError(#[from] minijinja::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Invalid resource key: {0}")]
    InvalidKey(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid phase transition from {from} on {event}")]
    InvalidTransition { from: LotusPhase, event: String },

    #[error("Cache failed to sync: {0}")]
    CacheNotReady(String),

    #[error("Reconciliation cancelled")]
    Cancelled,
}

impl Error {
    /// The API reported that the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 404)
            || matches!(self, Error::NotFound(_))
    }

    /// The API reported a write conflict or an already existing object
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 409)
    }

    /// Whether a failed sync is worth retrying with backoff
    ///
    /// Only a key that can never name an object is given up on. API,
    /// declaration and config errors all retry, since the cluster, the Lotus
    /// and the static config file can each be fixed from outside.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::MissingObjectKey(_) | Error::InvalidKey(_) | Error::Cancelled
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration for requeued keys
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_secs = self.max_delay.as_secs_f64();
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_delay_secs =
            (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent)).min(max_secs);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::random::<f64>() * jitter_range * 2.0 - jitter_range
        } else {
            0.0
        };

        Duration::from_secs_f64((base_delay_secs + jitter).clamp(0.0, max_secs))
    }
}
