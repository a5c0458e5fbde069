//! Status management for Lotus resources
//!
//! The status is always re-derived from the copy fetched right before the
//! write, and written with the fetched resourceVersion so a concurrent
//! writer makes the update fail with a conflict instead of being overwritten.

use chrono::{DateTime, SecondsFormat, Utc};
use kube::ResourceExt;
use tracing::{debug, info};

use crate::client::ClusterClient;
use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::state_machine::{LotusEvent, LotusStateMachine, TransitionResult};
use crate::crd::{Lotus, LotusPhase, LotusStatus};

/// Which optional stages a Lotus declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredStages {
    pub preparer: bool,
    pub cleaner: bool,
}

impl DeclaredStages {
    pub const ALL: Self = Self {
        preparer: true,
        cleaner: true,
    };

    pub fn of(lotus: &Lotus) -> Self {
        Self {
            preparer: lotus.spec.preparer.is_some(),
            cleaner: lotus.spec.cleaner.is_some(),
        }
    }
}

/// Compute the status for a move from the current status' phase to `phase`
///
/// Entering Preparing, Running or a cleaning phase stamps the stage's start
/// time; leaving it stamps the completion time. Stages the Lotus does not
/// declare never get timestamps. A timestamp that is already set is never
/// overwritten, and writing the same phase changes nothing.
pub fn derive_status(
    current: Option<&LotusStatus>,
    phase: LotusPhase,
    stages: DeclaredStages,
    now: DateTime<Utc>,
) -> LotusStatus {
    let mut status = current.cloned().unwrap_or_default();
    let previous = status.phase;
    status.phase = phase;

    if previous == phase {
        return status;
    }

    let now = now.to_rfc3339_opts(SecondsFormat::Secs, true);

    match phase {
        LotusPhase::Preparing if stages.preparer => {
            set_once(&mut status.preparer_start_time, &now)
        }
        LotusPhase::Running => set_once(&mut status.worker_start_time, &now),
        LotusPhase::Cleaning | LotusPhase::FailureCleaning if stages.cleaner => {
            set_once(&mut status.cleaner_start_time, &now)
        }
        _ => {}
    }

    match previous {
        LotusPhase::Preparing if stages.preparer => {
            set_once(&mut status.preparer_completion_time, &now)
        }
        LotusPhase::Running => set_once(&mut status.worker_completion_time, &now),
        LotusPhase::Cleaning | LotusPhase::FailureCleaning if stages.cleaner => {
            set_once(&mut status.cleaner_completion_time, &now)
        }
        _ => {}
    }

    status
}

fn set_once(field: &mut Option<String>, now: &str) {
    if field.is_none() {
        *field = Some(now.to_string());
    }
}

/// Status manager for Lotus resources
pub struct StatusManager<'a, C> {
    lotus: &'a Lotus,
    ctx: &'a Context<C>,
}

impl<'a, C: ClusterClient> StatusManager<'a, C> {
    /// `lotus` is the cached copy the reconciler dispatched on
    pub fn new(lotus: &'a Lotus, ctx: &'a Context<C>) -> Self {
        Self { lotus, ctx }
    }

    /// Apply `event` to the Lotus and persist the resulting phase
    ///
    /// Returns the phase written, or `None` when the object disappeared or
    /// moved on since the cached copy was taken. Either way a newer
    /// notification will trigger the next reconciliation.
    pub async fn apply_event(&self, event: LotusEvent) -> Result<Option<LotusPhase>> {
        let ns = self
            .lotus
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let name = self.lotus.name_any();

        let Some(fresh) = self.ctx.client.get::<Lotus>(&ns, &name).await? else {
            debug!(%name, "Lotus was deleted before its status could be written");
            return Ok(None);
        };

        let cached_phase = self.lotus.phase();
        let current = fresh.phase();
        if current != cached_phase {
            debug!(
                %name,
                cached = %cached_phase,
                current = %current,
                "Phase moved on since the cached copy, skipping write"
            );
            return Ok(None);
        }

        let to = match LotusStateMachine::new().transition(&current, event) {
            TransitionResult::Success {
                to, description, ..
            } => {
                info!(%name, from = %current, %to, %event, "{}", description);
                to
            }
            TransitionResult::InvalidTransition { current, event } => {
                return Err(Error::InvalidTransition {
                    from: current,
                    event: event.to_string(),
                });
            }
        };

        let mut updated = fresh;
        updated.status = Some(derive_status(
            updated.status.as_ref(),
            to,
            DeclaredStages::of(&updated),
            Utc::now(),
        ));
        self.ctx.client.update_lotus_status(&updated).await?;

        if let Some(health) = &self.ctx.health {
            health.metrics.record_transition(&to.to_string());
        }

        Ok(Some(to))
    }
}
