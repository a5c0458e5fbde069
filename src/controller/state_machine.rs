//! Finite state machine for the Lotus lifecycle
//!
//! Every phase write goes through this table, so a status can only move
//! forward along `Init -> Pending -> Preparing -> Running -> Cleaning ->
//! Succeeded` or the failure branch through `FailureCleaning -> Failed`.

use std::fmt;

use crate::crd::LotusPhase;

/// Events that trigger state transitions in the test lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LotusEvent {
    /// The controller saw the Lotus for the first time
    Accepted,
    /// The controller is about to start the preparer
    PreparationStarted,
    /// No preparer is declared
    PreparerSkipped,
    PreparerSucceeded,
    PreparerFailed,
    /// The declaration cannot be run as written
    DeclarationRejected,
    /// The monitor job finished without a firing check
    MonitorSucceeded,
    /// The monitor job reported a failure
    MonitorFailed,
    /// No cleaner is declared
    CleanerSkipped,
    CleanerSucceeded,
    CleanerFailed,
}

impl fmt::Display for LotusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LotusEvent::Accepted => write!(f, "Accepted"),
            LotusEvent::PreparationStarted => write!(f, "PreparationStarted"),
            LotusEvent::PreparerSkipped => write!(f, "PreparerSkipped"),
            LotusEvent::PreparerSucceeded => write!(f, "PreparerSucceeded"),
            LotusEvent::PreparerFailed => write!(f, "PreparerFailed"),
            LotusEvent::DeclarationRejected => write!(f, "DeclarationRejected"),
            LotusEvent::MonitorSucceeded => write!(f, "MonitorSucceeded"),
            LotusEvent::MonitorFailed => write!(f, "MonitorFailed"),
            LotusEvent::CleanerSkipped => write!(f, "CleanerSkipped"),
            LotusEvent::CleanerSucceeded => write!(f, "CleanerSucceeded"),
            LotusEvent::CleanerFailed => write!(f, "CleanerFailed"),
        }
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: LotusPhase,
    pub to: LotusPhase,
    pub event: LotusEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: LotusPhase,
        to: LotusPhase,
        event: LotusEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq)]
pub enum TransitionResult {
    Success {
        from: LotusPhase,
        to: LotusPhase,
        event: LotusEvent,
        description: &'static str,
    },
    /// Transition was not valid for current state
    InvalidTransition {
        current: LotusPhase,
        event: LotusEvent,
    },
}

/// Transition table for the Lotus lifecycle
pub struct LotusStateMachine {
    transitions: Vec<Transition>,
}

impl Default for LotusStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LotusStateMachine {
    pub fn new() -> Self {
        use LotusEvent as E;
        use LotusPhase as P;

        Self {
            transitions: vec![
                Transition::new(P::Init, P::Pending, E::Accepted, "Lotus accepted"),
                Transition::new(
                    P::Pending,
                    P::Preparing,
                    E::PreparationStarted,
                    "Starting preparation",
                ),
                // === Preparing ===
                Transition::new(
                    P::Preparing,
                    P::Running,
                    E::PreparerSkipped,
                    "No preparer declared, starting worker",
                ),
                Transition::new(
                    P::Preparing,
                    P::Running,
                    E::PreparerSucceeded,
                    "Preparer completed, starting worker",
                ),
                Transition::new(
                    P::Preparing,
                    P::FailureCleaning,
                    E::PreparerFailed,
                    "Preparer failed",
                ),
                Transition::new(
                    P::Preparing,
                    P::FailureCleaning,
                    E::DeclarationRejected,
                    "Declaration rejected before the run",
                ),
                // === Running ===
                Transition::new(
                    P::Running,
                    P::Cleaning,
                    E::MonitorSucceeded,
                    "Monitor reported success, worker stopped",
                ),
                Transition::new(
                    P::Running,
                    P::FailureCleaning,
                    E::MonitorFailed,
                    "Monitor reported failure, worker stopped",
                ),
                // === Cleaning ===
                Transition::new(
                    P::Cleaning,
                    P::Succeeded,
                    E::CleanerSkipped,
                    "No cleaner declared, test succeeded",
                ),
                Transition::new(
                    P::Cleaning,
                    P::Succeeded,
                    E::CleanerSucceeded,
                    "Cleaner completed, test succeeded",
                ),
                Transition::new(P::Cleaning, P::Failed, E::CleanerFailed, "Cleaner failed"),
                // === FailureCleaning ===
                // A successful cleaner does not rescue a failed test
                Transition::new(
                    P::FailureCleaning,
                    P::Failed,
                    E::CleanerSkipped,
                    "No cleaner declared, test failed",
                ),
                Transition::new(
                    P::FailureCleaning,
                    P::Failed,
                    E::CleanerSucceeded,
                    "Cleaner completed after failure, test failed",
                ),
                Transition::new(
                    P::FailureCleaning,
                    P::Failed,
                    E::CleanerFailed,
                    "Cleaner failed after failure, test failed",
                ),
                // Succeeded and Failed are terminal
            ],
        }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(&self, current: &LotusPhase, event: LotusEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    pub fn can_transition(&self, from: &LotusPhase, event: &LotusEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: &LotusPhase) -> Vec<&LotusEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == *state)
            .map(|t| &t.event)
            .collect()
    }
}

/// Outcome of a run-once job as reported by its status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Active,
    Succeeded,
    Failed,
}

impl JobOutcome {
    /// Failure wins when a job reports both, since jobs run with no retries
    pub fn from_counts(succeeded: i32, failed: i32) -> Self {
        if failed > 0 {
            JobOutcome::Failed
        } else if succeeded > 0 {
            JobOutcome::Succeeded
        } else {
            JobOutcome::Active
        }
    }
}
