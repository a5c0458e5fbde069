//! Additional unit tests for lifecycle transitions

use lotus_operator::controller::state_machine::{
    JobOutcome, LotusEvent, LotusStateMachine, TransitionResult,
};
use lotus_operator::crd::LotusPhase;

const ALL_EVENTS: [LotusEvent; 11] = [
    LotusEvent::Accepted,
    LotusEvent::PreparationStarted,
    LotusEvent::PreparerSkipped,
    LotusEvent::PreparerSucceeded,
    LotusEvent::PreparerFailed,
    LotusEvent::DeclarationRejected,
    LotusEvent::MonitorSucceeded,
    LotusEvent::MonitorFailed,
    LotusEvent::CleanerSkipped,
    LotusEvent::CleanerSucceeded,
    LotusEvent::CleanerFailed,
];

fn target(from: LotusPhase, event: LotusEvent) -> Option<LotusPhase> {
    match LotusStateMachine::new().transition(&from, event) {
        TransitionResult::Success { to, .. } => Some(to),
        TransitionResult::InvalidTransition { .. } => None,
    }
}

mod terminal_phase_tests {
    use super::*;

    #[test]
    fn test_succeeded_accepts_no_event() {
        let sm = LotusStateMachine::new();
        assert!(sm.valid_events(&LotusPhase::Succeeded).is_empty());
    }

    #[test]
    fn test_failed_accepts_no_event() {
        let sm = LotusStateMachine::new();
        assert!(sm.valid_events(&LotusPhase::Failed).is_empty());
    }

    #[test]
    fn test_unknown_accepts_no_event() {
        for event in ALL_EVENTS {
            assert_eq!(target(LotusPhase::Unknown, event), None);
        }
    }
}

mod failure_branch_tests {
    use super::*;

    #[test]
    fn test_preparer_failure() {
        assert_eq!(
            target(LotusPhase::Preparing, LotusEvent::PreparerFailed),
            Some(LotusPhase::FailureCleaning)
        );
    }

    #[test]
    fn test_rejected_declaration_fails_before_running() {
        assert_eq!(
            target(LotusPhase::Preparing, LotusEvent::DeclarationRejected),
            Some(LotusPhase::FailureCleaning)
        );
        for phase in [LotusPhase::Init, LotusPhase::Pending, LotusPhase::Running] {
            assert_eq!(target(phase, LotusEvent::DeclarationRejected), None);
        }
    }

    #[test]
    fn test_monitor_failure() {
        assert_eq!(
            target(LotusPhase::Running, LotusEvent::MonitorFailed),
            Some(LotusPhase::FailureCleaning)
        );
    }

    #[test]
    fn test_failure_cleaning_always_fails() {
        for event in [
            LotusEvent::CleanerSkipped,
            LotusEvent::CleanerSucceeded,
            LotusEvent::CleanerFailed,
        ] {
            assert_eq!(
                target(LotusPhase::FailureCleaning, event),
                Some(LotusPhase::Failed)
            );
        }
    }

    #[test]
    fn test_cleaner_failure_after_success() {
        assert_eq!(
            target(LotusPhase::Cleaning, LotusEvent::CleanerFailed),
            Some(LotusPhase::Failed)
        );
    }
}

mod skip_tests {
    use super::*;

    #[test]
    fn test_missing_preparer_goes_straight_to_running() {
        assert_eq!(
            target(LotusPhase::Preparing, LotusEvent::PreparerSkipped),
            Some(LotusPhase::Running)
        );
    }

    #[test]
    fn test_missing_cleaner_finishes_the_test() {
        assert_eq!(
            target(LotusPhase::Cleaning, LotusEvent::CleanerSkipped),
            Some(LotusPhase::Succeeded)
        );
    }
}

mod table_tests {
    use super::*;

    #[test]
    fn test_can_transition_agrees_with_transition() {
        let sm = LotusStateMachine::new();
        let phases = [
            LotusPhase::Init,
            LotusPhase::Pending,
            LotusPhase::Preparing,
            LotusPhase::Running,
            LotusPhase::Cleaning,
            LotusPhase::FailureCleaning,
            LotusPhase::Succeeded,
            LotusPhase::Failed,
        ];
        for phase in phases {
            for event in ALL_EVENTS {
                assert_eq!(
                    sm.can_transition(&phase, &event),
                    target(phase, event).is_some(),
                    "{} on {}",
                    phase,
                    event
                );
            }
        }
    }

    #[test]
    fn test_init_only_accepts() {
        let sm = LotusStateMachine::new();
        assert_eq!(
            sm.valid_events(&LotusPhase::Init),
            vec![&LotusEvent::Accepted]
        );
    }

    #[test]
    fn test_running_cannot_skip_to_succeeded() {
        assert_eq!(target(LotusPhase::Running, LotusEvent::CleanerSucceeded), None);
    }
}

mod job_outcome_tests {
    use super::*;

    #[test]
    fn test_no_counts_is_active() {
        assert_eq!(JobOutcome::from_counts(0, 0), JobOutcome::Active);
    }

    #[test]
    fn test_failure_wins() {
        assert_eq!(JobOutcome::from_counts(1, 1), JobOutcome::Failed);
        assert_eq!(JobOutcome::from_counts(0, 2), JobOutcome::Failed);
    }

    #[test]
    fn test_success() {
        assert_eq!(JobOutcome::from_counts(1, 0), JobOutcome::Succeeded);
    }
}
