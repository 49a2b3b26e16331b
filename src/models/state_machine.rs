// Work unit status state machine with validation

use super::WorkUnitStatus;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum StateTransitionError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: WorkUnitStatus,
        to: WorkUnitStatus,
    },
}

/// Validates if a work unit can transition from one status to another
pub fn can_transition(from: WorkUnitStatus, to: WorkUnitStatus) -> bool {
    use WorkUnitStatus::*;

    match (from, to) {
        // Same state is always allowed (no-op, not logged)
        (a, b) if a == b => true,

        // DONE is terminal
        (Done, _) => false,

        // Any non-terminal state can be routed to an operator
        (_, NeedsAttention) => true,

        (Ready, Running) => true,
        (Ready, Blocked) => true,

        // Phase advanced, or completion gate passed
        (Running, Ready) => true,
        (Running, Done) => true,

        // Blockers cleared
        (Blocked, Ready) => true,

        // Operator action
        (NeedsAttention, Ready) => true,
        (NeedsAttention, Blocked) => true,

        _ => false,
    }
}

/// Validates and performs a state transition
pub fn transition_state(
    current: WorkUnitStatus,
    target: WorkUnitStatus,
) -> Result<WorkUnitStatus, StateTransitionError> {
    if !can_transition(current, target) {
        return Err(StateTransitionError::InvalidTransition {
            from: current,
            to: target,
        });
    }

    Ok(target)
}

pub fn is_terminal_state(status: WorkUnitStatus) -> bool {
    matches!(status, WorkUnitStatus::Done)
}

/// Get all valid next states from current state
pub fn valid_next_states(current: WorkUnitStatus) -> Vec<WorkUnitStatus> {
    WorkUnitStatus::all()
        .iter()
        .copied()
        .filter(|&state| state != current && can_transition(current, state))
        .collect()
}
