//! Incident lifecycle transition table
//!
//! Every state change the controller makes goes through
//! [`validate_transition`]; terminal states have no outgoing edges.

use crate::error::LifecycleError;
use crate::types::IncidentState;

/// Validates a state transition.
///
/// # Errors
/// Returns [`LifecycleError::IllegalTransition`] if `to` is not reachable from
/// `from` in one step.
pub fn validate_transition(from: IncidentState, to: IncidentState) -> Result<(), LifecycleError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(LifecycleError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: IncidentState) -> Vec<IncidentState> {
    use IncidentState::*;
    match from {
        Detected => vec![Planning],
        Planning => vec![AwaitingApproval, Failed],
        AwaitingApproval => vec![Executing, Rejected],
        Executing => vec![Verifying, Failed],
        Verifying => vec![Resolved, SelfCorrecting, Failed],
        SelfCorrecting => vec![Resolved, Failed],
        Resolved | Failed | Rejected => vec![],
    }
}

fn allowed(from: IncidentState, to: IncidentState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

/// Whether a full history is a legal lifecycle path
///
/// Starts at `Detected`, takes only allowed steps, and ends in a terminal state.
#[must_use]
pub fn is_complete_path(path: &[IncidentState]) -> bool {
    match (path.first(), path.last()) {
        (Some(IncidentState::Detected), Some(last)) if last.is_terminal() => {
            path.windows(2).all(|w| allowed(w[0], w[1]))
        }
        _ => false,
    }
}
