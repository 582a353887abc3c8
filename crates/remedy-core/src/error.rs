//! Error types for the remediation engine
//!
//! Failures fall into a few classes that the controller treats differently:
//! - Input errors (bad collaborator output): recovered by the rule-based plan
//! - Policy errors (unsupported provider/action, veto): terminal, never retried
//! - Lifecycle errors: illegal transitions, unknown incidents
//! - Configuration errors

use crate::types::{ActionCommand, IncidentId, IncidentState, Provider};
use remedy_audit::AuditError;

/// Main orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Lifecycle violation
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Approval gate error
    #[error("approval error: {0}")]
    Approval(#[from] ApprovalError),

    /// Dispatch rejected
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Planning failed
    #[error("planning error: {0}")]
    Planning(#[from] PlanningError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Audit chain could not record an event
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    /// New incidents are refused once shutdown has begun
    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

impl OrchestratorError {
    /// Check if error is a policy rejection (terminal, never retried)
    #[inline]
    #[must_use]
    pub fn is_policy_error(&self) -> bool {
        matches!(self, Self::Dispatch(e) if e.is_policy_error())
    }
}

/// Incident lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// Transition not in the allowed table
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current state
        from: IncidentState,
        /// Requested state
        to: IncidentState,
    },

    /// No incident with that id
    #[error("unknown incident: {0}")]
    UnknownIncident(IncidentId),
}

/// Approval gate errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    /// A request for this incident is already waiting
    #[error("approval already pending for incident {0}")]
    AlreadyPending(IncidentId),
}

/// Action dispatch errors
///
/// Capability faults are not errors: they degrade into an
/// [`ActionResult`](crate::types::ActionResult) outcome instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// No capability set registered for the provider
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(Provider),

    /// Provider does not implement the action
    #[error("provider {provider} does not support {action}")]
    UnsupportedAction {
        /// Provider
        provider: Provider,
        /// Requested action
        action: ActionCommand,
    },

    /// Blocked by a veto rule
    #[error("security veto: {action} on {target} blocked ({rule})")]
    SecurityVeto {
        /// Requested action
        action: ActionCommand,
        /// Requested target
        target: String,
        /// Description of the matching rule
        rule: String,
    },

    /// Missing or malformed parameters
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    /// Policy errors move the incident to `Failed` without retry
    #[inline]
    #[must_use]
    pub fn is_policy_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedProvider(_) | Self::UnsupportedAction { .. } | Self::SecurityVeto { .. }
        )
    }
}

/// Planning collaborator errors
///
/// All of these are input errors: the controller falls back to the
/// rule-based plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    /// Collaborator could not be reached or refused
    #[error("planner unavailable: {0}")]
    Unavailable(String),

    /// Collaborator exceeded the planning timeout
    #[error("planner timed out after {after_secs}s")]
    Timeout {
        /// Configured timeout
        after_secs: u64,
    },

    /// Proposal is structurally invalid
    #[error("malformed plan: {0}")]
    Malformed(String),

    /// Proposal text was not valid JSON
    #[error("plan is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML could not be parsed
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration could not be rendered
    #[error("cannot render config: {0}")]
    Render(#[from] toml::ser::Error),

    /// Value out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_classification() {
        let veto: OrchestratorError = DispatchError::SecurityVeto {
            action: ActionCommand::Rollback,
            target: "payments".to_string(),
            rule: "no rollbacks".to_string(),
        }
        .into();
        assert!(veto.is_policy_error());

        let invalid: OrchestratorError = DispatchError::InvalidRequest("empty target".into()).into();
        assert!(!invalid.is_policy_error());

        let planning: OrchestratorError = PlanningError::Timeout { after_secs: 30 }.into();
        assert!(!planning.is_policy_error());
    }

    #[test]
    fn messages_name_the_offender() {
        let err = DispatchError::UnsupportedProvider(Provider::from("UNKNOWN"));
        assert_eq!(err.to_string(), "unsupported provider: UNKNOWN");

        let err = LifecycleError::IllegalTransition {
            from: IncidentState::Detected,
            to: IncidentState::Executing,
        };
        assert_eq!(err.to_string(), "illegal transition DETECTED -> EXECUTING");
    }
}
