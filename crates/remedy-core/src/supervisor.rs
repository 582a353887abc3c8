//! Supervised execute → verify → self-correct loop
//!
//! Starting from `Executing`, the supervisor:
//! 1. dispatches the primary action (a `Failed` outcome is terminal)
//! 2. waits the settle delay and asks the verification probe
//! 3. on a failed probe enters `SelfCorrecting` and runs exactly one
//!    deterministic fallback, then verifies again
//!
//! At most [`MAX_ACTIONS_PER_INCIDENT`] dispatches happen per incident. Every
//! suspension point is raced against the incident's cancel signal.

use crate::cancel::CancelSignal;
use crate::dispatch::Dispatcher;
use crate::error::OrchestratorError;
use crate::plan::ValidatedPlan;
use crate::probe::VerificationProbe;
use crate::types::{ActionCommand, ActionResult, IncidentId, IncidentState, Provider};
use std::sync::Arc;
use std::time::Duration;

/// Primary plus one fallback
pub const MAX_ACTIONS_PER_INCIDENT: usize = 2;

/// Callbacks through which the supervisor drives the incident record
pub trait LifecycleHooks: Send + Sync {
    /// Move the incident to `state`
    ///
    /// # Errors
    /// Returns error if the transition is illegal or cannot be audited.
    fn enter(&self, state: IncidentState, detail: &str) -> Result<(), OrchestratorError>;

    /// Record a completed dispatch
    ///
    /// # Errors
    /// Returns error if the action cannot be audited.
    fn record_action(&self, result: &ActionResult) -> Result<(), OrchestratorError>;
}

/// How supervision ended
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisionOutcome {
    /// Terminal state entered (`Resolved` or `Failed`)
    pub state: IncidentState,
    /// Why
    pub reason: String,
    /// Actions dispatched, in order
    pub actions: Vec<ActionResult>,
}

enum Step {
    Done(ActionResult),
    Stopped(String),
}

/// Runs the post-approval part of the lifecycle
pub struct Supervisor {
    dispatcher: Arc<Dispatcher>,
    probe: Arc<dyn VerificationProbe>,
    settle_delay: Duration,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("settle_delay", &self.settle_delay)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor
    pub fn new(dispatcher: Arc<Dispatcher>, probe: Arc<dyn VerificationProbe>, settle_delay: Duration) -> Self {
        Self {
            dispatcher,
            probe,
            settle_delay,
        }
    }

    /// Fallback for a failed verification
    ///
    /// `Rollback` if the provider supports it and it was not the primary,
    /// otherwise `Restart` under the same condition, otherwise none.
    #[must_use]
    pub fn fallback_for(&self, provider: &Provider, primary: ActionCommand) -> Option<ActionCommand> {
        [ActionCommand::Rollback, ActionCommand::Restart]
            .into_iter()
            .find(|a| *a != primary && self.dispatcher.supports(provider, *a))
    }

    /// Supervise a validated plan to a terminal state
    ///
    /// The incident must already be in `Executing`.
    ///
    /// # Errors
    /// Returns error only if a hook fails; dispatch and verification problems
    /// end in `Failed` instead.
    pub async fn run(
        &self,
        incident_id: IncidentId,
        plan: &ValidatedPlan,
        hooks: &dyn LifecycleHooks,
        cancel: &mut CancelSignal,
    ) -> Result<SupervisionOutcome, OrchestratorError> {
        let plan = plan.plan();
        let mut actions = Vec::with_capacity(MAX_ACTIONS_PER_INCIDENT);

        let primary = match self
            .execute(&plan.provider, plan.action, &plan.target, false, cancel)
            .await
        {
            Step::Done(result) => result,
            Step::Stopped(reason) => return finish(hooks, IncidentState::Failed, reason, actions),
        };
        hooks.record_action(&primary)?;
        actions.push(primary.clone());
        if !primary.outcome.counts_as_executed() {
            let reason = format!("primary action failed: {}", primary.message);
            return finish(hooks, IncidentState::Failed, reason, actions);
        }

        hooks.enter(
            IncidentState::Verifying,
            &format!(
                "{} returned {}; verifying after {}ms",
                primary.action,
                primary.outcome,
                self.settle_delay.as_millis()
            ),
        )?;
        match self.settle_and_verify(incident_id, &primary, cancel).await {
            None => return finish(hooks, IncidentState::Failed, "aborted during verification".into(), actions),
            Some(true) => {
                let reason = format!("verification passed after {}", primary.action);
                return finish(hooks, IncidentState::Resolved, reason, actions);
            }
            Some(false) => {}
        }

        let fallback = self.fallback_for(&plan.provider, plan.action);
        hooks.enter(
            IncidentState::SelfCorrecting,
            &match fallback {
                Some(action) => format!("verification failed; falling back to {action}"),
                None => "verification failed; no fallback available".to_string(),
            },
        )?;
        let Some(fallback) = fallback else {
            let reason = format!(
                "verification failed and {} offers no fallback for {}; escalate to a human",
                plan.provider, plan.action
            );
            return finish(hooks, IncidentState::Failed, reason, actions);
        };

        let corrective = match self
            .execute(&plan.provider, fallback, &plan.target, true, cancel)
            .await
        {
            Step::Done(result) => result,
            Step::Stopped(reason) => return finish(hooks, IncidentState::Failed, reason, actions),
        };
        hooks.record_action(&corrective)?;
        actions.push(corrective.clone());
        if !corrective.outcome.counts_as_executed() {
            let reason = format!("fallback {} failed: {}", fallback, corrective.message);
            return finish(hooks, IncidentState::Failed, reason, actions);
        }

        match self.settle_and_verify(incident_id, &corrective, cancel).await {
            None => finish(hooks, IncidentState::Failed, "aborted during verification".into(), actions),
            Some(true) => {
                let reason = format!("verification passed after fallback {fallback}");
                finish(hooks, IncidentState::Resolved, reason, actions)
            }
            Some(false) => {
                let reason = format!("verification failed after fallback {fallback}; escalate to a human");
                finish(hooks, IncidentState::Failed, reason, actions)
            }
        }
    }

    async fn execute(
        &self,
        provider: &Provider,
        action: ActionCommand,
        target: &str,
        fallback: bool,
        cancel: &mut CancelSignal,
    ) -> Step {
        if cancel.is_cancelled() {
            return Step::Stopped("aborted before dispatch".to_string());
        }
        let dispatched = tokio::select! {
            result = self.dispatcher.dispatch(provider, action, target) => result,
            () = cancel.cancelled() => return Step::Stopped("aborted during dispatch".to_string()),
        };
        match dispatched {
            Ok(mut result) => {
                result.fallback = fallback;
                Step::Done(result)
            }
            Err(e) => {
                tracing::warn!(provider = %provider, action = %action, target, error = %e, "dispatch rejected");
                Step::Stopped(format!("dispatch rejected: {e}"))
            }
        }
    }

    /// `None` when cancelled
    async fn settle_and_verify(
        &self,
        incident_id: IncidentId,
        result: &ActionResult,
        cancel: &mut CancelSignal,
    ) -> Option<bool> {
        tokio::select! {
            () = tokio::time::sleep(self.settle_delay) => {}
            () = cancel.cancelled() => return None,
        }
        let passed = tokio::select! {
            passed = self.probe.verify(incident_id, result) => passed,
            () = cancel.cancelled() => return None,
        };
        tracing::info!(
            incident = %incident_id,
            action = %result.action,
            fallback = result.fallback,
            passed,
            "verification probe"
        );
        Some(passed)
    }
}

fn finish(
    hooks: &dyn LifecycleHooks,
    state: IncidentState,
    reason: String,
    actions: Vec<ActionResult>,
) -> Result<SupervisionOutcome, OrchestratorError> {
    hooks.enter(state, &reason)?;
    Ok(SupervisionOutcome { state, reason, actions })
}
