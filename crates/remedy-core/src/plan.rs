//! Remediation plans
//!
//! A plan comes from the planning collaborator or the rule-based fallback and
//! is immutable once validated: [`ValidatedPlan::validate`] consumes it and the
//! supervisor accepts nothing else.

use crate::dispatch::Dispatcher;
use crate::error::{OrchestratorError, PlanningError};
use crate::types::{ActionCommand, Provider};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a plan came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrigin {
    /// Proposed by the planning collaborator
    Collaborator,
    /// Produced by the deterministic keyword rules
    RuleBased,
}

impl fmt::Display for PlanOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Collaborator => "collaborator",
            Self::RuleBased => "rule-based",
        })
    }
}

/// Proposed remediation for one incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationPlan {
    /// Action to perform
    pub action: ActionCommand,
    /// Resource to act on
    pub target: String,
    /// Provider hosting the target
    pub provider: Provider,
    /// Planner confidence in [0, 1]
    pub confidence: f64,
    /// Why this action
    pub rationale: String,
    /// Policy or runbook the plan cites
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_citation: Option<String>,
    /// Expected cost impact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_impact: Option<String>,
    /// Set only by validation
    #[serde(default)]
    pub validated: bool,
    /// Producer of the plan
    pub source: PlanOrigin,
}

const ACTION_KEYS: &[&str] = &["action", "command", "remediation_action", "action_command"];
const TARGET_KEYS: &[&str] = &["target", "resource", "resource_id", "target_resource"];
const PROVIDER_KEYS: &[&str] = &["provider", "cloud", "cloud_provider"];
const CONFIDENCE_KEYS: &[&str] = &["confidence", "confidence_score", "score"];
const RATIONALE_KEYS: &[&str] = &["rationale", "reasoning", "reason", "explanation"];
const POLICY_KEYS: &[&str] = &["policy_citation", "policy", "citation"];
const COST_KEYS: &[&str] = &["cost_impact", "cost", "estimated_cost"];

impl RemediationPlan {
    /// Create an unvalidated plan
    pub fn new(
        action: ActionCommand,
        target: impl Into<String>,
        provider: Provider,
        confidence: f64,
        rationale: impl Into<String>,
        source: PlanOrigin,
    ) -> Self {
        Self {
            action,
            target: target.into(),
            provider,
            confidence,
            rationale: rationale.into(),
            policy_citation: None,
            cost_impact: None,
            validated: false,
            source,
        }
    }

    /// Attach a policy citation
    #[must_use]
    pub fn with_policy_citation(mut self, citation: impl Into<String>) -> Self {
        self.policy_citation = Some(citation.into());
        self
    }

    /// Attach a cost estimate
    #[must_use]
    pub fn with_cost_impact(mut self, cost: impl Into<String>) -> Self {
        self.cost_impact = Some(cost.into());
        self
    }

    /// Parse a collaborator's textual proposal
    ///
    /// Accepts a JSON object, optionally wrapped in a Markdown code fence or
    /// surrounded by prose, and common field-name variants (`action` or
    /// `command`, `target` or `resource`, ...). A missing confidence is read
    /// as 0.
    ///
    /// # Errors
    /// Returns [`PlanningError::Json`] if no JSON object can be parsed and
    /// [`PlanningError::Malformed`] if a required field is missing or invalid.
    pub fn from_proposal_text(text: &str) -> Result<Self, PlanningError> {
        let body = extract_json_object(text)
            .ok_or_else(|| PlanningError::Malformed("no JSON object in proposal".to_string()))?;
        let value: serde_json::Value = serde_json::from_str(body)?;
        let obj = value
            .as_object()
            .ok_or_else(|| PlanningError::Malformed("proposal is not an object".to_string()))?;

        let field = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k)).filter(|v| !v.is_null());
        let text_field = |keys: &[&str]| {
            field(keys)
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let action = text_field(ACTION_KEYS)
            .ok_or_else(|| PlanningError::Malformed("missing action".to_string()))?
            .parse::<ActionCommand>()
            .map_err(PlanningError::Malformed)?;
        let target =
            text_field(TARGET_KEYS).ok_or_else(|| PlanningError::Malformed("missing target".to_string()))?;
        let provider = text_field(PROVIDER_KEYS)
            .map(Provider::from)
            .ok_or_else(|| PlanningError::Malformed("missing provider".to_string()))?;
        let confidence = match field(CONFIDENCE_KEYS) {
            None => 0.0,
            Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
            Some(serde_json::Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| PlanningError::Malformed(format!("confidence is not a number: {s}")))?,
            Some(other) => {
                return Err(PlanningError::Malformed(format!(
                    "confidence is not a number: {other}"
                )))
            }
        };

        let plan = Self {
            action,
            target,
            provider,
            confidence,
            rationale: text_field(RATIONALE_KEYS).unwrap_or_default(),
            policy_citation: text_field(POLICY_KEYS),
            cost_impact: text_field(COST_KEYS),
            validated: false,
            source: PlanOrigin::Collaborator,
        };
        plan.check_well_formed()?;
        Ok(plan)
    }

    /// Structural checks that do not depend on the provider tables
    ///
    /// # Errors
    /// Returns [`PlanningError::Malformed`] for an out-of-range confidence or
    /// an empty target.
    pub fn check_well_formed(&self) -> Result<(), PlanningError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(PlanningError::Malformed(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        check_target(&self.target)
    }

    /// One-line summary for logs and audit entries
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} on {} via {} (confidence {:.2}, {})",
            self.action, self.target, self.provider, self.confidence, self.source
        )
    }
}

/// Target naming rule shared by every plan producer
///
/// # Errors
/// Returns [`PlanningError::Malformed`] for an empty target or one containing
/// whitespace.
pub fn check_target(target: &str) -> Result<(), PlanningError> {
    if target.trim().is_empty() {
        return Err(PlanningError::Malformed("empty target".to_string()));
    }
    if target.chars().any(char::is_whitespace) {
        return Err(PlanningError::Malformed(format!(
            "target contains whitespace: {target:?}"
        )));
    }
    Ok(())
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// A plan that passed structural and policy validation
///
/// The only way to obtain one is [`ValidatedPlan::validate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedPlan {
    plan: RemediationPlan,
}

impl ValidatedPlan {
    /// Validate a plan against the dispatcher's capability table and vetoes
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Planning`] for structural problems and
    /// [`OrchestratorError::Dispatch`] for policy rejections (unsupported
    /// provider or action, veto).
    pub fn validate(mut plan: RemediationPlan, dispatcher: &Dispatcher) -> Result<Self, OrchestratorError> {
        plan.check_well_formed()?;
        dispatcher.preflight(&plan.provider, plan.action, &plan.target)?;
        plan.validated = true;
        Ok(Self { plan })
    }

    /// The validated plan
    #[inline]
    #[must_use]
    pub fn plan(&self) -> &RemediationPlan {
        &self.plan
    }

    /// Unwrap into the inner plan
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> RemediationPlan {
        self.plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{CapabilityTable, Dispatcher, VetoList, VetoRule};
    use crate::provider::SimulatedProvider;
    use std::sync::Arc;
    use std::time::Duration;

    fn dispatcher(veto: VetoList) -> Dispatcher {
        let mut table = CapabilityTable::new();
        Arc::new(SimulatedProvider::new(Provider::ProviderA)).register_into(&mut table);
        Dispatcher::new(table, Duration::from_secs(5)).with_veto(veto)
    }

    #[test]
    fn parses_fenced_proposal() {
        let text = "Here is my plan:\n```json\n{\"command\": \"restart\", \"resource\": \"checkout-fn\", \
                    \"cloud\": \"provider_a\", \"confidence\": \"0.82\", \"reasoning\": \"error spike\"}\n```";
        let plan = RemediationPlan::from_proposal_text(text).unwrap();
        assert_eq!(plan.action, ActionCommand::Restart);
        assert_eq!(plan.target, "checkout-fn");
        assert_eq!(plan.provider, Provider::ProviderA);
        assert!((plan.confidence - 0.82).abs() < f64::EPSILON);
        assert_eq!(plan.rationale, "error spike");
        assert_eq!(plan.source, PlanOrigin::Collaborator);
        assert!(!plan.validated);
    }

    #[test]
    fn rejects_malformed_proposals() {
        assert!(matches!(
            RemediationPlan::from_proposal_text("I would restart it"),
            Err(PlanningError::Malformed(_))
        ));
        assert!(matches!(
            RemediationPlan::from_proposal_text("{\"action\": }"),
            Err(PlanningError::Json(_))
        ));
        assert!(matches!(
            RemediationPlan::from_proposal_text(
                r#"{"action": "RESTART", "target": "x", "provider": "A", "confidence": 1.7}"#
            ),
            Err(PlanningError::Malformed(_))
        ));
        assert!(matches!(
            RemediationPlan::from_proposal_text(r#"{"action": "TELEPORT", "target": "x", "provider": "A"}"#),
            Err(PlanningError::Malformed(_))
        ));
        assert!(matches!(
            RemediationPlan::from_proposal_text(r#"{"action": "RESTART", "provider": "A"}"#),
            Err(PlanningError::Malformed(_))
        ));
    }

    #[test]
    fn nan_confidence_is_malformed() {
        let plan = RemediationPlan::new(
            ActionCommand::Restart,
            "fn",
            Provider::ProviderA,
            f64::NAN,
            "",
            PlanOrigin::Collaborator,
        );
        assert!(plan.check_well_formed().is_err());
    }

    #[test]
    fn validation_marks_plan() {
        let plan = RemediationPlan::new(
            ActionCommand::IncreaseMemory,
            "orders-fn",
            Provider::ProviderA,
            0.9,
            "oom",
            PlanOrigin::Collaborator,
        );
        let validated = ValidatedPlan::validate(plan, &dispatcher(VetoList::default())).unwrap();
        assert!(validated.plan().validated);
    }

    #[test]
    fn validation_surfaces_policy_errors() {
        let unknown = RemediationPlan::new(
            ActionCommand::Restart,
            "fn",
            Provider::from("UNKNOWN"),
            0.9,
            "",
            PlanOrigin::Collaborator,
        );
        let err = ValidatedPlan::validate(unknown, &dispatcher(VetoList::default())).unwrap_err();
        assert!(err.is_policy_error());

        let vetoed = RemediationPlan::new(
            ActionCommand::Rollback,
            "payments-api",
            Provider::ProviderA,
            0.9,
            "",
            PlanOrigin::Collaborator,
        );
        let veto = VetoList::new(vec![VetoRule::for_action(ActionCommand::Rollback, "payments-*")]);
        let err = ValidatedPlan::validate(vetoed, &dispatcher(veto)).unwrap_err();
        assert!(err.is_policy_error());
    }
}
