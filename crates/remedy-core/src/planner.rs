//! Plan producers
//!
//! The planning collaborator (typically LLM-backed) is external; the engine
//! only consumes its proposal. [`RuleBasedPlanner`] is the deterministic
//! fallback used whenever the collaborator is absent, fails, times out, or
//! returns something malformed.

use crate::error::PlanningError;
use crate::plan::{check_target, PlanOrigin, RemediationPlan};
use crate::types::{ActionCommand, AlarmPayload, Provider};
use async_trait::async_trait;

/// External producer of remediation plans
#[async_trait]
pub trait PlanningCollaborator: Send + Sync {
    /// Propose a plan for an alarm
    ///
    /// Called under the configured planning timeout.
    async fn propose(&self, alarm: &AlarmPayload) -> Result<RemediationPlan, PlanningError>;
}

/// Confidence assigned to keyword-derived plans
pub const RULE_BASED_CONFIDENCE: f64 = 0.5;

/// Keyword rules, checked in order against the lowercased alarm name
const RULES: &[(&[&str], ActionCommand)] = &[
    (&["latency", "timeout"], ActionCommand::IncreaseTimeout),
    (&["error", "failure"], ActionCommand::Restart),
    (&["memory"], ActionCommand::IncreaseMemory),
];

/// Deterministic keyword-driven planner
#[derive(Debug, Clone)]
pub struct RuleBasedPlanner {
    default_provider: Provider,
    default_target: String,
}

impl RuleBasedPlanner {
    /// Planner using the given defaults when the alarm names no provider or target
    pub fn new(default_provider: Provider, default_target: impl Into<String>) -> Self {
        Self {
            default_provider,
            default_target: default_target.into(),
        }
    }

    /// Choose the action for an alarm name
    #[must_use]
    pub fn action_for(alarm_name: &str) -> (ActionCommand, Option<&'static str>) {
        let name = alarm_name.to_lowercase();
        RULES
            .iter()
            .find_map(|(keywords, action)| {
                keywords
                    .iter()
                    .find(|k| name.contains(*k))
                    .map(|k| (*action, Some(*k)))
            })
            .unwrap_or((ActionCommand::LogOnly, None))
    }

    /// Build the fallback plan
    #[must_use]
    pub fn plan(&self, alarm: &AlarmPayload) -> RemediationPlan {
        let name = alarm.name();
        let (action, keyword) = Self::action_for(&name);
        let mut rationale = match keyword {
            Some(k) => format!("rule-based: alarm {name} matches '{k}'"),
            None => format!("rule-based: no rule matches alarm {name}; logging only"),
        };
        let target = match alarm.target() {
            Some(t) if check_target(&t).is_ok() => t,
            Some(t) => {
                rationale.push_str(&format!(
                    "; alarm target {t:?} is malformed, using {}",
                    self.default_target
                ));
                self.default_target.clone()
            }
            None => self.default_target.clone(),
        };
        RemediationPlan::new(
            action,
            target,
            alarm.provider().unwrap_or_else(|| self.default_provider.clone()),
            RULE_BASED_CONFIDENCE,
            rationale,
            PlanOrigin::RuleBased,
        )
    }
}

#[async_trait]
impl PlanningCollaborator for RuleBasedPlanner {
    async fn propose(&self, alarm: &AlarmPayload) -> Result<RemediationPlan, PlanningError> {
        Ok(self.plan(alarm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_rules_in_order() {
        assert_eq!(RuleBasedPlanner::action_for("HighLatencyAlarm").0, ActionCommand::IncreaseTimeout);
        assert_eq!(RuleBasedPlanner::action_for("LambdaTimeouts").0, ActionCommand::IncreaseTimeout);
        assert_eq!(RuleBasedPlanner::action_for("HighErrorAlarm").0, ActionCommand::Restart);
        assert_eq!(RuleBasedPlanner::action_for("DeployFailure").0, ActionCommand::Restart);
        assert_eq!(RuleBasedPlanner::action_for("MEMORY_PRESSURE").0, ActionCommand::IncreaseMemory);
        assert_eq!(RuleBasedPlanner::action_for("DiskQueueDepth").0, ActionCommand::LogOnly);
        // Latency wins over error when both appear
        assert_eq!(RuleBasedPlanner::action_for("LatencyErrorCombo").0, ActionCommand::IncreaseTimeout);
    }

    #[test]
    fn plan_uses_alarm_then_defaults() {
        let planner = RuleBasedPlanner::new(Provider::ProviderB, "default-svc");

        let bare = planner.plan(&AlarmPayload::named("HighErrorAlarm"));
        assert_eq!(bare.action, ActionCommand::Restart);
        assert_eq!(bare.target, "default-svc");
        assert_eq!(bare.provider, Provider::ProviderB);
        assert_eq!(bare.source, PlanOrigin::RuleBased);
        assert!(bare.rationale.contains("'error'"));
        assert!(bare.check_well_formed().is_ok());

        let rich = planner.plan(
            &AlarmPayload::named("MemoryAlarm")
                .with("provider", "PROVIDER_C")
                .with_dimension("FunctionName", "thumbnailer"),
        );
        assert_eq!(rich.target, "thumbnailer");
        assert_eq!(rich.provider, Provider::ProviderC);
    }

    #[test]
    fn malformed_alarm_target_falls_back_to_default() {
        let planner = RuleBasedPlanner::new(Provider::ProviderA, "default-svc");
        let plan = planner.plan(&AlarmPayload::named("HighErrorAlarm").with_dimension("ServiceName", "checkout api"));
        assert_eq!(plan.target, "default-svc");
        assert!(plan.rationale.contains("\"checkout api\" is malformed"), "{}", plan.rationale);
        assert!(plan.check_well_formed().is_ok());
    }

    #[tokio::test]
    async fn rule_based_planner_is_a_collaborator() {
        let planner = RuleBasedPlanner::new(Provider::ProviderA, "svc");
        let plan = planner.propose(&AlarmPayload::named("Whatever")).await.unwrap();
        assert_eq!(plan.action, ActionCommand::LogOnly);
    }
}
