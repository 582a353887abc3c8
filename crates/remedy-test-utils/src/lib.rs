//! Testing utilities for the remedy workspace
//!
//! Scripted collaborators, alarm fixtures and orchestrator setups shared by
//! the integration tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use remedy_audit::AuditEntry;
use remedy_core::plan::{PlanOrigin, RemediationPlan};
use remedy_core::planner::PlanningCollaborator;
use remedy_core::probe::VerificationProbe;
use remedy_core::provider::{simulated_fleet, FLEET_RESOURCES};
use remedy_core::{
    ActionCommand, ActionResult, AlarmPayload, ApprovalMode, IncidentId, IncidentState,
    Orchestrator, OrchestratorConfig, PlanningError, Provider,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Probe answering from a script; `default` once the script runs out
#[derive(Debug)]
pub struct ScriptedProbe {
    script: Mutex<VecDeque<bool>>,
    default: bool,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(script: &[bool], default: bool) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            default,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(healthy: bool) -> Self {
        Self::new(&[], healthy)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerificationProbe for ScriptedProbe {
    async fn verify(&self, _incident_id: IncidentId, _action: &ActionResult) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script.lock().pop_front().unwrap_or(self.default)
    }
}

/// Collaborator returning the same plan every time
#[derive(Debug, Clone)]
pub struct StaticPlanner(pub RemediationPlan);

#[async_trait]
impl PlanningCollaborator for StaticPlanner {
    async fn propose(&self, _alarm: &AlarmPayload) -> Result<RemediationPlan, PlanningError> {
        Ok(self.0.clone())
    }
}

/// Collaborator that is always unavailable
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingPlanner;

#[async_trait]
impl PlanningCollaborator for FailingPlanner {
    async fn propose(&self, _alarm: &AlarmPayload) -> Result<RemediationPlan, PlanningError> {
        Err(PlanningError::Unavailable("connection refused".to_string()))
    }
}

/// Collaborator that answers only after `delay`
#[derive(Debug, Clone)]
pub struct SlowPlanner {
    pub delay: Duration,
    pub plan: RemediationPlan,
}

#[async_trait]
impl PlanningCollaborator for SlowPlanner {
    async fn propose(&self, _alarm: &AlarmPayload) -> Result<RemediationPlan, PlanningError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.plan.clone())
    }
}

/// Collaborator replying with free text, parsed like a model response
#[derive(Debug, Clone)]
pub struct TextPlanner(pub String);

#[async_trait]
impl PlanningCollaborator for TextPlanner {
    async fn propose(&self, _alarm: &AlarmPayload) -> Result<RemediationPlan, PlanningError> {
        RemediationPlan::from_proposal_text(&self.0)
    }
}

/// Collaborator plan with confidence 0.9
pub fn collaborator_plan(action: ActionCommand, target: &str, provider: Provider) -> RemediationPlan {
    RemediationPlan::new(
        action,
        target,
        provider,
        0.9,
        "collaborator analysis",
        PlanOrigin::Collaborator,
    )
}

/// `HighErrorAlarm` on `checkout-api`, provider A
pub fn error_alarm() -> AlarmPayload {
    alarm_for("HighErrorAlarm", "checkout-api", "PROVIDER_A")
}

pub fn alarm_for(name: &str, target: &str, provider: &str) -> AlarmPayload {
    AlarmPayload::named(name)
        .with("provider", provider)
        .with("NewStateReason", "Threshold Crossed")
        .with_dimension("ServiceName", target)
}

/// Defaults with no settle delay
pub fn fast_config(mode: ApprovalMode) -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_approval_mode(mode)
        .with_settle_delay_ms(0)
}

/// Orchestrator over the simulated fleet
pub fn orchestrator(config: OrchestratorConfig, probe: Arc<dyn VerificationProbe>) -> Orchestrator {
    Orchestrator::builder(config)
        .capabilities(simulated_fleet(FLEET_RESOURCES))
        .probe(probe)
        .build()
        .unwrap()
}

/// Orchestrator over the simulated fleet with a planning collaborator
pub fn orchestrator_with_planner(
    config: OrchestratorConfig,
    probe: Arc<dyn VerificationProbe>,
    planner: Arc<dyn PlanningCollaborator>,
) -> Orchestrator {
    Orchestrator::builder(config)
        .capabilities(simulated_fleet(FLEET_RESOURCES))
        .probe(probe)
        .planner(planner)
        .build()
        .unwrap()
}

/// Poll until the incident has a pending approval request
pub async fn wait_for_pending(orchestrator: &Orchestrator, id: IncidentId) {
    for _ in 0..10_000 {
        if orchestrator.pending_approvals().iter().any(|r| r.incident_id == id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("incident {id} never reached approval");
}

/// Poll until the incident reaches `state`
pub async fn wait_for_state(orchestrator: &Orchestrator, id: IncidentId, state: IncidentState) {
    for _ in 0..10_000 {
        if orchestrator.snapshot(id).is_some_and(|i| i.state == state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("incident {id} never reached {state}");
}

/// Audit entries for one incident with the given action
pub fn entries_with_action<'a>(entries: &'a [AuditEntry], id: IncidentId, action: &str) -> Vec<&'a AuditEntry> {
    let resource = id.to_string();
    entries
        .iter()
        .filter(|e| e.resource == resource && e.action == action)
        .collect()
}
