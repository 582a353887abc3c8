//! Incident lifecycle controller
//!
//! [`Orchestrator`] owns every incident. Each incident is driven by its own
//! task through planning, approval and supervision; incidents never share a
//! lock beyond the audit chain's append mutex.
//!
//! All state changes go through `transition`, which validates against the
//! state machine and appends one audit entry per change.

use crate::approval::{ApprovalGate, ApprovalRequest, Decision};
use crate::cancel::{CancelHandle, CancelSignal};
use crate::config::OrchestratorConfig;
use crate::dispatch::{CapabilityTable, Dispatcher};
use crate::error::{LifecycleError, OrchestratorError, PlanningError};
use crate::plan::{RemediationPlan, ValidatedPlan};
use crate::planner::{PlanningCollaborator, RuleBasedPlanner};
use crate::probe::{AlwaysHealthy, VerificationProbe};
use crate::state_machine::validate_transition;
use crate::supervisor::{LifecycleHooks, Supervisor, MAX_ACTIONS_PER_INCIDENT};
use crate::types::{ActionResult, AlarmPayload, Incident, IncidentId, IncidentSnapshot, IncidentState, StateChange};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use remedy_audit::{
    AuditChain, AuditEntry, AuditEvent, AuditSink, ChainVerification, JsonlFileSink, RecentEvents, TracingSink,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const ORCHESTRATOR: &str = "orchestrator";
const PLANNER: &str = "planner";
const DISPATCHER: &str = "dispatcher";

/// Aggregate view for the query surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Incidents known
    pub total_incidents: usize,
    /// Incidents not yet terminal
    pub active_incidents: usize,
    /// Incident count per state
    pub by_state: BTreeMap<IncidentState, usize>,
    /// Approval requests waiting on a human
    pub pending_approvals: usize,
    /// Entries in the audit chain
    pub audit_entries: usize,
    /// Result of verifying the chain
    pub audit_verification: ChainVerification,
}

/// Everything recorded about one incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    /// Incident snapshot
    pub incident: IncidentSnapshot,
    /// The incident's audit entries, in chain order
    pub audit_trail: Vec<AuditEntry>,
}

impl IncidentReport {
    /// Plain-text rendering for operators
    #[must_use]
    pub fn summary(&self) -> String {
        let incident = &self.incident;
        let mut out = String::new();
        let _ = writeln!(out, "Incident {} ({})", incident.id, incident.alarm_name);
        let _ = writeln!(out, "  severity: {:?}", incident.severity);
        let _ = writeln!(out, "  state:    {}", incident.state);
        if let Some(reason) = &incident.reason {
            let _ = writeln!(out, "  reason:   {reason}");
        }
        if let Some(plan) = &incident.plan {
            let _ = writeln!(out, "  plan:     {}", plan.summary());
        }
        for (n, action) in incident.actions.iter().enumerate() {
            let label = if action.fallback { "fallback" } else { "primary" };
            let _ = writeln!(out, "  action {} ({label}): {}", n + 1, action.describe());
        }
        let path: Vec<String> = incident.path().iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "  path:     {}", path.join(" -> "));
        let _ = writeln!(out, "  audit:    {} entries", self.audit_trail.len());
        out
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    capabilities: CapabilityTable,
    probe: Arc<dyn VerificationProbe>,
    planner: Option<Arc<dyn PlanningCollaborator>>,
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .field("planner", &self.planner.is_some())
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

impl OrchestratorBuilder {
    /// Set the capability table
    #[must_use]
    pub fn capabilities(mut self, table: CapabilityTable) -> Self {
        self.capabilities = table;
        self
    }

    /// Set the verification probe (default: [`AlwaysHealthy`])
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn VerificationProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Set the planning collaborator (default: rule-based only)
    #[must_use]
    pub fn planner(mut self, planner: Arc<dyn PlanningCollaborator>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Add an audit sink
    #[must_use]
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Validate the configuration and build
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the audit log file
    /// cannot be opened
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let config = self.config;
        config.validate()?;

        let recent = Arc::new(RecentEvents::new(config.recent_events_capacity));
        let mut audit = AuditChain::new()
            .with_sink(Arc::clone(&recent) as Arc<dyn AuditSink>)
            .with_sink(Arc::new(TracingSink));
        let file_sink = match &config.audit_log_path {
            Some(path) => Some(Arc::new(JsonlFileSink::open(path)?)),
            None => None,
        };
        if let Some(sink) = &file_sink {
            audit = audit.with_sink(Arc::clone(sink) as Arc<dyn AuditSink>);
        }
        for sink in self.sinks {
            audit = audit.with_sink(sink);
        }

        let dispatcher = Arc::new(
            Dispatcher::new(self.capabilities, config.dispatch_timeout()).with_veto(config.veto_list()),
        );
        let supervisor = Supervisor::new(Arc::clone(&dispatcher), self.probe, config.settle_delay());
        let gate = ApprovalGate::new(config.approval_mode, config.approval_timeout());
        let fallback_planner = RuleBasedPlanner::new(config.default_provider.clone(), config.default_target.clone());

        tracing::info!(
            mode = %config.approval_mode,
            providers = dispatcher.table().providers().len(),
            collaborator = self.planner.is_some(),
            "orchestrator ready"
        );

        Ok(Orchestrator {
            shared: Arc::new(Shared {
                config,
                audit,
                recent,
                file_sink,
                gate,
                dispatcher,
                supervisor,
                planner: self.planner,
                fallback_planner,
                incidents: DashMap::new(),
                cancels: DashMap::new(),
                tasks: Mutex::new(HashMap::new()),
                in_flight: Arc::new(watch::channel(0).0),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }
}

/// Incident remediation orchestrator
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("incidents", &self.shared.incidents.len())
            .field("audit", &self.shared.audit)
            .finish_non_exhaustive()
    }
}

struct Shared {
    config: OrchestratorConfig,
    audit: AuditChain,
    recent: Arc<RecentEvents>,
    file_sink: Option<Arc<JsonlFileSink>>,
    gate: ApprovalGate,
    dispatcher: Arc<Dispatcher>,
    supervisor: Supervisor,
    planner: Option<Arc<dyn PlanningCollaborator>>,
    fallback_planner: RuleBasedPlanner,
    incidents: DashMap<IncidentId, Incident>,
    cancels: DashMap<IncidentId, CancelHandle>,
    tasks: Mutex<HashMap<IncidentId, JoinHandle<()>>>,
    /// Incidents between `register` and the end of `drive`, however driven
    in_flight: Arc<watch::Sender<usize>>,
    shutting_down: AtomicBool,
}

/// Counts one incident as in flight until dropped
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn enter(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl Orchestrator {
    /// Start building an orchestrator
    #[must_use]
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            capabilities: CapabilityTable::new(),
            probe: Arc::new(AlwaysHealthy),
            planner: None,
            sinks: Vec::new(),
        }
    }

    /// Effective configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    /// Accept an alarm and drive it on a background task
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::ShuttingDown`] after [`Orchestrator::shutdown`].
    pub fn ingest(&self, alarm: AlarmPayload) -> Result<IncidentId, OrchestratorError> {
        let (id, signal, in_flight) = self.shared.register(alarm)?;
        let task = tokio::spawn(Arc::clone(&self.shared).drive(id, signal, in_flight));
        let mut tasks = self.shared.tasks.lock();
        // Nobody waited on these; their incidents are already terminal
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(id, task);
        Ok(id)
    }

    /// Accept an alarm and drive it to a terminal state on the current task
    ///
    /// # Errors
    /// Returns [`OrchestratorError::ShuttingDown`] after [`Orchestrator::shutdown`].
    pub async fn handle_alarm(&self, alarm: AlarmPayload) -> Result<IncidentSnapshot, OrchestratorError> {
        let (id, signal, in_flight) = self.shared.register(alarm)?;
        Arc::clone(&self.shared).drive(id, signal, in_flight).await;
        self.snapshot(id)
            .ok_or_else(|| LifecycleError::UnknownIncident(id).into())
    }

    /// Wait for an ingested incident to finish
    pub async fn wait(&self, id: IncidentId) -> Option<IncidentSnapshot> {
        let task = self.shared.tasks.lock().remove(&id);
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(incident = %id, error = %e, "incident task panicked");
            }
        }
        self.snapshot(id)
    }

    /// Wait for every ingested incident to finish
    pub async fn wait_all(&self) -> Vec<IncidentSnapshot> {
        let tasks: Vec<(IncidentId, JoinHandle<()>)> = self.shared.tasks.lock().drain().collect();
        for (id, task) in tasks {
            if let Err(e) = task.await {
                tracing::error!(incident = %id, error = %e, "incident task panicked");
            }
        }
        self.incidents()
    }

    /// Approve a pending plan; `false` if nothing was pending
    pub fn approve(&self, id: IncidentId) -> bool {
        let resolved = self.shared.gate.approve(id);
        tracing::info!(incident = %id, resolved, "operator approval");
        resolved
    }

    /// Deny a pending plan; `false` if nothing was pending
    pub fn deny(&self, id: IncidentId) -> bool {
        let resolved = self.shared.gate.deny(id);
        tracing::info!(incident = %id, resolved, "operator denial");
        resolved
    }

    /// Abort an active incident
    ///
    /// A pending approval is released as a timeout (→ `Rejected`); later
    /// stages end in `Failed`. Returns `false` if the incident is unknown or
    /// already finished.
    pub fn abort(&self, id: IncidentId) -> bool {
        let Some(handle) = self.shared.cancels.get(&id) else {
            return false;
        };
        handle.cancel();
        drop(handle);
        self.shared.gate.cancel(id);
        tracing::info!(incident = %id, "abort requested");
        true
    }

    /// Refuse new incidents, release every suspension point and wait for all
    /// incidents to finish
    ///
    /// Covers incidents driven by [`Orchestrator::handle_alarm`] on other
    /// tasks as well as ingested ones. Returns once the audit file, if any,
    /// holds every entry.
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        for handle in self.shared.cancels.iter() {
            handle.value().cancel();
        }
        let released = self.shared.gate.cancel_all();
        tracing::info!(released_approvals = released, "shutting down");
        self.wait_all().await;

        let mut in_flight = self.shared.in_flight.subscribe();
        if in_flight.wait_for(|n| *n == 0).await.is_err() {
            tracing::warn!("in-flight counter closed during shutdown");
        }
        self.flush_audit().await;
    }

    /// Wait until the audit file, if configured, holds every entry so far
    pub async fn flush_audit(&self) {
        if let Some(sink) = &self.shared.file_sink {
            sink.flush().await;
        }
    }

    /// Snapshot of one incident
    #[must_use]
    pub fn snapshot(&self, id: IncidentId) -> Option<IncidentSnapshot> {
        self.shared.incidents.get(&id).map(|i| i.clone())
    }

    /// Snapshots of every incident, oldest first
    #[must_use]
    pub fn incidents(&self) -> Vec<IncidentSnapshot> {
        let mut all: Vec<Incident> = self.shared.incidents.iter().map(|i| i.clone()).collect();
        all.sort_by_key(|i| i.id);
        all
    }

    /// Full audit chain
    #[must_use]
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.shared.audit.entries()
    }

    /// Bounded view of the most recent audit entries
    #[must_use]
    pub fn recent_events(&self) -> Vec<AuditEntry> {
        self.shared.recent.snapshot()
    }

    /// Verify the audit chain
    #[must_use]
    pub fn verify_audit(&self) -> ChainVerification {
        self.shared.audit.verify()
    }

    /// Approval requests waiting on a human
    #[must_use]
    pub fn pending_approvals(&self) -> Vec<ApprovalRequest> {
        self.shared.gate.pending()
    }

    /// Wait for the oldest approval request that needs a human
    pub async fn next_pending_approval(&self) -> ApprovalRequest {
        self.shared.gate.next_pending().await
    }

    /// Aggregate status
    #[must_use]
    pub fn status(&self) -> StatusReport {
        let incidents = self.incidents();
        let mut by_state = BTreeMap::new();
        for incident in &incidents {
            *by_state.entry(incident.state).or_insert(0) += 1;
        }
        StatusReport {
            total_incidents: incidents.len(),
            active_incidents: incidents.iter().filter(|i| !i.is_finished()).count(),
            by_state,
            pending_approvals: self.shared.gate.pending().len(),
            audit_entries: self.shared.audit.len(),
            audit_verification: self.shared.audit.verify(),
        }
    }

    /// Incident snapshot plus its audit trail
    #[must_use]
    pub fn report(&self, id: IncidentId) -> Option<IncidentReport> {
        let incident = self.snapshot(id)?;
        Some(IncidentReport {
            audit_trail: self.shared.audit.entries_for(&id.to_string()),
            incident,
        })
    }
}

impl Shared {
    fn register(&self, alarm: AlarmPayload) -> Result<(IncidentId, CancelSignal, InFlight), OrchestratorError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ShuttingDown);
        }
        let in_flight = InFlight::enter(&self.in_flight);
        let incident = Incident::detected(alarm);
        let id = incident.id;
        let detail = format!("{} (severity {:?})", incident.history[0].detail, incident.severity);
        let (handle, signal) = CancelHandle::pair();

        self.cancels.insert(id, handle);
        self.incidents.insert(id, incident);
        // Shutdown may have started between the check and the insert
        if self.shutting_down.load(Ordering::SeqCst) {
            if let Some(handle) = self.cancels.get(&id) {
                handle.cancel();
            }
        }

        self.record(ORCHESTRATOR, id, "detected", detail)?;
        tracing::info!(incident = %id, "incident detected");
        Ok((id, signal, in_flight))
    }

    async fn drive(self: Arc<Self>, id: IncidentId, mut cancel: CancelSignal, in_flight: InFlight) {
        if let Err(e) = self.run_lifecycle(id, &mut cancel).await {
            tracing::error!(incident = %id, error = %e, "lifecycle error");
            self.force_terminal(id, &format!("internal error: {e}"));
        }
        self.cancels.remove(&id);
        drop(in_flight);
    }

    async fn run_lifecycle(&self, id: IncidentId, cancel: &mut CancelSignal) -> Result<(), OrchestratorError> {
        self.transition(id, IncidentState::Planning, "requesting remediation plan")?;
        let alarm = self.with_incident(id, |i| i.alarm.clone())?;

        let proposed = tokio::select! {
            plan = self.obtain_plan(id, &alarm) => plan?,
            () = cancel.cancelled() => {
                return self.transition(id, IncidentState::Failed, "aborted during planning");
            }
        };

        let summary = proposed.summary();
        let validated = match ValidatedPlan::validate(proposed, &self.dispatcher) {
            Ok(validated) => validated,
            Err(e) => {
                tracing::warn!(incident = %id, plan = %summary, error = %e, "plan rejected");
                self.record(PLANNER, id, "plan_rejected", format!("{summary}: {e}"))?;
                return self.transition(id, IncidentState::Failed, &format!("plan rejected: {e}"));
            }
        };
        self.with_incident_mut(id, |i| i.plan = Some(validated.plan().clone()))?;
        self.record(PLANNER, id, "plan", summary.clone())?;

        self.transition(
            id,
            IncidentState::AwaitingApproval,
            &format!("{summary} submitted for approval ({} mode)", self.gate.mode()),
        )?;
        let decision = if cancel.is_cancelled() {
            Decision::timed_out("approval cancelled: incident aborted")
        } else {
            tokio::select! {
                decision = self.gate.request_approval(id, validated.plan()) => decision?,
                () = cancel.cancelled() => Decision::timed_out("approval cancelled: incident aborted"),
            }
        };
        if !decision.approved {
            return self.transition(
                id,
                IncidentState::Rejected,
                &format!("{} ({})", decision.detail, decision.reason),
            );
        }
        self.transition(
            id,
            IncidentState::Executing,
            &format!("{} ({}); executing {}", decision.detail, decision.reason, validated.plan().action),
        )?;

        let hooks = IncidentHooks { shared: self, id };
        let outcome = self.supervisor.run(id, &validated, &hooks, cancel).await?;
        tracing::info!(
            incident = %id,
            state = %outcome.state,
            actions = outcome.actions.len(),
            "{}",
            outcome.reason
        );
        Ok(())
    }

    async fn obtain_plan(&self, id: IncidentId, alarm: &AlarmPayload) -> Result<RemediationPlan, OrchestratorError> {
        let Some(planner) = &self.planner else {
            tracing::debug!(incident = %id, "no planning collaborator; using rule-based plan");
            self.record(PLANNER, id, "planning_fallback", "no planning collaborator configured")?;
            return Ok(self.fallback_planner.plan(alarm));
        };

        let timeout = self.config.planning_timeout();
        let failure: PlanningError = match tokio::time::timeout(timeout, planner.propose(alarm)).await {
            Ok(Ok(plan)) => match plan.check_well_formed() {
                Ok(()) => return Ok(plan),
                Err(e) => e,
            },
            Ok(Err(e)) => e,
            Err(_) => PlanningError::Timeout {
                after_secs: timeout.as_secs(),
            },
        };

        tracing::warn!(incident = %id, error = %failure, "planning collaborator failed; using rule-based plan");
        self.record(PLANNER, id, "planning_fallback", failure.to_string())?;
        Ok(self.fallback_planner.plan(alarm))
    }

    fn transition(&self, id: IncidentId, to: IncidentState, detail: &str) -> Result<(), OrchestratorError> {
        let from = {
            let mut incident = self
                .incidents
                .get_mut(&id)
                .ok_or(LifecycleError::UnknownIncident(id))?;
            let from = incident.state;
            validate_transition(from, to)?;
            let now = Utc::now();
            incident.state = to;
            incident.history.push(StateChange {
                state: to,
                at: now,
                detail: detail.to_string(),
            });
            if to.is_terminal() {
                incident.resolved_at = Some(now);
                incident.reason = Some(detail.to_string());
            }
            from
        };

        self.record(ORCHESTRATOR, id, "transition", format!("{from} -> {to}: {detail}"))?;
        if to.is_terminal() {
            tracing::info!(incident = %id, from = %from, to = %to, "{detail}");
        } else {
            tracing::debug!(incident = %id, from = %from, to = %to, "{detail}");
        }
        Ok(())
    }

    /// Last resort after an internal error: reach some terminal state
    fn force_terminal(&self, id: IncidentId, reason: &str) {
        let Some(state) = self.incidents.get(&id).map(|i| i.state) else {
            return;
        };
        let target = match state {
            s if s.is_terminal() => return,
            IncidentState::AwaitingApproval => IncidentState::Rejected,
            IncidentState::Detected => {
                if let Err(e) = self.transition(id, IncidentState::Planning, reason) {
                    tracing::error!(incident = %id, error = %e, "cannot leave DETECTED");
                    return;
                }
                IncidentState::Failed
            }
            _ => IncidentState::Failed,
        };
        if let Err(e) = self.transition(id, target, reason) {
            tracing::error!(incident = %id, error = %e, "cannot finish incident");
        }
    }

    fn record(
        &self,
        actor: &str,
        id: IncidentId,
        action: &str,
        result: impl Into<String>,
    ) -> Result<(), OrchestratorError> {
        self.audit
            .append(AuditEvent::new(actor, id.to_string(), action, result))?;
        Ok(())
    }

    fn with_incident<T>(&self, id: IncidentId, f: impl FnOnce(&Incident) -> T) -> Result<T, LifecycleError> {
        self.incidents
            .get(&id)
            .map(|i| f(&*i))
            .ok_or(LifecycleError::UnknownIncident(id))
    }

    fn with_incident_mut<T>(&self, id: IncidentId, f: impl FnOnce(&mut Incident) -> T) -> Result<T, LifecycleError> {
        self.incidents
            .get_mut(&id)
            .map(|mut i| f(&mut *i))
            .ok_or(LifecycleError::UnknownIncident(id))
    }
}

struct IncidentHooks<'a> {
    shared: &'a Shared,
    id: IncidentId,
}

impl LifecycleHooks for IncidentHooks<'_> {
    fn enter(&self, state: IncidentState, detail: &str) -> Result<(), OrchestratorError> {
        self.shared.transition(self.id, state, detail)
    }

    fn record_action(&self, result: &ActionResult) -> Result<(), OrchestratorError> {
        let count = self.shared.with_incident_mut(self.id, |i| {
            i.actions.push(result.clone());
            i.actions.len()
        })?;
        debug_assert!(count <= MAX_ACTIONS_PER_INCIDENT);
        let label = if result.fallback { "fallback" } else { "primary" };
        self.shared
            .record(DISPATCHER, self.id, "dispatch", format!("{label}: {}", result.describe()))
    }
}
