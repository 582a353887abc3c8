//! Human-in-the-loop approval gate
//!
//! In `Autonomous` mode every plan is approved immediately. In `Copilot` mode
//! a pending request is registered per incident and the caller waits for
//! `approve`/`deny` or the deadline, whichever comes first.
//!
//! Whoever removes a request from the registry resolves it, so each request
//! is resolved exactly once: by the operator, by the deadline, or by
//! cancellation.

use crate::error::ApprovalError;
use crate::plan::RemediationPlan;
use crate::types::IncidentId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;

/// Default time a human has to decide
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Whether plans need a human decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Approve every plan immediately
    #[default]
    Autonomous,
    /// Wait for a human
    Copilot,
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Autonomous => "autonomous",
            Self::Copilot => "copilot",
        })
    }
}

impl FromStr for ApprovalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "autonomous" | "auto" => Ok(Self::Autonomous),
            "copilot" | "hitl" | "manual" => Ok(Self::Copilot),
            other => Err(format!("unknown approval mode: {other}")),
        }
    }
}

/// State of an approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    /// Waiting for a decision
    Pending,
    /// Operator approved
    Approved,
    /// Operator denied
    Denied,
    /// No decision in time (or cancelled)
    TimedOut,
}

/// Who or what made a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    /// Autonomous mode
    Auto,
    /// Operator
    Human,
    /// Deadline passed, or the request was cancelled
    Timeout,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "AUTO",
            Self::Human => "HUMAN",
            Self::Timeout => "TIMEOUT",
        })
    }
}

/// Outcome of an approval request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether execution may proceed
    pub approved: bool,
    /// Decider
    pub reason: DecisionReason,
    /// Final request status
    pub status: ApprovalStatus,
    /// Human-readable detail
    pub detail: String,
}

impl Decision {
    fn auto() -> Self {
        Self {
            approved: true,
            reason: DecisionReason::Auto,
            status: ApprovalStatus::Approved,
            detail: "approved (autonomous mode)".to_string(),
        }
    }

    fn human(approved: bool) -> Self {
        Self {
            approved,
            reason: DecisionReason::Human,
            status: if approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Denied
            },
            detail: if approved {
                "approved by operator".to_string()
            } else {
                "denied by operator".to_string()
            },
        }
    }

    pub(crate) fn timed_out(detail: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: DecisionReason::Timeout,
            status: ApprovalStatus::TimedOut,
            detail: detail.into(),
        }
    }
}

/// A pending (or resolved) request for approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Incident awaiting approval
    pub incident_id: IncidentId,
    /// Plan snapshot shown to the operator
    pub plan: RemediationPlan,
    /// Status
    pub status: ApprovalStatus,
    /// When the request was registered
    pub created_at: DateTime<Utc>,
    /// When it times out
    pub deadline: DateTime<Utc>,
}

#[derive(Debug)]
struct PendingApproval {
    token: u64,
    request: ApprovalRequest,
    deadline: Instant,
    responder: oneshot::Sender<Decision>,
}

/// Approval gate
#[derive(Debug)]
pub struct ApprovalGate {
    mode: ApprovalMode,
    timeout: Duration,
    pending: Mutex<HashMap<IncidentId, PendingApproval>>,
    registered: Notify,
    next_token: AtomicU64,
}

impl ApprovalGate {
    /// Create a gate
    #[must_use]
    pub fn new(mode: ApprovalMode, timeout: Duration) -> Self {
        Self {
            mode,
            timeout,
            pending: Mutex::new(HashMap::new()),
            registered: Notify::new(),
            next_token: AtomicU64::new(0),
        }
    }

    /// Configured mode
    #[inline]
    #[must_use]
    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    /// Configured timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask for approval and wait for the decision
    ///
    /// Returns immediately in autonomous mode. In copilot mode waits until
    /// the operator decides, the deadline passes, or the request is cancelled.
    ///
    /// # Errors
    /// Returns [`ApprovalError::AlreadyPending`] if the incident already has a
    /// pending request.
    pub async fn request_approval(
        &self,
        incident_id: IncidentId,
        plan: &RemediationPlan,
    ) -> Result<Decision, ApprovalError> {
        if self.mode == ApprovalMode::Autonomous {
            return Ok(Decision::auto());
        }

        let (tx, mut rx) = oneshot::channel();
        let deadline = Instant::now() + self.timeout;
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&incident_id) {
                return Err(ApprovalError::AlreadyPending(incident_id));
            }
            let now = Utc::now();
            let request = ApprovalRequest {
                incident_id,
                plan: plan.clone(),
                status: ApprovalStatus::Pending,
                created_at: now,
                deadline: chrono::Duration::from_std(self.timeout)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            };
            pending.insert(
                incident_id,
                PendingApproval {
                    token,
                    request,
                    deadline,
                    responder: tx,
                },
            );
        }
        let _guard = Registration {
            gate: self,
            incident_id,
            token,
        };
        self.registered.notify_waiters();

        tracing::info!(
            incident = %incident_id,
            plan = %plan.summary(),
            timeout_secs = self.timeout.as_secs(),
            "awaiting approval"
        );

        let waited = tokio::time::timeout_at(deadline, &mut rx).await;
        let decision = match waited {
            Ok(received) => received.unwrap_or_else(|_| Decision::timed_out("approval channel closed")),
            Err(_) => self.expire(incident_id, rx).await,
        };

        tracing::info!(
            incident = %incident_id,
            approved = decision.approved,
            reason = %decision.reason,
            "{}",
            decision.detail
        );
        Ok(decision)
    }

    async fn expire(&self, incident_id: IncidentId, rx: oneshot::Receiver<Decision>) -> Decision {
        let claimed = self.pending.lock().remove(&incident_id).is_some();
        if claimed {
            return Decision::timed_out(format!(
                "no decision within {}s",
                self.timeout.as_secs()
            ));
        }
        // A resolver removed the entry first and is about to send
        rx.await
            .unwrap_or_else(|_| Decision::timed_out("approval channel closed"))
    }

    /// Approve a pending request; `false` if there was none
    pub fn approve(&self, incident_id: IncidentId) -> bool {
        self.resolve(incident_id, Decision::human(true))
    }

    /// Deny a pending request; `false` if there was none
    pub fn deny(&self, incident_id: IncidentId) -> bool {
        self.resolve(incident_id, Decision::human(false))
    }

    fn resolve(&self, incident_id: IncidentId, decision: Decision) -> bool {
        let Some(pending) = self.pending.lock().remove(&incident_id) else {
            tracing::debug!(incident = %incident_id, "no pending approval; decision ignored");
            return false;
        };
        if Instant::now() >= pending.deadline {
            tracing::info!(incident = %incident_id, "decision arrived after deadline");
            let _ = pending
                .responder
                .send(Decision::timed_out("decision arrived after deadline"));
            return false;
        }
        let _ = pending.responder.send(decision);
        true
    }

    /// Release a pending request as timed out (incident aborted)
    pub fn cancel(&self, incident_id: IncidentId) -> bool {
        let Some(pending) = self.pending.lock().remove(&incident_id) else {
            return false;
        };
        let _ = pending
            .responder
            .send(Decision::timed_out("approval cancelled: incident aborted"));
        true
    }

    /// Release every pending request (shutdown)
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingApproval> = self.pending.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            let _ = pending
                .responder
                .send(Decision::timed_out("approval cancelled: shutting down"));
        }
        count
    }

    /// Snapshot of pending requests, oldest first
    #[must_use]
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<ApprovalRequest> =
            self.pending.lock().values().map(|p| p.request.clone()).collect();
        requests.sort_by_key(|r| r.incident_id);
        requests
    }

    /// Wait until some request is pending and return the oldest one
    pub async fn next_pending(&self) -> ApprovalRequest {
        loop {
            // Created before the check so a registration in between still wakes us
            let registered = self.registered.notified();
            if let Some(request) = self.pending().into_iter().next() {
                return request;
            }
            registered.await;
        }
    }

    /// Whether the incident has a pending request
    #[must_use]
    pub fn is_pending(&self, incident_id: IncidentId) -> bool {
        self.pending.lock().contains_key(&incident_id)
    }
}

/// Removes this call's registry entry if the waiting future is dropped
struct Registration<'a> {
    gate: &'a ApprovalGate,
    incident_id: IncidentId,
    token: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut pending = self.gate.pending.lock();
        if pending.get(&self.incident_id).is_some_and(|p| p.token == self.token) {
            pending.remove(&self.incident_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanOrigin;
    use crate::types::{ActionCommand, Provider};
    use std::sync::Arc;

    fn plan() -> RemediationPlan {
        RemediationPlan::new(
            ActionCommand::Restart,
            "svc",
            Provider::ProviderA,
            0.8,
            "errors",
            PlanOrigin::Collaborator,
        )
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("Copilot".parse::<ApprovalMode>().unwrap(), ApprovalMode::Copilot);
        assert_eq!("AUTONOMOUS".parse::<ApprovalMode>().unwrap(), ApprovalMode::Autonomous);
        assert!("sometimes".parse::<ApprovalMode>().is_err());
    }

    #[tokio::test]
    async fn autonomous_approves_immediately() {
        let gate = ApprovalGate::new(ApprovalMode::Autonomous, DEFAULT_APPROVAL_TIMEOUT);
        let decision = gate.request_approval(IncidentId::new(), &plan()).await.unwrap();
        assert!(decision.approved);
        assert_eq!(decision.reason, DecisionReason::Auto);
        assert!(gate.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn next_pending_wakes_on_registration() {
        let gate = Arc::new(ApprovalGate::new(ApprovalMode::Copilot, DEFAULT_APPROVAL_TIMEOUT));
        let id = IncidentId::new();

        let watcher = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.next_pending().await })
        };
        tokio::task::yield_now().await;
        assert!(!watcher.is_finished());

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.request_approval(id, &plan()).await })
        };
        let request = watcher.await.unwrap();
        assert_eq!(request.incident_id, id);
        assert_eq!(request.status, ApprovalStatus::Pending);

        assert!(gate.approve(id));
        assert!(waiter.await.unwrap().unwrap().approved);
    }

    #[tokio::test]
    async fn dropped_waiter_clears_its_registration() {
        let gate = Arc::new(ApprovalGate::new(ApprovalMode::Copilot, DEFAULT_APPROVAL_TIMEOUT));
        let id = IncidentId::new();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.request_approval(id, &plan()).await })
        };
        while !gate.is_pending(id) {
            tokio::task::yield_now().await;
        }
        waiter.abort();
        let _ = waiter.await;

        assert!(!gate.is_pending(id));
        assert!(!gate.approve(id));
    }

    #[tokio::test]
    async fn cancel_releases_waiter_as_timeout() {
        let gate = Arc::new(ApprovalGate::new(ApprovalMode::Copilot, DEFAULT_APPROVAL_TIMEOUT));
        let id = IncidentId::new();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.request_approval(id, &plan()).await })
        };
        while !gate.is_pending(id) {
            tokio::task::yield_now().await;
        }
        assert!(gate.cancel(id));

        let decision = waiter.await.unwrap().unwrap();
        assert!(!decision.approved);
        assert_eq!(decision.reason, DecisionReason::Timeout);
        assert_eq!(decision.status, ApprovalStatus::TimedOut);
    }
}
