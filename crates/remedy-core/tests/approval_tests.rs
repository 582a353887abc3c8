use remedy_core::approval::{ApprovalGate, ApprovalMode, ApprovalStatus, DecisionReason};
use remedy_core::{ActionCommand, ApprovalError, IncidentId, Provider};
use remedy_test_utils::collaborator_plan;
use std::sync::Arc;
use std::time::Duration;

fn copilot_gate(timeout_secs: u64) -> Arc<ApprovalGate> {
    Arc::new(ApprovalGate::new(ApprovalMode::Copilot, Duration::from_secs(timeout_secs)))
}

async fn until_pending(gate: &ApprovalGate, id: IncidentId) {
    while !gate.is_pending(id) {
        tokio::task::yield_now().await;
    }
}

fn spawn_request(
    gate: &Arc<ApprovalGate>,
    id: IncidentId,
) -> tokio::task::JoinHandle<Result<remedy_core::Decision, ApprovalError>> {
    let gate = Arc::clone(gate);
    let plan = collaborator_plan(ActionCommand::Restart, "checkout-api", Provider::ProviderA);
    tokio::spawn(async move { gate.request_approval(id, &plan).await })
}

#[tokio::test(start_paused = true)]
async fn test_copilot_request_times_out_after_five_minutes() {
    let gate = copilot_gate(300);
    let id = IncidentId::new();
    let waiter = spawn_request(&gate, id);
    until_pending(&gate, id).await;

    tokio::time::advance(Duration::from_secs(299)).await;
    assert!(gate.is_pending(id), "still waiting one second before the deadline");

    tokio::time::advance(Duration::from_secs(2)).await;
    let decision = waiter.await.unwrap().unwrap();
    assert!(!decision.approved);
    assert_eq!(decision.reason, DecisionReason::Timeout);
    assert_eq!(decision.status, ApprovalStatus::TimedOut);
    assert!(!gate.is_pending(id));
}

#[tokio::test(start_paused = true)]
async fn test_late_decision_is_ignored() {
    let gate = copilot_gate(10);
    let id = IncidentId::new();
    let waiter = spawn_request(&gate, id);
    until_pending(&gate, id).await;

    tokio::time::advance(Duration::from_secs(11)).await;
    let decision = waiter.await.unwrap().unwrap();
    assert_eq!(decision.reason, DecisionReason::Timeout);

    assert!(!gate.approve(id), "approval after the deadline must not count");
}

#[tokio::test]
async fn test_approval_resolves_exactly_once() {
    let gate = copilot_gate(300);
    let id = IncidentId::new();
    let waiter = spawn_request(&gate, id);
    until_pending(&gate, id).await;

    assert!(gate.approve(id));
    assert!(!gate.approve(id));
    assert!(!gate.deny(id));

    let decision = waiter.await.unwrap().unwrap();
    assert!(decision.approved);
    assert_eq!(decision.reason, DecisionReason::Human);
    assert_eq!(decision.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn test_denial_is_reported() {
    let gate = copilot_gate(300);
    let id = IncidentId::new();
    let waiter = spawn_request(&gate, id);
    until_pending(&gate, id).await;

    let pending = gate.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].incident_id, id);
    assert_eq!(pending[0].status, ApprovalStatus::Pending);
    assert!(pending[0].deadline > pending[0].created_at);

    assert!(gate.deny(id));
    let decision = waiter.await.unwrap().unwrap();
    assert!(!decision.approved);
    assert_eq!(decision.reason, DecisionReason::Human);
    assert_eq!(decision.status, ApprovalStatus::Denied);
    assert!(gate.pending().is_empty());
}

#[tokio::test]
async fn test_duplicate_request_is_refused() {
    let gate = copilot_gate(300);
    let id = IncidentId::new();
    let first = spawn_request(&gate, id);
    until_pending(&gate, id).await;

    let plan = collaborator_plan(ActionCommand::ScaleUp, "orders-db", Provider::ProviderB);
    let second = gate.request_approval(id, &plan).await;
    assert_eq!(second.unwrap_err(), ApprovalError::AlreadyPending(id));

    // The first request is untouched
    assert!(gate.approve(id));
    assert!(first.await.unwrap().unwrap().approved);
}

#[tokio::test]
async fn test_decision_for_unknown_incident_is_a_no_op() {
    let gate = copilot_gate(300);
    let id = IncidentId::new();
    assert!(!gate.approve(id));
    assert!(!gate.deny(id));
    assert!(!gate.cancel(id));
    assert!(gate.pending().is_empty());
}

#[tokio::test]
async fn test_autonomous_never_registers() {
    let gate = ApprovalGate::new(ApprovalMode::Autonomous, Duration::from_secs(300));
    let id = IncidentId::new();
    let plan = collaborator_plan(ActionCommand::Restart, "checkout-api", Provider::ProviderA);
    let decision = gate.request_approval(id, &plan).await.unwrap();
    assert!(decision.approved);
    assert_eq!(decision.reason, DecisionReason::Auto);
    assert!(!gate.is_pending(id));
}

#[tokio::test]
async fn test_cancel_all_releases_every_waiter() {
    let gate = copilot_gate(300);
    let ids: Vec<IncidentId> = (0..3).map(|_| IncidentId::new()).collect();
    let waiters: Vec<_> = ids.iter().map(|id| spawn_request(&gate, *id)).collect();
    for id in &ids {
        until_pending(&gate, *id).await;
    }

    assert_eq!(gate.cancel_all(), 3);
    for waiter in waiters {
        let decision = waiter.await.unwrap().unwrap();
        assert!(!decision.approved);
        assert_eq!(decision.reason, DecisionReason::Timeout);
    }
}
