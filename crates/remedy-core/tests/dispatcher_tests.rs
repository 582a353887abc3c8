use remedy_core::dispatch::{Dispatcher, VetoList, VetoRule};
use remedy_core::provider::{simulated_fleet, FLEET_RESOURCES, MAX_MEMORY_MB};
use remedy_core::types::{ActionClass, ActionCommand, ActionOutcome, Provider};
use remedy_core::DispatchError;
use std::sync::Arc;
use std::time::Duration;

fn fleet_dispatcher() -> Dispatcher {
    Dispatcher::new(simulated_fleet(FLEET_RESOURCES), Duration::from_secs(5))
}

#[tokio::test]
async fn test_memory_increase_reaches_ceiling() {
    let dispatcher = fleet_dispatcher();
    let a = Provider::ProviderA;

    let mut last_after = String::new();
    for _ in 0..5 {
        let result = dispatcher
            .dispatch(&a, ActionCommand::IncreaseMemory, "payments-fn")
            .await
            .unwrap();
        assert_eq!(result.outcome, ActionOutcome::Success);
        last_after = result.change.unwrap().after;
    }
    assert_eq!(last_after, format!("{MAX_MEMORY_MB}MB"));

    let at_max = dispatcher
        .dispatch(&a, ActionCommand::IncreaseMemory, "payments-fn")
        .await
        .unwrap();
    assert_eq!(at_max.outcome, ActionOutcome::Success);
    let change = at_max.change.unwrap();
    assert_eq!(change.before, change.after);
    assert!(at_max.message.starts_with("at_max"), "{}", at_max.message);
}

#[tokio::test]
async fn test_providers_keep_separate_inventories() {
    let dispatcher = fleet_dispatcher();
    let on_a = dispatcher
        .dispatch(&Provider::ProviderA, ActionCommand::ScaleUp, "search-svc")
        .await
        .unwrap();
    let on_b = dispatcher
        .dispatch(&Provider::ProviderB, ActionCommand::ScaleUp, "search-svc")
        .await
        .unwrap();
    assert_eq!(on_a.change, on_b.change);
    assert_eq!(on_a.provider, Provider::ProviderA);
    assert_eq!(on_b.provider, Provider::ProviderB);
}

#[tokio::test]
async fn test_unknown_target_is_simulated() {
    let result = fleet_dispatcher()
        .dispatch(&Provider::ProviderB, ActionCommand::Restart, "ghost-7")
        .await
        .unwrap();
    assert_eq!(result.outcome, ActionOutcome::SimulatedSuccess);
    assert!(result.outcome.counts_as_executed());
    assert!(result.change.is_none());
}

#[tokio::test]
async fn test_capability_gaps_are_policy_errors() {
    let dispatcher = fleet_dispatcher();

    let err = dispatcher
        .dispatch(&Provider::ProviderC, ActionCommand::Rollback, "orders-db")
        .await
        .unwrap_err();
    assert!(err.is_policy_error());
    assert_eq!(
        err,
        DispatchError::UnsupportedAction {
            provider: Provider::ProviderC,
            action: ActionCommand::Rollback
        }
    );

    let err = dispatcher
        .dispatch(&Provider::from("provider-z"), ActionCommand::Restart, "orders-db")
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::UnsupportedProvider(_)));
}

#[tokio::test]
async fn test_bad_targets_are_invalid_requests() {
    let dispatcher = fleet_dispatcher();
    for target in ["", "   ", "two words"] {
        let err = dispatcher
            .dispatch(&Provider::ProviderA, ActionCommand::Restart, target)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRequest(_)), "{target:?}: {err}");
        assert!(!err.is_policy_error());
    }
}

#[tokio::test]
async fn test_veto_blocks_before_the_capability_runs() {
    let dispatcher = fleet_dispatcher().with_veto(VetoList::new(vec![
        VetoRule::for_class(ActionClass::CostImpacting, "orders-*").with_reason("budget freeze on orders"),
    ]));

    let err = dispatcher
        .dispatch(&Provider::ProviderA, ActionCommand::ScaleUp, "orders-db")
        .await
        .unwrap_err();
    assert!(err.is_policy_error());
    assert!(err.to_string().contains("budget freeze on orders"), "{err}");

    // Vetoed call left the inventory alone: first allowed scale-up starts from the default
    let dispatcher = fleet_dispatcher();
    let result = dispatcher
        .dispatch(&Provider::ProviderA, ActionCommand::ScaleUp, "orders-db")
        .await
        .unwrap();
    assert_eq!(result.change.unwrap().before, "2");

    // Restart is not cost impacting
    let vetoed = fleet_dispatcher().with_veto(VetoList::new(vec![VetoRule::for_class(
        ActionClass::CostImpacting,
        "orders-*",
    )]));
    assert!(vetoed
        .dispatch(&Provider::ProviderA, ActionCommand::Restart, "orders-db")
        .await
        .is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatches_are_independent() {
    let dispatcher = Arc::new(fleet_dispatcher());
    let mut handles = Vec::new();
    for n in 0..20 {
        let dispatcher = Arc::clone(&dispatcher);
        handles.push(tokio::spawn(async move {
            let target = FLEET_RESOURCES[n % FLEET_RESOURCES.len()];
            dispatcher
                .dispatch(&Provider::ProviderB, ActionCommand::Restart, target)
                .await
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.outcome, ActionOutcome::Success);
    }
}
