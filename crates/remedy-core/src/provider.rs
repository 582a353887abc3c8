//! In-memory provider adapter
//!
//! [`SimulatedProvider`] implements the action vocabulary against a resource
//! inventory with bounded settings, so the engine can be exercised end to end
//! without cloud credentials. Unknown resources raise `NotFound` and settings
//! already at their ceiling raise `AtLimit`, like a real adapter would.

use crate::dispatch::{ActionEffect, ActionRequest, CapabilityFault, CapabilityTable};
use crate::types::{ActionCommand, Provider};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Maximum memory allocation (MB)
pub const MAX_MEMORY_MB: u32 = 10_240;
/// Maximum execution timeout (seconds)
pub const MAX_TIMEOUT_SECS: u32 = 900;
/// Maximum replica count
pub const MAX_REPLICAS: u32 = 10;

/// Settings of one simulated resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceState {
    /// Memory allocation in MB
    pub memory_mb: u32,
    /// Execution timeout in seconds
    pub timeout_secs: u32,
    /// Running replicas
    pub replicas: u32,
    /// Deployed version (1 is the oldest)
    pub version: u32,
    /// Restarts performed
    pub restarts: u32,
}

impl Default for ResourceState {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            timeout_secs: 30,
            replicas: 2,
            version: 3,
            restarts: 0,
        }
    }
}

/// Provider adapter backed by an in-memory inventory
#[derive(Debug)]
pub struct SimulatedProvider {
    provider: Provider,
    actions: Vec<ActionCommand>,
    resources: Mutex<HashMap<String, ResourceState>>,
}

impl SimulatedProvider {
    /// Adapter supporting every action, with an empty inventory
    #[must_use]
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            actions: ActionCommand::ALL.to_vec(),
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Restrict the capability set
    #[must_use]
    pub fn with_actions(mut self, actions: &[ActionCommand]) -> Self {
        self.actions = actions.to_vec();
        self
    }

    /// Add a resource with default settings
    #[must_use]
    pub fn with_resource(self, name: impl Into<String>) -> Self {
        self.with_resource_state(name, ResourceState::default())
    }

    /// Add a resource with explicit settings
    #[must_use]
    pub fn with_resource_state(self, name: impl Into<String>, state: ResourceState) -> Self {
        self.resources.lock().insert(name.into(), state);
        self
    }

    /// Provider this adapter serves
    #[inline]
    #[must_use]
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Current settings of a resource
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<ResourceState> {
        self.resources.lock().get(name).copied()
    }

    /// Register every supported action into a table
    pub fn register_into(self: Arc<Self>, table: &mut CapabilityTable) {
        for action in self.actions.clone() {
            let adapter = Arc::clone(&self);
            table.register(self.provider.clone(), action, move |request| {
                let adapter = Arc::clone(&adapter);
                async move { adapter.apply(&request) }
            });
        }
    }

    /// Apply an action to the inventory
    ///
    /// # Errors
    /// Returns [`CapabilityFault::NotFound`] for unknown resources and
    /// [`CapabilityFault::AtLimit`] when the setting cannot go higher.
    pub fn apply(&self, request: &ActionRequest) -> Result<ActionEffect, CapabilityFault> {
        let mut resources = self.resources.lock();
        let state = resources
            .get_mut(&request.target)
            .ok_or_else(|| CapabilityFault::NotFound(request.target.clone()))?;

        let effect = match request.action {
            ActionCommand::Restart => {
                state.restarts += 1;
                ActionEffect::message(format!("restarted {} (restart #{})", request.target, state.restarts))
            }
            ActionCommand::ScaleUp => {
                let after = bump(state.replicas, MAX_REPLICAS, "")?;
                let before = std::mem::replace(&mut state.replicas, after);
                ActionEffect::changed(before.to_string(), after.to_string(), "replicas raised")
            }
            ActionCommand::IncreaseMemory => {
                let after = bump(state.memory_mb, MAX_MEMORY_MB, "MB")?;
                let before = std::mem::replace(&mut state.memory_mb, after);
                ActionEffect::changed(format!("{before}MB"), format!("{after}MB"), "memory raised")
            }
            ActionCommand::IncreaseTimeout => {
                let after = bump(state.timeout_secs, MAX_TIMEOUT_SECS, "s")?;
                let before = std::mem::replace(&mut state.timeout_secs, after);
                ActionEffect::changed(format!("{before}s"), format!("{after}s"), "timeout raised")
            }
            ActionCommand::Rollback => {
                if state.version <= 1 {
                    return Err(CapabilityFault::AtLimit {
                        current: "v1".to_string(),
                    });
                }
                let before = state.version;
                state.version -= 1;
                ActionEffect::changed(format!("v{before}"), format!("v{}", state.version), "rolled back")
            }
            ActionCommand::LogOnly => ActionEffect::message("logged; no change made"),
        };
        tracing::debug!(
            provider = %self.provider,
            action = %request.action,
            target = %request.target,
            "simulated action applied"
        );
        Ok(effect)
    }
}

/// Resource names used by the simulated fleet
pub const FLEET_RESOURCES: &[&str] = &["checkout-api", "orders-db", "payments-fn", "search-svc", "thumbnailer"];

/// Capability table for the three built-in providers, all simulated
///
/// `ProviderC` has no rollback, so its fallback is always a restart.
#[must_use]
pub fn simulated_fleet(resources: &[&str]) -> CapabilityTable {
    let mut table = CapabilityTable::new();
    for provider in Provider::KNOWN {
        let mut adapter = SimulatedProvider::new(provider.clone());
        if provider == Provider::ProviderC {
            adapter = adapter.with_actions(&[
                ActionCommand::Restart,
                ActionCommand::ScaleUp,
                ActionCommand::IncreaseMemory,
                ActionCommand::IncreaseTimeout,
                ActionCommand::LogOnly,
            ]);
        }
        for name in resources {
            adapter = adapter.with_resource(*name);
        }
        Arc::new(adapter).register_into(&mut table);
    }
    table
}

/// Double a setting, capped at `max`
fn bump(current: u32, max: u32, unit: &str) -> Result<u32, CapabilityFault> {
    if current >= max {
        return Err(CapabilityFault::AtLimit {
            current: format!("{current}{unit}"),
        });
    }
    Ok(current.saturating_mul(2).min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: ActionCommand, target: &str) -> ActionRequest {
        ActionRequest {
            provider: Provider::ProviderA,
            action,
            target: target.to_string(),
        }
    }

    #[test]
    fn memory_doubles_until_cap() {
        let provider = SimulatedProvider::new(Provider::ProviderA).with_resource_state(
            "fn",
            ResourceState {
                memory_mb: 6000,
                ..ResourceState::default()
            },
        );

        let effect = provider.apply(&request(ActionCommand::IncreaseMemory, "fn")).unwrap();
        let change = effect.change.unwrap();
        assert_eq!(change.before, "6000MB");
        assert_eq!(change.after, "10240MB");

        let fault = provider.apply(&request(ActionCommand::IncreaseMemory, "fn")).unwrap_err();
        assert_eq!(
            fault,
            CapabilityFault::AtLimit {
                current: "10240MB".to_string()
            }
        );
    }

    #[test]
    fn rollback_stops_at_first_version() {
        let provider = SimulatedProvider::new(Provider::ProviderB).with_resource_state(
            "svc",
            ResourceState {
                version: 2,
                ..ResourceState::default()
            },
        );
        assert!(provider.apply(&request(ActionCommand::Rollback, "svc")).is_ok());
        assert_eq!(provider.resource("svc").unwrap().version, 1);
        assert!(matches!(
            provider.apply(&request(ActionCommand::Rollback, "svc")),
            Err(CapabilityFault::AtLimit { .. })
        ));
    }

    #[test]
    fn unknown_resource_is_not_found() {
        let provider = SimulatedProvider::new(Provider::ProviderA);
        assert!(matches!(
            provider.apply(&request(ActionCommand::Restart, "ghost")),
            Err(CapabilityFault::NotFound(_))
        ));
    }

    #[test]
    fn fleet_covers_known_providers() {
        let table = simulated_fleet(FLEET_RESOURCES);
        assert_eq!(table.providers(), Provider::KNOWN.to_vec());
        assert!(table.supports(&Provider::ProviderA, ActionCommand::Rollback));
        assert!(!table.supports(&Provider::ProviderC, ActionCommand::Rollback));
    }

    #[test]
    fn registers_only_configured_actions() {
        let provider = Arc::new(
            SimulatedProvider::new(Provider::ProviderC)
                .with_actions(&[ActionCommand::Restart, ActionCommand::ScaleUp]),
        );
        let mut table = CapabilityTable::new();
        provider.register_into(&mut table);
        assert_eq!(
            table.capabilities(&Provider::ProviderC),
            vec![ActionCommand::Restart, ActionCommand::ScaleUp]
        );
    }
}
