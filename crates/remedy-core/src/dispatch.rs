//! Action dispatcher
//!
//! Routes `(provider, action, target)` to a capability registered in a closed
//! [`CapabilityTable`]. Policy problems are hard errors:
//! - unknown provider or action
//! - missing/invalid parameters
//! - a matching [`VetoRule`]
//!
//! Faults raised by the capability itself degrade into an [`ActionResult`]:
//! not-found becomes `SimulatedSuccess`, at-limit becomes a no-change
//! `Success`, infrastructure faults and timeouts become `Failed`.

use crate::error::DispatchError;
use crate::types::{ActionClass, ActionCommand, ActionOutcome, ActionResult, Provider, ValueChange};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Parameters handed to a capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    /// Provider the capability belongs to
    pub provider: Provider,
    /// Action to perform
    pub action: ActionCommand,
    /// Target resource
    pub target: String,
}

/// What a capability did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionEffect {
    /// Adjusted setting, if any
    pub change: Option<ValueChange>,
    /// Provider message
    pub message: String,
}

impl ActionEffect {
    /// Effect with a before/after change
    pub fn changed(before: impl Into<String>, after: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            change: Some(ValueChange::new(before, after)),
            message: message.into(),
        }
    }

    /// Effect with only a message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            change: None,
            message: message.into(),
        }
    }
}

/// Fault reported by a capability
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityFault {
    /// Target does not exist on the provider
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Setting is already at its ceiling
    #[error("already at max ({current})")]
    AtLimit {
        /// Current (and maximum) value
        current: String,
    },

    /// Provider-side failure
    #[error("infrastructure fault: {0}")]
    Infrastructure(String),
}

/// Boxed future returned by a capability
pub type CapabilityFuture = BoxFuture<'static, Result<ActionEffect, CapabilityFault>>;

type CapabilityFn = Arc<dyn Fn(ActionRequest) -> CapabilityFuture + Send + Sync>;

/// Closed table of `(provider, action) -> capability`
///
/// Filled at startup; there is no inheritance and no runtime discovery.
#[derive(Default, Clone)]
pub struct CapabilityTable {
    entries: HashMap<Provider, HashMap<ActionCommand, CapabilityFn>>,
}

impl fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for provider in self.providers() {
            map.entry(&provider, &self.capabilities(&provider));
        }
        map.finish()
    }
}

impl CapabilityTable {
    /// Empty table
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async capability, replacing any previous one
    pub fn register<F, Fut>(&mut self, provider: Provider, action: ActionCommand, capability: F) -> &mut Self
    where
        F: Fn(ActionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionEffect, CapabilityFault>> + Send + 'static,
    {
        let boxed: CapabilityFn = Arc::new(move |request| capability(request).boxed());
        self.entries.entry(provider).or_default().insert(action, boxed);
        self
    }

    /// Registered providers, sorted
    #[must_use]
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.entries.keys().cloned().collect();
        providers.sort();
        providers
    }

    /// Actions a provider supports, sorted
    #[must_use]
    pub fn capabilities(&self, provider: &Provider) -> Vec<ActionCommand> {
        let mut actions: Vec<ActionCommand> = self
            .entries
            .get(provider)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        actions.sort();
        actions
    }

    /// Whether the provider has any capability
    #[inline]
    #[must_use]
    pub fn has_provider(&self, provider: &Provider) -> bool {
        self.entries.contains_key(provider)
    }

    /// Whether `(provider, action)` is registered
    #[inline]
    #[must_use]
    pub fn supports(&self, provider: &Provider, action: ActionCommand) -> bool {
        self.entries.get(provider).is_some_and(|m| m.contains_key(&action))
    }

    fn lookup(&self, provider: &Provider, action: ActionCommand) -> Result<&CapabilityFn, DispatchError> {
        let actions = self
            .entries
            .get(provider)
            .ok_or_else(|| DispatchError::UnsupportedProvider(provider.clone()))?;
        actions.get(&action).ok_or_else(|| DispatchError::UnsupportedAction {
            provider: provider.clone(),
            action,
        })
    }
}

/// Static rule blocking actions on matching targets
///
/// A rule with neither `actions` nor `classes` blocks every action on its
/// target pattern. Patterns are exact names, `prefix*`, or `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VetoRule {
    /// Actions blocked
    #[serde(default)]
    pub actions: Vec<ActionCommand>,
    /// Action classes blocked
    #[serde(default)]
    pub classes: Vec<ActionClass>,
    /// Target pattern
    pub target: String,
    /// Operator-facing explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VetoRule {
    /// Block one action on a target pattern
    pub fn for_action(action: ActionCommand, target: impl Into<String>) -> Self {
        Self {
            actions: vec![action],
            classes: Vec::new(),
            target: target.into(),
            reason: None,
        }
    }

    /// Block an action class on a target pattern
    pub fn for_class(class: ActionClass, target: impl Into<String>) -> Self {
        Self {
            actions: Vec::new(),
            classes: vec![class],
            target: target.into(),
            reason: None,
        }
    }

    /// Set reason
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Whether the rule blocks `action` on `target`
    #[must_use]
    pub fn matches(&self, action: ActionCommand, target: &str) -> bool {
        let action_hit = (self.actions.is_empty() && self.classes.is_empty())
            || self.actions.contains(&action)
            || action.class().is_some_and(|c| self.classes.contains(&c));
        action_hit && pattern_matches(&self.target, target)
    }

    /// Human-readable rule description
    #[must_use]
    pub fn describe(&self) -> String {
        if let Some(reason) = &self.reason {
            return reason.clone();
        }
        let mut what: Vec<String> = self.actions.iter().map(ToString::to_string).collect();
        what.extend(self.classes.iter().map(|c| format!("{c:?}")));
        if what.is_empty() {
            what.push("any action".to_string());
        }
        format!("veto {} on {}", what.join("|"), self.target)
    }
}

fn pattern_matches(pattern: &str, target: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => target.starts_with(prefix),
        None => pattern == target,
    }
}

/// Ordered list of veto rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VetoList {
    rules: Vec<VetoRule>,
}

impl VetoList {
    /// List from rules
    #[must_use]
    pub fn new(rules: Vec<VetoRule>) -> Self {
        Self { rules }
    }

    /// First rule blocking `action` on `target`
    #[must_use]
    pub fn check(&self, action: ActionCommand, target: &str) -> Option<&VetoRule> {
        self.rules.iter().find(|r| r.matches(action, target))
    }

    /// Number of rules
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Routes actions to capabilities
///
/// Stateless per call; safe to share across incident tasks.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: CapabilityTable,
    veto: VetoList,
    timeout: Duration,
}

impl Dispatcher {
    /// Dispatcher over a capability table with a per-call timeout
    #[must_use]
    pub fn new(table: CapabilityTable, timeout: Duration) -> Self {
        Self {
            table,
            veto: VetoList::default(),
            timeout,
        }
    }

    /// Set veto rules
    #[must_use]
    pub fn with_veto(mut self, veto: VetoList) -> Self {
        self.veto = veto;
        self
    }

    /// Capability table
    #[inline]
    #[must_use]
    pub fn table(&self) -> &CapabilityTable {
        &self.table
    }

    /// Whether `(provider, action)` is registered
    #[inline]
    #[must_use]
    pub fn supports(&self, provider: &Provider, action: ActionCommand) -> bool {
        self.table.supports(provider, action)
    }

    /// Run every dispatch check without calling the capability
    ///
    /// # Errors
    /// Same policy and request errors as [`Dispatcher::dispatch`].
    pub fn preflight(&self, provider: &Provider, action: ActionCommand, target: &str) -> Result<(), DispatchError> {
        self.table.lookup(provider, action)?;
        check_target(target)?;
        if let Some(rule) = self.veto.check(action, target) {
            return Err(DispatchError::SecurityVeto {
                action,
                target: target.to_string(),
                rule: rule.describe(),
            });
        }
        Ok(())
    }

    /// Dispatch one action
    ///
    /// # Errors
    /// Returns [`DispatchError`] if the provider or action is unknown, the
    /// target is invalid, or a veto rule matches. Capability faults are
    /// reported in the returned result instead.
    pub async fn dispatch(
        &self,
        provider: &Provider,
        action: ActionCommand,
        target: &str,
    ) -> Result<ActionResult, DispatchError> {
        self.preflight(provider, action, target)?;
        let capability = Arc::clone(self.table.lookup(provider, action)?);
        let request = ActionRequest {
            provider: provider.clone(),
            action,
            target: target.to_string(),
        };

        tracing::debug!(provider = %provider, action = %action, target, "dispatching action");
        let called = tokio::time::timeout(self.timeout, capability(request)).await;

        let (outcome, change, message) = match called {
            Ok(Ok(effect)) => (ActionOutcome::Success, effect.change, effect.message),
            Ok(Err(CapabilityFault::NotFound(what))) => {
                tracing::warn!(provider = %provider, target, "target not found; degrading to simulated success");
                (
                    ActionOutcome::SimulatedSuccess,
                    None,
                    format!("resource not found ({what}); simulated"),
                )
            }
            Ok(Err(CapabilityFault::AtLimit { current })) => (
                ActionOutcome::Success,
                Some(ValueChange::new(current.clone(), current.clone())),
                format!("at_max: already at max ({current})"),
            ),
            Ok(Err(fault @ CapabilityFault::Infrastructure(_))) => {
                tracing::warn!(provider = %provider, action = %action, target, error = %fault, "capability failed");
                (ActionOutcome::Failed, None, fault.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    provider = %provider,
                    action = %action,
                    target,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "capability timed out"
                );
                (
                    ActionOutcome::Failed,
                    None,
                    format!("timed out after {:.1}s", self.timeout.as_secs_f64()),
                )
            }
        };

        Ok(ActionResult {
            provider: provider.clone(),
            action,
            target: target.to_string(),
            outcome,
            change,
            message,
            fallback: false,
            completed_at: Utc::now(),
        })
    }
}

fn check_target(target: &str) -> Result<(), DispatchError> {
    if target.trim().is_empty() {
        return Err(DispatchError::InvalidRequest("target is required".to_string()));
    }
    if target.chars().any(char::is_whitespace) {
        return Err(DispatchError::InvalidRequest(format!(
            "target contains whitespace: {target:?}"
        )));
    }
    Ok(())
}
