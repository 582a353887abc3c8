//! Core types for the remediation engine
//!
//! Defines the fundamental data model:
//! - Incident identity, alarm payload and severity
//! - Providers and the remediation action vocabulary
//! - Action results and lifecycle history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::plan::RemediationPlan;

/// Unique incident identifier (ULID, so ids sort by creation time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IncidentId(pub Ulid);

impl IncidentId {
    /// Generate new incident ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IncidentId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Incident severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational
    Low,
    /// Default when the alarm carries no severity
    #[default]
    Medium,
    /// Customer-visible degradation
    High,
    /// Outage
    Critical,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" | "INFO" => Ok(Self::Low),
            "MEDIUM" | "WARNING" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" | "SEV1" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Raw alarm as delivered by the detection source
///
/// Kept as an opaque key/value mapping; the accessors below derive the few
/// fields the engine needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmPayload(pub BTreeMap<String, serde_json::Value>);

const NAME_KEYS: &[&str] = &["AlarmName", "alarm_name", "alarmName", "name"];
const REASON_KEYS: &[&str] = &["NewStateReason", "reason", "description"];
const TARGET_KEYS: &[&str] = &[
    "target",
    "resource",
    "FunctionName",
    "ServiceName",
    "InstanceId",
    "DBInstanceIdentifier",
];

impl AlarmPayload {
    /// Alarm with only a name
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::default().with("AlarmName", name.into())
    }

    /// Set a top-level field
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Add a dimension
    #[must_use]
    pub fn with_dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let dims = self
            .0
            .entry("dimensions".to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let serde_json::Value::Object(map) = dims {
            map.insert(key.into(), serde_json::Value::String(value.into()));
        }
        self
    }

    /// Parse a JSON object
    ///
    /// # Errors
    /// Returns error if the input is not a JSON object
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    fn first_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|k| self.0.get(*k).and_then(serde_json::Value::as_str))
            .filter(|s| !s.trim().is_empty())
    }

    /// Alarm name, `UnknownAlarm` when absent
    #[must_use]
    pub fn name(&self) -> String {
        self.first_str(NAME_KEYS).unwrap_or("UnknownAlarm").to_string()
    }

    /// Human-readable reason, if any
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.first_str(REASON_KEYS).map(str::to_string)
    }

    /// Dimensions as a flat map
    ///
    /// Accepts either an object (`{"FunctionName": "x"}`) or the CloudWatch
    /// list form (`[{"name": "FunctionName", "value": "x"}]`).
    #[must_use]
    pub fn dimensions(&self) -> BTreeMap<String, String> {
        let raw = self.0.get("dimensions").or_else(|| self.0.get("Dimensions"));
        let mut out = BTreeMap::new();
        match raw {
            Some(serde_json::Value::Object(map)) => {
                for (k, v) in map {
                    if let Some(s) = v.as_str() {
                        out.insert(k.clone(), s.to_string());
                    }
                }
            }
            Some(serde_json::Value::Array(items)) => {
                for item in items {
                    let key = item.get("name").or_else(|| item.get("Name"));
                    let value = item.get("value").or_else(|| item.get("Value"));
                    if let (Some(k), Some(v)) = (
                        key.and_then(serde_json::Value::as_str),
                        value.and_then(serde_json::Value::as_str),
                    ) {
                        out.insert(k.to_string(), v.to_string());
                    }
                }
            }
            _ => {}
        }
        out
    }

    /// Resource the alarm points at, from top-level fields or dimensions
    #[must_use]
    pub fn target(&self) -> Option<String> {
        if let Some(t) = self.first_str(TARGET_KEYS) {
            return Some(t.to_string());
        }
        let dims = self.dimensions();
        TARGET_KEYS
            .iter()
            .find_map(|k| dims.get(*k))
            .filter(|s| !s.trim().is_empty())
            .cloned()
    }

    /// Provider named by the alarm, if any
    #[must_use]
    pub fn provider(&self) -> Option<Provider> {
        self.first_str(&["provider", "Provider"]).map(Provider::from)
    }

    /// Severity field, defaulting to [`Severity::Medium`]
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.first_str(&["severity", "Severity"])
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

/// Target environment exposing a fixed capability set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provider {
    /// First cloud vendor
    ProviderA,
    /// Second cloud vendor
    ProviderB,
    /// Third cloud vendor
    ProviderC,
    /// Anything else; dispatching to it fails unless registered
    Other(String),
}

impl Provider {
    /// The three built-in vendors
    pub const KNOWN: [Provider; 3] = [Provider::ProviderA, Provider::ProviderB, Provider::ProviderC];
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderA => f.write_str("PROVIDER_A"),
            Self::ProviderB => f.write_str("PROVIDER_B"),
            Self::ProviderC => f.write_str("PROVIDER_C"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Provider {
    fn from(s: &str) -> Self {
        let norm = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match norm.as_str() {
            "PROVIDER_A" | "A" => Self::ProviderA,
            "PROVIDER_B" | "B" => Self::ProviderB,
            "PROVIDER_C" | "C" => Self::ProviderC,
            _ => Self::Other(norm),
        }
    }
}

impl From<String> for Provider {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<Provider> for String {
    fn from(p: Provider) -> Self {
        p.to_string()
    }
}

impl FromStr for Provider {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// Remediation action vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionCommand {
    /// Restart the service/function
    Restart,
    /// Add capacity
    ScaleUp,
    /// Raise the memory allocation
    IncreaseMemory,
    /// Raise the execution timeout
    IncreaseTimeout,
    /// Return to the previous deployment
    Rollback,
    /// Record only, no side effect
    LogOnly,
}

/// Risk classes a veto rule may match on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    /// Raises spend
    CostImpacting,
    /// Interrupts or replaces running workloads
    Destructive,
}

impl ActionCommand {
    /// Every command, in declaration order
    pub const ALL: [ActionCommand; 6] = [
        Self::Restart,
        Self::ScaleUp,
        Self::IncreaseMemory,
        Self::IncreaseTimeout,
        Self::Rollback,
        Self::LogOnly,
    ];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "RESTART",
            Self::ScaleUp => "SCALE_UP",
            Self::IncreaseMemory => "INCREASE_MEMORY",
            Self::IncreaseTimeout => "INCREASE_TIMEOUT",
            Self::Rollback => "ROLLBACK",
            Self::LogOnly => "LOG_ONLY",
        }
    }

    /// Risk class, if any
    #[must_use]
    pub const fn class(self) -> Option<ActionClass> {
        match self {
            Self::ScaleUp | Self::IncreaseMemory | Self::IncreaseTimeout => {
                Some(ActionClass::CostImpacting)
            }
            Self::Restart | Self::Rollback => Some(ActionClass::Destructive),
            Self::LogOnly => None,
        }
    }

    /// Whether the action raises spend
    #[inline]
    #[must_use]
    pub fn is_cost_impacting(self) -> bool {
        self.class() == Some(ActionClass::CostImpacting)
    }

    /// Whether the action interrupts running workloads
    #[inline]
    #[must_use]
    pub fn is_destructive(self) -> bool {
        self.class() == Some(ActionClass::Destructive)
    }
}

impl fmt::Display for ActionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match norm.as_str() {
            "RESTART" | "REBOOT" => Ok(Self::Restart),
            "SCALE_UP" | "SCALE_OUT" | "SCALE" => Ok(Self::ScaleUp),
            "INCREASE_MEMORY" => Ok(Self::IncreaseMemory),
            "INCREASE_TIMEOUT" => Ok(Self::IncreaseTimeout),
            "ROLLBACK" => Ok(Self::Rollback),
            "LOG_ONLY" | "LOG" | "NO_OP" | "NONE" => Ok(Self::LogOnly),
            _ => Err(format!("unknown action: {s}")),
        }
    }
}

/// Outcome of one dispatched action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionOutcome {
    /// The provider performed the action
    Success,
    /// Degraded: nothing to act on, treated as executed
    SimulatedSuccess,
    /// Infrastructure fault or timeout
    Failed,
}

impl ActionOutcome {
    /// Whether the lifecycle may proceed to verification
    #[inline]
    #[must_use]
    pub fn counts_as_executed(self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "SUCCESS",
            Self::SimulatedSuccess => "SIMULATED_SUCCESS",
            Self::Failed => "FAILED",
        })
    }
}

/// Before/after value of the setting an action changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueChange {
    /// Value before the action
    pub before: String,
    /// Value after the action
    pub after: String,
}

impl ValueChange {
    /// Create new change
    #[inline]
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
        }
    }

    /// Whether the action left the value as it was (already at limit)
    #[inline]
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.before == self.after
    }
}

/// Result of dispatching one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Provider that handled the action
    pub provider: Provider,
    /// Action performed
    pub action: ActionCommand,
    /// Target resource
    pub target: String,
    /// Outcome classification
    pub outcome: ActionOutcome,
    /// Changed value, when the action adjusts a setting
    pub change: Option<ValueChange>,
    /// Provider or dispatcher message
    pub message: String,
    /// True for the self-correction (Plan B) action
    pub fallback: bool,
    /// Completion time
    pub completed_at: DateTime<Utc>,
}

impl ActionResult {
    /// One-line description used in audit entries and reports
    #[must_use]
    pub fn describe(&self) -> String {
        let mut line = format!(
            "{} on {} via {}: {}",
            self.action, self.target, self.provider, self.outcome
        );
        if let Some(change) = &self.change {
            line.push_str(&format!(" ({} -> {})", change.before, change.after));
        }
        if !self.message.is_empty() {
            line.push_str(" - ");
            line.push_str(&self.message);
        }
        line
    }
}

/// Lifecycle states of an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentState {
    /// Alarm received
    Detected,
    /// Obtaining a plan
    Planning,
    /// Waiting on the approval gate
    AwaitingApproval,
    /// Primary action in flight
    Executing,
    /// Waiting for the settle delay and probing
    Verifying,
    /// Running the single fallback action
    SelfCorrecting,
    /// Remediated
    Resolved,
    /// Remediation failed; needs a human
    Failed,
    /// Not approved; nothing executed
    Rejected,
}

impl IncidentState {
    /// Every state, in lifecycle order
    pub const ALL: [IncidentState; 9] = [
        Self::Detected,
        Self::Planning,
        Self::AwaitingApproval,
        Self::Executing,
        Self::Verifying,
        Self::SelfCorrecting,
        Self::Resolved,
        Self::Failed,
        Self::Rejected,
    ];

    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Failed | Self::Rejected)
    }
}

impl fmt::Display for IncidentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Detected => "DETECTED",
            Self::Planning => "PLANNING",
            Self::AwaitingApproval => "AWAITING_APPROVAL",
            Self::Executing => "EXECUTING",
            Self::Verifying => "VERIFYING",
            Self::SelfCorrecting => "SELF_CORRECTING",
            Self::Resolved => "RESOLVED",
            Self::Failed => "FAILED",
            Self::Rejected => "REJECTED",
        })
    }
}

/// One visited state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// State entered
    pub state: IncidentState,
    /// When it was entered
    pub at: DateTime<Utc>,
    /// Why
    pub detail: String,
}

/// One detected abnormal condition and everything done about it
///
/// Owned by the orchestrator; callers only ever see clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Identifier
    pub id: IncidentId,
    /// Raw alarm payload
    pub alarm: AlarmPayload,
    /// Derived alarm name
    pub alarm_name: String,
    /// Severity
    pub severity: Severity,
    /// Current lifecycle state
    pub state: IncidentState,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Set when a terminal state is reached
    pub resolved_at: Option<DateTime<Utc>>,
    /// Validated plan, once planning completes
    pub plan: Option<RemediationPlan>,
    /// Actions taken, in order (at most two)
    pub actions: Vec<ActionResult>,
    /// States visited, in order, starting with `Detected`
    pub history: Vec<StateChange>,
    /// Human-readable reason for the terminal state
    pub reason: Option<String>,
}

impl Incident {
    /// New incident in `Detected`
    #[must_use]
    pub fn detected(alarm: AlarmPayload) -> Self {
        let now = Utc::now();
        let alarm_name = alarm.name();
        let severity = alarm.severity();
        let detail = match alarm.reason() {
            Some(reason) => format!("alarm {alarm_name}: {reason}"),
            None => format!("alarm {alarm_name}"),
        };
        Self {
            id: IncidentId::new(),
            alarm,
            alarm_name,
            severity,
            state: IncidentState::Detected,
            created_at: now,
            resolved_at: None,
            plan: None,
            actions: Vec::new(),
            history: vec![StateChange {
                state: IncidentState::Detected,
                at: now,
                detail,
            }],
            reason: None,
        }
    }

    /// States visited, in order
    #[must_use]
    pub fn path(&self) -> Vec<IncidentState> {
        self.history.iter().map(|c| c.state).collect()
    }

    /// Whether a terminal state has been reached
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Point-in-time copy of an incident handed out by the query surface
pub type IncidentSnapshot = Incident;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_command_parses_variants() {
        assert_eq!("restart".parse::<ActionCommand>().unwrap(), ActionCommand::Restart);
        assert_eq!("scale-up".parse::<ActionCommand>().unwrap(), ActionCommand::ScaleUp);
        assert_eq!(
            "Increase Memory".parse::<ActionCommand>().unwrap(),
            ActionCommand::IncreaseMemory
        );
        assert!("delete_everything".parse::<ActionCommand>().is_err());
    }

    #[test]
    fn action_command_serde_uses_wire_names() {
        let json = serde_json::to_string(&ActionCommand::IncreaseTimeout).unwrap();
        assert_eq!(json, "\"INCREASE_TIMEOUT\"");
        for cmd in ActionCommand::ALL {
            assert_eq!(cmd.as_str().parse::<ActionCommand>().unwrap(), cmd);
        }
    }

    #[test]
    fn action_classes() {
        assert!(ActionCommand::ScaleUp.is_cost_impacting());
        assert!(ActionCommand::Rollback.is_destructive());
        assert_eq!(ActionCommand::LogOnly.class(), None);
    }

    #[test]
    fn provider_normalizes_names() {
        assert_eq!(Provider::from("provider-a"), Provider::ProviderA);
        assert_eq!(Provider::from("C"), Provider::ProviderC);
        assert_eq!(Provider::from("unknown"), Provider::Other("UNKNOWN".to_string()));
        assert_eq!(Provider::ProviderB.to_string(), "PROVIDER_B");

        let json = serde_json::to_string(&Provider::ProviderA).unwrap();
        assert_eq!(json, "\"PROVIDER_A\"");
        let back: Provider = serde_json::from_str("\"UNKNOWN\"").unwrap();
        assert_eq!(back, Provider::Other("UNKNOWN".to_string()));
    }

    #[test]
    fn alarm_payload_derives_fields() {
        let alarm = AlarmPayload::from_json_str(
            &json!({
                "AlarmName": "HighErrorAlarm",
                "NewStateReason": "Threshold crossed",
                "severity": "critical",
                "provider": "provider_b",
                "Dimensions": [{"name": "FunctionName", "value": "checkout-fn"}]
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(alarm.name(), "HighErrorAlarm");
        assert_eq!(alarm.reason().as_deref(), Some("Threshold crossed"));
        assert_eq!(alarm.severity(), Severity::Critical);
        assert_eq!(alarm.provider(), Some(Provider::ProviderB));
        assert_eq!(alarm.target().as_deref(), Some("checkout-fn"));
    }

    #[test]
    fn alarm_payload_defaults() {
        let alarm = AlarmPayload::default();
        assert_eq!(alarm.name(), "UnknownAlarm");
        assert_eq!(alarm.severity(), Severity::Medium);
        assert_eq!(alarm.target(), None);
        assert_eq!(alarm.provider(), None);
    }

    #[test]
    fn alarm_builder_dimensions() {
        let alarm = AlarmPayload::named("MemoryAlarm").with_dimension("ServiceName", "orders");
        assert_eq!(alarm.target().as_deref(), Some("orders"));
    }

    #[test]
    fn incident_starts_detected() {
        let incident = Incident::detected(AlarmPayload::named("LatencyAlarm"));
        assert_eq!(incident.state, IncidentState::Detected);
        assert_eq!(incident.path(), vec![IncidentState::Detected]);
        assert!(!incident.is_finished());
        assert!(incident.resolved_at.is_none());
    }

    #[test]
    fn action_result_describe() {
        let result = ActionResult {
            provider: Provider::ProviderA,
            action: ActionCommand::IncreaseMemory,
            target: "fn".to_string(),
            outcome: ActionOutcome::Success,
            change: Some(ValueChange::new("512", "1024")),
            message: String::new(),
            fallback: false,
            completed_at: Utc::now(),
        };
        assert_eq!(result.describe(), "INCREASE_MEMORY on fn via PROVIDER_A: SUCCESS (512 -> 1024)");
    }
}
