//! Orchestrator configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! approval_mode = "copilot"
//! approval_timeout_secs = 300
//! settle_delay_ms = 5000
//! default_provider = "PROVIDER_A"
//! default_target = "default-service"
//!
//! [[veto]]
//! actions = ["ROLLBACK"]
//! target = "payments-*"
//! reason = "payments deploys are rolled back by release engineering only"
//! ```

use crate::approval::ApprovalMode;
use crate::dispatch::{VetoList, VetoRule};
use crate::error::ConfigError;
use crate::types::Provider;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `approval_mode`
pub const APPROVAL_MODE_ENV: &str = "REMEDY_APPROVAL_MODE";

/// Upper bound for any configured duration (one day)
const MAX_DURATION_SECS: u64 = 86_400;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Autonomous or copilot approval
    pub approval_mode: ApprovalMode,
    /// Time a human has to decide (seconds)
    pub approval_timeout_secs: u64,
    /// Delay between an action and its verification (milliseconds)
    pub settle_delay_ms: u64,
    /// Planning collaborator timeout (seconds)
    pub planning_timeout_secs: u64,
    /// Per-dispatch timeout (seconds)
    pub dispatch_timeout_secs: u64,
    /// Provider for rule-based plans when the alarm names none
    pub default_provider: Provider,
    /// Target for rule-based plans when the alarm names none
    pub default_target: String,
    /// Size of the recent-events projection
    pub recent_events_capacity: usize,
    /// JSON-lines audit mirror
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log_path: Option<PathBuf>,
    /// Veto rules
    pub veto: Vec<VetoRule>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            approval_mode: ApprovalMode::Autonomous,
            approval_timeout_secs: 300,
            settle_delay_ms: 5000,
            planning_timeout_secs: 30,
            dispatch_timeout_secs: 60,
            default_provider: Provider::ProviderA,
            default_target: "default-service".to_string(),
            recent_events_capacity: 256,
            audit_log_path: None,
            veto: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse TOML
    ///
    /// # Errors
    /// Returns error if the TOML is invalid
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml)?)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns error if the configuration cannot be serialized
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `REMEDY_APPROVAL_MODE` if set
    ///
    /// # Errors
    /// Returns error if the variable holds an unknown mode
    pub fn apply_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (testable without touching the
    /// process environment)
    ///
    /// # Errors
    /// Returns error if an override holds an invalid value
    pub fn apply_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(mode) = lookup(APPROVAL_MODE_ENV) {
            self.approval_mode = mode.parse().map_err(ConfigError::Invalid)?;
        }
        Ok(self)
    }

    /// Check ranges
    ///
    /// # Errors
    /// Returns error for zero or excessive timeouts, an empty default target,
    /// or a zero-capacity recent-events buffer
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, secs) in [
            ("approval_timeout_secs", self.approval_timeout_secs),
            ("planning_timeout_secs", self.planning_timeout_secs),
            ("dispatch_timeout_secs", self.dispatch_timeout_secs),
        ] {
            if secs == 0 || secs > MAX_DURATION_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between 1 and {MAX_DURATION_SECS}, got {secs}"
                )));
            }
        }
        if self.settle_delay_ms > MAX_DURATION_SECS * 1000 {
            return Err(ConfigError::Invalid(format!(
                "settle_delay_ms too large: {}",
                self.settle_delay_ms
            )));
        }
        let target = self.default_target.trim();
        if target.is_empty() || target.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid(
                "default_target must be a non-empty name without whitespace".to_string(),
            ));
        }
        if self.recent_events_capacity == 0 {
            return Err(ConfigError::Invalid(
                "recent_events_capacity must be positive".to_string(),
            ));
        }
        for rule in &self.veto {
            if rule.target.is_empty() {
                return Err(ConfigError::Invalid("veto rule with empty target pattern".to_string()));
            }
        }
        Ok(())
    }

    /// Set approval mode
    #[must_use]
    pub fn with_approval_mode(mut self, mode: ApprovalMode) -> Self {
        self.approval_mode = mode;
        self
    }

    /// Set approval timeout
    #[must_use]
    pub fn with_approval_timeout_secs(mut self, secs: u64) -> Self {
        self.approval_timeout_secs = secs;
        self
    }

    /// Set settle delay
    #[must_use]
    pub fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }

    /// Set planning timeout
    #[must_use]
    pub fn with_planning_timeout_secs(mut self, secs: u64) -> Self {
        self.planning_timeout_secs = secs;
        self
    }

    /// Set dispatch timeout
    #[must_use]
    pub fn with_dispatch_timeout_secs(mut self, secs: u64) -> Self {
        self.dispatch_timeout_secs = secs;
        self
    }

    /// Set rule-based defaults
    #[must_use]
    pub fn with_defaults(mut self, provider: Provider, target: impl Into<String>) -> Self {
        self.default_provider = provider;
        self.default_target = target.into();
        self
    }

    /// Add a veto rule
    #[must_use]
    pub fn with_veto(mut self, rule: VetoRule) -> Self {
        self.veto.push(rule);
        self
    }

    /// Set the JSON-lines audit mirror
    #[must_use]
    pub fn with_audit_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log_path = Some(path.into());
        self
    }

    /// Approval timeout as a duration
    #[inline]
    #[must_use]
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    /// Settle delay as a duration
    #[inline]
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Planning timeout as a duration
    #[inline]
    #[must_use]
    pub fn planning_timeout(&self) -> Duration {
        Duration::from_secs(self.planning_timeout_secs)
    }

    /// Dispatch timeout as a duration
    #[inline]
    #[must_use]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    /// Veto rules as a list
    #[must_use]
    pub fn veto_list(&self) -> VetoList {
        VetoList::new(self.veto.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionCommand;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.approval_mode, ApprovalMode::Autonomous);
        assert_eq!(config.approval_timeout(), Duration::from_secs(300));
        assert_eq!(config.settle_delay(), Duration::from_millis(5000));
        assert_eq!(config.recent_events_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(OrchestratorConfig::from_toml_str("").unwrap(), OrchestratorConfig::default());
    }

    #[test]
    fn parses_veto_rules() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            approval_mode = "copilot"
            settle_delay_ms = 0
            default_provider = "provider_b"

            [[veto]]
            actions = ["ROLLBACK"]
            target = "payments-*"

            [[veto]]
            classes = ["cost_impacting"]
            target = "*"
            reason = "budget freeze"
            "#,
        )
        .unwrap();

        assert_eq!(config.approval_mode, ApprovalMode::Copilot);
        assert_eq!(config.default_provider, Provider::ProviderB);
        assert_eq!(config.veto.len(), 2);
        let veto = config.veto_list();
        assert!(veto.check(ActionCommand::Rollback, "payments-api").is_some());
        assert_eq!(
            veto.check(ActionCommand::ScaleUp, "anything").and_then(|r| r.reason.clone()),
            Some("budget freeze".to_string())
        );
        assert!(veto.check(ActionCommand::Restart, "orders").is_none());
    }

    #[test]
    fn toml_round_trip() {
        let config = OrchestratorConfig::default()
            .with_approval_mode(ApprovalMode::Copilot)
            .with_veto(VetoRule::for_action(ActionCommand::Restart, "core-*"))
            .with_audit_log_path("/var/log/remedy/audit.jsonl");
        let text = config.to_toml_string().unwrap();
        assert_eq!(OrchestratorConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn env_override() {
        let config = OrchestratorConfig::default()
            .apply_overrides_from(|key| (key == APPROVAL_MODE_ENV).then(|| "COPILOT".to_string()))
            .unwrap();
        assert_eq!(config.approval_mode, ApprovalMode::Copilot);

        let err = OrchestratorConfig::default()
            .apply_overrides_from(|_| Some("yolo".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(OrchestratorConfig::default().with_approval_timeout_secs(0).validate().is_err());
        assert!(OrchestratorConfig::default().with_dispatch_timeout_secs(0).validate().is_err());
        assert!(OrchestratorConfig::default()
            .with_defaults(Provider::ProviderA, " ")
            .validate()
            .is_err());
        assert!(OrchestratorConfig::default().with_settle_delay_ms(0).validate().is_ok());
    }
}
