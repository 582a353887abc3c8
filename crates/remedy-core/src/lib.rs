//! Remedy Core - incident remediation orchestrator
//!
//! Turns monitoring alarms into supervised remediation:
//! - Tracks every incident through a validated lifecycle state machine
//! - Obtains a plan from a planning collaborator, or from rules when it fails
//! - Gates execution behind autonomous or human (copilot) approval
//! - Dispatches actions through a provider-neutral capability table
//! - Verifies the effect and runs at most one fallback action
//! - Records every step in a hash-chained audit log
//!
//! # Example
//!
//! ```rust,ignore
//! use remedy_core::prelude::*;
//! use remedy_core::provider::{simulated_fleet, FLEET_RESOURCES};
//!
//! # async fn example() -> Result<(), OrchestratorError> {
//! let orchestrator = Orchestrator::builder(OrchestratorConfig::default())
//!     .capabilities(simulated_fleet(FLEET_RESOURCES))
//!     .build()?;
//!
//! let alarm = AlarmPayload::named("HighErrorAlarm").with_dimension("ServiceName", "checkout-api");
//! let incident = orchestrator.handle_alarm(alarm).await?;
//! println!("{} ended {}", incident.id, incident.state);
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod cancel;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod plan;
pub mod planner;
pub mod probe;
pub mod provider;
pub mod simulator;
pub mod state_machine;
pub mod supervisor;
pub mod types;

pub use approval::{ApprovalGate, ApprovalMode, ApprovalRequest, ApprovalStatus, Decision, DecisionReason};
pub use cancel::{CancelHandle, CancelSignal};
pub use config::OrchestratorConfig;
pub use controller::{IncidentReport, Orchestrator, OrchestratorBuilder, StatusReport};
pub use dispatch::{
    ActionEffect, ActionRequest, CapabilityFault, CapabilityTable, Dispatcher, VetoList, VetoRule,
};
pub use error::{
    ApprovalError, ConfigError, DispatchError, LifecycleError, OrchestratorError, PlanningError,
};
pub use plan::{PlanOrigin, RemediationPlan, ValidatedPlan};
pub use planner::{PlanningCollaborator, RuleBasedPlanner};
pub use probe::{AlwaysHealthy, RandomProbe, VerificationProbe};
pub use state_machine::{allowed_transitions, validate_transition};
pub use supervisor::{LifecycleHooks, SupervisionOutcome, Supervisor};
pub use types::{
    ActionClass, ActionCommand, ActionOutcome, ActionResult, AlarmPayload, Incident, IncidentId,
    IncidentSnapshot, IncidentState, Provider, Severity, StateChange, ValueChange,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for embedding the orchestrator
    pub use crate::{
        ActionCommand, AlarmPayload, ApprovalMode, IncidentId, IncidentState, Orchestrator,
        OrchestratorConfig, OrchestratorError, PlanningCollaborator, Provider, RemediationPlan,
        VerificationProbe,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
