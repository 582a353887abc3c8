//! Seeded incident simulator
//!
//! Drives a batch of synthetic alarms concurrently through a fully wired
//! orchestrator (simulated providers, random probe, optional copilot operator)
//! and checks the lifecycle invariants afterwards:
//! - every incident ends in a terminal state along a legal path
//! - no incident dispatches more than two actions
//! - the audit chain verifies

use crate::approval::ApprovalMode;
use crate::config::OrchestratorConfig;
use crate::controller::Orchestrator;
use crate::error::OrchestratorError;
use crate::probe::RandomProbe;
use crate::provider::{simulated_fleet, FLEET_RESOURCES};
use crate::state_machine::is_complete_path;
use crate::supervisor::MAX_ACTIONS_PER_INCIDENT;
use crate::types::{ActionOutcome, AlarmPayload, IncidentId, IncidentState, Severity};
use rand::{rngs::StdRng, Rng, SeedableRng};
use remedy_audit::ChainVerification;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;

const ALARM_NAMES: &[&str] = &[
    "HighErrorAlarm",
    "LatencyP99Breach",
    "MemoryPressure",
    "TimeoutSpike",
    "DeployFailureRate",
    "DiskQueueDepth",
];
const SEVERITIES: [Severity; 4] = [Severity::Low, Severity::Medium, Severity::High, Severity::Critical];

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Alarms to generate
    pub incidents: usize,
    /// Probability that a verification probe passes
    pub success_rate: f64,
    /// Approval mode
    pub approval_mode: ApprovalMode,
    /// In copilot mode, probability that the simulated operator approves
    pub approve_rate: f64,
    /// Probability that an alarm names a provider with no capabilities
    pub unknown_provider_rate: f64,
    /// Settle delay between action and probe
    pub settle_delay_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            incidents: 100,
            success_rate: 0.7,
            approval_mode: ApprovalMode::Autonomous,
            approve_rate: 0.8,
            unknown_provider_rate: 0.05,
            settle_delay_ms: 0,
        }
    }
}

/// A violated lifecycle invariant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Violation {
    /// More actions than primary plus one fallback
    TooManyActions {
        /// Incident
        incident: IncidentId,
        /// Actions recorded
        count: usize,
    },
    /// Visited states do not form a legal path
    InvalidPath {
        /// Incident
        incident: IncidentId,
        /// States visited
        path: Vec<IncidentState>,
    },
    /// A fallback ran without a preceding primary action
    OrphanFallback {
        /// Incident
        incident: IncidentId,
    },
    /// Audit chain verification failed
    AuditChainBroken {
        /// First bad index
        broken_at: Option<usize>,
    },
}

/// Statistics for simulation
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatorStats {
    /// Incidents created
    pub incidents: usize,
    /// Ended `Resolved`
    pub resolved: usize,
    /// Ended `Failed`
    pub failed: usize,
    /// Ended `Rejected`
    pub rejected: usize,
    /// Resolved only after the fallback
    pub self_corrected: usize,
    /// Actions dispatched
    pub actions: usize,
    /// Actions degraded to simulated success
    pub simulated_successes: usize,
    /// Audit entries written
    pub audit_entries: usize,
}

/// Final report from simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    /// Configuration used
    pub config: SimulatorConfig,
    /// Counters
    pub stats: SimulatorStats,
    /// Violations found
    pub violations: Vec<Violation>,
    /// Chain verification result
    pub audit: ChainVerification,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let stats = &self.stats;

        report.push_str("=== Remedy Simulator Report ===\n\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Approval Mode: {}", self.config.approval_mode);
        let _ = writeln!(report, "Probe Success Rate: {:.2}", self.config.success_rate);
        let _ = writeln!(report, "Incidents: {}", stats.incidents);
        let _ = writeln!(report, "Resolved: {} ({} after self-correction)", stats.resolved, stats.self_corrected);
        let _ = writeln!(report, "Failed: {}", stats.failed);
        let _ = writeln!(report, "Rejected: {}", stats.rejected);
        let _ = writeln!(report, "Actions Dispatched: {}", stats.actions);
        let _ = writeln!(report, "Simulated Successes: {}", stats.simulated_successes);
        let _ = writeln!(report, "Audit Entries: {}", stats.audit_entries);
        let _ = writeln!(
            report,
            "Audit Chain: {}",
            if self.audit.valid { "VALID" } else { "BROKEN" }
        );
        let _ = writeln!(report, "Violations: {}", self.violations.len());

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {:?}", i + 1, v);
            }
        }

        let _ = write!(
            report,
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }
}

/// Generate one synthetic alarm
fn synthetic_alarm(rng: &mut StdRng, n: usize, unknown_provider_rate: f64) -> AlarmPayload {
    let name = ALARM_NAMES[rng.gen_range(0..ALARM_NAMES.len())];
    let severity = SEVERITIES[rng.gen_range(0..SEVERITIES.len())];
    // One target in eight is missing from the inventory
    let target = if rng.gen_ratio(1, 8) {
        format!("ghost-{n}")
    } else {
        FLEET_RESOURCES[rng.gen_range(0..FLEET_RESOURCES.len())].to_string()
    };
    let provider = if rng.gen_bool(unknown_provider_rate.clamp(0.0, 1.0)) {
        "UNKNOWN"
    } else {
        ["PROVIDER_A", "PROVIDER_B", "PROVIDER_C"][rng.gen_range(0..3)]
    };

    AlarmPayload::named(name)
        .with("severity", format!("{severity:?}"))
        .with("provider", provider)
        .with("NewStateReason", format!("synthetic alarm #{n}"))
        .with_dimension("ServiceName", target)
}

/// Approve or deny pending requests until aborted
async fn operator_loop(orchestrator: Orchestrator, seed: u64, approve_rate: f64) {
    let mut rng = StdRng::seed_from_u64(seed);
    loop {
        let request = orchestrator.next_pending_approval().await;
        if rng.gen_bool(approve_rate.clamp(0.0, 1.0)) {
            orchestrator.approve(request.incident_id);
        } else {
            orchestrator.deny(request.incident_id);
        }
    }
}

/// Run the simulator
///
/// # Errors
/// Returns error if the orchestrator cannot be built
pub async fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, OrchestratorError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let orchestrator = Orchestrator::builder(
        OrchestratorConfig::default()
            .with_approval_mode(config.approval_mode)
            .with_settle_delay_ms(config.settle_delay_ms),
    )
    .capabilities(simulated_fleet(FLEET_RESOURCES))
    .probe(Arc::new(RandomProbe::new(config.seed, config.success_rate)))
    .build()?;

    let operator = (config.approval_mode == ApprovalMode::Copilot).then(|| {
        tokio::spawn(operator_loop(
            orchestrator.clone(),
            config.seed.wrapping_add(1),
            config.approve_rate,
        ))
    });

    for n in 0..config.incidents {
        orchestrator.ingest(synthetic_alarm(&mut rng, n, config.unknown_provider_rate))?;
    }
    let incidents = orchestrator.wait_all().await;
    if let Some(operator) = operator {
        operator.abort();
    }

    let mut stats = SimulatorStats {
        incidents: incidents.len(),
        ..SimulatorStats::default()
    };
    let mut violations = Vec::new();

    for incident in &incidents {
        match incident.state {
            IncidentState::Resolved => {
                stats.resolved += 1;
                if incident.actions.iter().any(|a| a.fallback) {
                    stats.self_corrected += 1;
                }
            }
            IncidentState::Failed => stats.failed += 1,
            IncidentState::Rejected => stats.rejected += 1,
            _ => {}
        }
        stats.actions += incident.actions.len();
        stats.simulated_successes += incident
            .actions
            .iter()
            .filter(|a| a.outcome == ActionOutcome::SimulatedSuccess)
            .count();

        if incident.actions.len() > MAX_ACTIONS_PER_INCIDENT {
            violations.push(Violation::TooManyActions {
                incident: incident.id,
                count: incident.actions.len(),
            });
        }
        let path = incident.path();
        if !is_complete_path(&path) {
            violations.push(Violation::InvalidPath {
                incident: incident.id,
                path,
            });
        }
        if incident.actions.first().is_some_and(|a| a.fallback) {
            violations.push(Violation::OrphanFallback { incident: incident.id });
        }
    }

    let audit = orchestrator.verify_audit();
    stats.audit_entries = orchestrator.audit_log().len();
    if !audit.valid {
        violations.push(Violation::AuditChainBroken {
            broken_at: audit.broken_at,
        });
    }

    tracing::info!(
        seed = config.seed,
        incidents = stats.incidents,
        violations = violations.len(),
        "simulation finished"
    );

    Ok(SimulatorReport {
        config,
        stats,
        violations,
        audit,
    })
}
