//! Post-action verification probes

use crate::types::{ActionResult, IncidentId};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Checks whether the target recovered after an action
#[async_trait]
pub trait VerificationProbe: Send + Sync {
    /// `true` if the incident's symptom is gone
    async fn verify(&self, incident_id: IncidentId, action: &ActionResult) -> bool;
}

/// Probe that always reports recovery
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysHealthy;

#[async_trait]
impl VerificationProbe for AlwaysHealthy {
    async fn verify(&self, _incident_id: IncidentId, _action: &ActionResult) -> bool {
        true
    }
}

/// Seeded probe passing with a fixed probability
///
/// Deterministic for a given seed and call order; used by the simulator.
#[derive(Debug)]
pub struct RandomProbe {
    success_rate: f64,
    rng: Mutex<StdRng>,
}

impl RandomProbe {
    /// Probe passing with `success_rate` (clamped to [0, 1])
    #[must_use]
    pub fn new(seed: u64, success_rate: f64) -> Self {
        Self {
            success_rate: if success_rate.is_nan() {
                0.0
            } else {
                success_rate.clamp(0.0, 1.0)
            },
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Configured pass probability
    #[inline]
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        self.success_rate
    }
}

#[async_trait]
impl VerificationProbe for RandomProbe {
    async fn verify(&self, incident_id: IncidentId, action: &ActionResult) -> bool {
        let passed = self.rng.lock().gen_bool(self.success_rate);
        tracing::debug!(incident = %incident_id, action = %action.action, passed, "random probe");
        passed
    }
}
