//! Audit entries and their canonical hashing

use crate::error::AuditError;
use crate::hash::ChainHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event to be recorded, before it is linked into the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Who performed the action (`orchestrator`, `operator`, a provider name)
    pub actor: String,
    /// What the action was performed on (usually an incident id)
    pub resource: String,
    /// Action verb (`transition`, `dispatch`, `approval`, ...)
    pub action: String,
    /// Outcome or detail
    pub result: String,
}

impl AuditEvent {
    /// Create new event
    #[inline]
    pub fn new(
        actor: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.into(),
            resource: resource.into(),
            action: action.into(),
            result: result.into(),
        }
    }

    /// Event that corrects an earlier entry
    ///
    /// Entries are never edited; a correction is a new entry that points back
    /// at the sequence number it supersedes.
    pub fn compensating(
        of_sequence: u64,
        actor: impl Into<String>,
        resource: impl Into<String>,
        correction: impl Into<String>,
    ) -> Self {
        Self::new(
            actor,
            resource,
            "compensate",
            format!("supersedes #{of_sequence}: {}", correction.into()),
        )
    }
}

/// A record in the audit chain
///
/// `hash` covers every other field, including `previous_hash`, so changing any
/// stored field breaks verification at this entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the chain, starting at 0
    pub sequence: u64,
    /// Append time
    pub timestamp: DateTime<Utc>,
    /// Who performed the action
    pub actor: String,
    /// What the action was performed on
    pub resource: String,
    /// Action verb
    pub action: String,
    /// Outcome or detail
    pub result: String,
    /// Hash of the preceding entry (genesis for the first)
    pub previous_hash: ChainHash,
    /// Digest over all fields above
    pub hash: ChainHash,
}

/// Fixed-order view of the hashed fields
///
/// serde_json emits struct fields in declaration order, which makes this the
/// deterministic serialization every verifier recomputes.
#[derive(Serialize)]
struct HashInput<'a> {
    sequence: u64,
    timestamp: &'a DateTime<Utc>,
    actor: &'a str,
    resource: &'a str,
    action: &'a str,
    result: &'a str,
    previous_hash: &'a ChainHash,
}

impl AuditEntry {
    /// Link an event after `previous_hash` and seal it
    ///
    /// # Errors
    /// Returns error if the canonical form cannot be serialized
    pub fn seal(
        sequence: u64,
        timestamp: DateTime<Utc>,
        event: AuditEvent,
        previous_hash: ChainHash,
    ) -> Result<Self, AuditError> {
        let mut entry = Self {
            sequence,
            timestamp,
            actor: event.actor,
            resource: event.resource,
            action: event.action,
            result: event.result,
            previous_hash,
            hash: ChainHash::GENESIS,
        };
        entry.hash = entry.compute_hash()?;
        Ok(entry)
    }

    /// Recompute the digest from the stored fields
    ///
    /// # Errors
    /// Returns error if the canonical form cannot be serialized
    pub fn compute_hash(&self) -> Result<ChainHash, AuditError> {
        let input = HashInput {
            sequence: self.sequence,
            timestamp: &self.timestamp,
            actor: &self.actor,
            resource: &self.resource,
            action: &self.action,
            result: &self.result,
            previous_hash: &self.previous_hash,
        };
        let bytes = serde_json::to_vec(&input)?;
        Ok(ChainHash::compute(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuditEntry {
        AuditEntry::seal(
            0,
            Utc::now(),
            AuditEvent::new("orchestrator", "inc-1", "transition", "DETECTED -> PLANNING"),
            ChainHash::GENESIS,
        )
        .unwrap()
    }

    #[test]
    fn seal_produces_recomputable_hash() {
        let entry = sample();
        assert_eq!(entry.compute_hash().unwrap(), entry.hash);
    }

    #[test]
    fn every_field_is_covered_by_hash() {
        let base = sample();

        let mut e = base.clone();
        e.actor.push('x');
        assert_ne!(e.compute_hash().unwrap(), base.hash);

        let mut e = base.clone();
        e.result = "tampered".to_string();
        assert_ne!(e.compute_hash().unwrap(), base.hash);

        let mut e = base.clone();
        e.sequence = 7;
        assert_ne!(e.compute_hash().unwrap(), base.hash);

        let mut e = base.clone();
        e.previous_hash = ChainHash::compute(b"other");
        assert_ne!(e.compute_hash().unwrap(), base.hash);

        let mut e = base.clone();
        e.timestamp += chrono::Duration::milliseconds(1);
        assert_ne!(e.compute_hash().unwrap(), base.hash);
    }

    #[test]
    fn hash_survives_json_round_trip() {
        let entry = sample();
        let json = serde_json::to_string(&entry).unwrap();
        let decoded: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.compute_hash().unwrap(), entry.hash);
    }

    #[test]
    fn compensating_event_references_sequence() {
        let event = AuditEvent::compensating(4, "operator", "inc-1", "wrong target recorded");
        assert_eq!(event.action, "compensate");
        assert!(event.result.starts_with("supersedes #4"));
    }
}
