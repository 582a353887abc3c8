//! The append-only audit chain
//!
//! A single mutex serializes appends, so the chain order is a strict global
//! total order. Sinks are notified while that lock is held and therefore see
//! entries in chain order; they must return quickly and swallow their own
//! failures. Sinks that do I/O hand the entry off to their own writer.

use crate::entry::{AuditEntry, AuditEvent};
use crate::error::AuditError;
use crate::hash::ChainHash;
use crate::sink::AuditSink;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of walking a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// True iff every link and every digest checks out
    pub valid: bool,
    /// Number of entries inspected
    pub entries_checked: usize,
    /// Index of the first entry that failed
    pub broken_at: Option<usize>,
}

impl ChainVerification {
    fn ok(entries_checked: usize) -> Self {
        Self {
            valid: true,
            entries_checked,
            broken_at: None,
        }
    }

    fn broken(index: usize) -> Self {
        Self {
            valid: false,
            entries_checked: index + 1,
            broken_at: Some(index),
        }
    }
}

/// Verify a sequence of entries independently of any chain instance
///
/// Fails at the first index where `previous_hash` does not equal the prior
/// entry's `hash`, or where the recomputed digest differs from the stored one.
#[must_use]
pub fn verify_entries(entries: &[AuditEntry]) -> ChainVerification {
    let mut prev = ChainHash::GENESIS;
    for (index, entry) in entries.iter().enumerate() {
        if entry.previous_hash != prev {
            return ChainVerification::broken(index);
        }
        match entry.compute_hash() {
            Ok(expected) if expected == entry.hash => {}
            _ => return ChainVerification::broken(index),
        }
        prev = entry.hash;
    }
    ChainVerification::ok(entries.len())
}

#[derive(Debug, Default)]
struct ChainInner {
    entries: Vec<AuditEntry>,
    last_hash: ChainHash,
}

/// Hash-linked, append-only event ledger
///
/// There is deliberately no API to edit or remove an entry.
#[derive(Default)]
pub struct AuditChain {
    inner: Mutex<ChainInner>,
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditChain")
            .field("len", &self.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl AuditChain {
    /// Create an empty chain with no sinks
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink that receives a copy of every appended entry
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Append an event and return the new entry's hash
    ///
    /// # Errors
    /// Returns error if the entry cannot be serialized for hashing; the chain
    /// is left unchanged in that case.
    pub fn append(&self, event: AuditEvent) -> Result<ChainHash, AuditError> {
        let mut guard = self.inner.lock();
        let sequence = guard.entries.len() as u64;
        let entry = AuditEntry::seal(sequence, Utc::now(), event, guard.last_hash)?;
        let hash = entry.hash;

        for sink in &self.sinks {
            sink.deliver(&entry);
        }

        guard.last_hash = hash;
        guard.entries.push(entry);
        Ok(hash)
    }

    /// Walk the chain and report the first broken index, if any
    #[must_use]
    pub fn verify(&self) -> ChainVerification {
        verify_entries(&self.inner.lock().entries)
    }

    /// Snapshot of all entries in chain order
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().entries.clone()
    }

    /// Entries recorded against one resource, in chain order
    #[must_use]
    pub fn entries_for(&self, resource: &str) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.resource == resource)
            .cloned()
            .collect()
    }

    /// Hash of the most recent entry (genesis when empty)
    #[must_use]
    pub fn last_hash(&self) -> ChainHash {
        self.inner.lock().last_hash
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether no entry has been appended yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecentEvents;

    fn event(n: usize) -> AuditEvent {
        AuditEvent::new("orchestrator", format!("inc-{}", n % 3), "transition", format!("step {n}"))
    }

    #[test]
    fn empty_chain_is_valid() {
        let chain = AuditChain::new();
        let report = chain.verify();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 0);
        assert!(chain.last_hash().is_genesis());
    }

    #[test]
    fn append_links_entries() {
        let chain = AuditChain::new();
        let h0 = chain.append(event(0)).unwrap();
        let h1 = chain.append(event(1)).unwrap();

        let entries = chain.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].previous_hash.is_genesis());
        assert_eq!(entries[0].hash, h0);
        assert_eq!(entries[1].previous_hash, h0);
        assert_eq!(entries[1].sequence, 1);
        assert_eq!(chain.last_hash(), h1);
        assert!(chain.verify().valid);
    }

    #[test]
    fn tampering_with_stored_entry_is_detected_at_its_index() {
        let chain = AuditChain::new();
        for n in 0..5 {
            chain.append(event(n)).unwrap();
        }

        chain.inner.lock().entries[2].result = "RESOLVED".to_string();

        let report = chain.verify();
        assert!(!report.valid);
        assert_eq!(report.broken_at, Some(2));
    }

    #[test]
    fn rehashed_tampering_breaks_next_link() {
        let chain = AuditChain::new();
        for n in 0..4 {
            chain.append(event(n)).unwrap();
        }

        {
            let mut guard = chain.inner.lock();
            let entry = &mut guard.entries[1];
            entry.actor = "intruder".to_string();
            entry.hash = entry.compute_hash().unwrap();
        }

        assert_eq!(chain.verify().broken_at, Some(2));
    }

    #[test]
    fn entries_for_filters_by_resource() {
        let chain = AuditChain::new();
        for n in 0..6 {
            chain.append(event(n)).unwrap();
        }
        let only = chain.entries_for("inc-1");
        assert_eq!(only.len(), 2);
        assert!(only.iter().all(|e| e.resource == "inc-1"));
        assert!(only[0].sequence < only[1].sequence);
    }

    #[test]
    fn sinks_observe_chain_order() {
        let recent = Arc::new(RecentEvents::new(10));
        let chain = AuditChain::new().with_sink(recent.clone());
        for n in 0..3 {
            chain.append(event(n)).unwrap();
        }
        let seen: Vec<u64> = recent.snapshot().iter().map(|e| e.sequence).collect();
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
