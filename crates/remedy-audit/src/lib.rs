//! Remedy Audit - tamper-evident event ledger
//!
//! Every state transition and action taken while remediating an incident is
//! recorded here:
//! - [`AuditChain`]: append-only, SHA-256 hash-linked entries
//! - [`verify_entries`]: independent verifier, reports the first broken index
//! - [`AuditSink`]: best-effort mirrors (tracing, JSON-lines file, recent view)
//!
//! # Example
//!
//! ```rust
//! use remedy_audit::{AuditChain, AuditEvent};
//!
//! let chain = AuditChain::new();
//! chain.append(AuditEvent::new("orchestrator", "inc-1", "transition", "DETECTED -> PLANNING"))?;
//! assert!(chain.verify().valid);
//! # Ok::<(), remedy_audit::AuditError>(())
//! ```

pub mod chain;
pub mod entry;
pub mod error;
pub mod hash;
pub mod sink;

pub use chain::{verify_entries, AuditChain, ChainVerification};
pub use entry::{AuditEntry, AuditEvent};
pub use error::AuditError;
pub use hash::{ChainHash, HashError};
pub use sink::{read_jsonl, AuditSink, JsonlFileSink, RecentEvents, TracingSink};
