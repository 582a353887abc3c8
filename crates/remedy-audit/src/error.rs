//! Error types for the audit chain

/// Audit chain errors
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Canonical serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading or writing a persisted log failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted log line could not be parsed
    #[error("malformed log line {line}: {source}")]
    MalformedLine {
        /// 1-based line number
        line: usize,
        /// Parse failure
        source: serde_json::Error,
    },
}
