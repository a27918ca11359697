use thiserror::Error;
use transpage_storage::{ErrorKind as StorageErrorKind, StorageError};

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Malformed unit payload: {0}")]
    MalformedUnitPayload(String),

    #[error("Replication wait timed out after {0}ms")]
    ReplicationTimeout(u64),

    #[error("Bundle type mismatch: expected {expected}, got {found}")]
    BundleTypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Purge failed for {page}: {reason}")]
    PurgeFailure { page: String, reason: String },

    #[error("Cache invalidation failed for {scope}: {reason}")]
    CacheInvalidationFailure { scope: String, reason: String },

    #[error("Unit update failed for {unit} ({applied} of {total} applied): {reason}")]
    UnitUpdateFailed {
        unit: String,
        applied: usize,
        total: usize,
        reason: String,
    },

    #[error("Message group not found: {0}")]
    GroupNotFound(String),

    #[error("Page is not translatable: {0}")]
    NotTranslatable(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("No handler registered for job kind {0}")]
    HandlerNotRegistered(String),

    #[error("Job {job} failed: {reason}")]
    JobFailed { job: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    /// Map a storage decode failure onto the unit payload variant.
    pub fn from_decode(err: StorageError) -> Self {
        match err.kind {
            StorageErrorKind::MalformedPayload => Self::MalformedUnitPayload(err.message),
            _ => Self::Storage(err),
        }
    }

    /// Retry classification used by the job runner.
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::Storage(e) if e.is_transient() => ErrorCategory::Transient,
            OrchestratorError::Storage(_) => ErrorCategory::Permanent,
            OrchestratorError::UnitUpdateFailed { .. }
            | OrchestratorError::ReplicationTimeout(_)
            | OrchestratorError::PurgeFailure { .. }
            | OrchestratorError::CacheInvalidationFailure { .. }
            | OrchestratorError::JobFailed { .. } => ErrorCategory::Transient,
            OrchestratorError::Io(_) => ErrorCategory::Infrastructure,
            OrchestratorError::HandlerNotRegistered(_) | OrchestratorError::Config(_) => {
                ErrorCategory::Infrastructure
            }
            OrchestratorError::MalformedUnitPayload(_)
            | OrchestratorError::BundleTypeMismatch { .. }
            | OrchestratorError::GroupNotFound(_)
            | OrchestratorError::NotTranslatable(_)
            | OrchestratorError::InvalidStateTransition { .. }
            | OrchestratorError::Serialization(_)
            | OrchestratorError::Yaml(_)
            | OrchestratorError::Parse(_) => ErrorCategory::Permanent,
            // Opaque handler errors get another attempt
            OrchestratorError::Other(_) => ErrorCategory::Transient,
        }
    }
}

/// Error category for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Transient error - retry automatically (e.g., lock contention, lost connection)
    Transient,
    /// Permanent error - don't retry (e.g., malformed payload, wrong bundle)
    Permanent,
    /// Infrastructure error - alert ops (e.g., missing handler, disk full)
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(OrchestratorError::parse(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_roundtrip() {
        for category in &[
            ErrorCategory::Transient,
            ErrorCategory::Permanent,
            ErrorCategory::Infrastructure,
        ] {
            let s = category.as_str();
            let parsed = ErrorCategory::from_str(s).unwrap();
            assert_eq!(*category, parsed);
        }
    }

    #[test]
    fn test_error_category_invalid() {
        assert!(ErrorCategory::from_str("invalid").is_err());
    }

    #[test]
    fn test_storage_errors_follow_transience() {
        let transient: OrchestratorError = StorageError::unavailable("lock timeout").into();
        let permanent: OrchestratorError = StorageError::not_found("Welcome").into();

        assert_eq!(transient.category(), ErrorCategory::Transient);
        assert_eq!(permanent.category(), ErrorCategory::Permanent);
    }

    #[test]
    fn test_decode_error_becomes_malformed_payload() {
        let err = OrchestratorError::from_decode(StorageError::malformed_payload("bad"));
        assert!(matches!(err, OrchestratorError::MalformedUnitPayload(ref m) if m == "bad"));
        assert_eq!(err.category(), ErrorCategory::Permanent);
    }

    #[test]
    fn test_bundle_mismatch_is_permanent() {
        let err = OrchestratorError::BundleTypeMismatch {
            expected: "translatable page",
            found: "message bundle",
        };
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert!(err.to_string().contains("expected translatable page"));
    }
}
