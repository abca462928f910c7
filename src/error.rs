//! Error types for the Drive Sparing Engine
//!
//! Provides structured error types for every engine component including
//! the topology gateway, confirmation waits, spare selection, validation
//! and the job phase orchestrator.

use crate::sparing::taxonomy::{internal_error_to_job_error, InternalError, JobError};
use thiserror::Error;

/// Unified error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration value out of range: {field}={value} (allowed {min}..={max})")]
    ConfigValue {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    // =========================================================================
    // Gateway Errors
    // =========================================================================
    #[error("Gateway operation failed: {operation} on object {object_id}: {reason}")]
    Gateway {
        operation: &'static str,
        object_id: u32,
        reason: String,
    },

    #[error("Object not found: {object_id}")]
    ObjectNotFound { object_id: u32 },

    #[error("Transaction {transaction_id} is not open")]
    TransactionNotOpen { transaction_id: u64 },

    // =========================================================================
    // Wait Errors
    // =========================================================================
    #[error("Timed out waiting for {what} on object {object_id} after {waited_secs}s")]
    Timeout {
        what: &'static str,
        object_id: u32,
        waited_secs: u32,
    },

    #[error("Wait for {what} on object {object_id} aborted: {reason}")]
    WaitTransport {
        what: &'static str,
        object_id: u32,
        reason: String,
    },

    #[error("Invalid edge index {edge_index} for object {object_id}")]
    InvalidEdgeIndex { object_id: u32, edge_index: u32 },

    // =========================================================================
    // Selection Errors
    // =========================================================================
    #[error("No spares available for virtual drive {vd_object_id}")]
    NoSparesAvailable { vd_object_id: u32 },

    #[error("No suitable spare for virtual drive {vd_object_id}")]
    NoSuitableSpare { vd_object_id: u32 },

    #[error("Invalid drive type: {0}")]
    InvalidDriveType(String),

    #[error("Invalid performance tier: {0}")]
    InvalidTier(usize),

    // =========================================================================
    // Job Errors
    // =========================================================================
    #[error("Validation failed: {job_error}")]
    Validation { job_error: JobError },

    #[error("Job failed: {job_error}")]
    JobFailed { job_error: JobError },

    #[error("Phase {phase} is not valid after {previous}")]
    PhaseOrder { phase: String, previous: String },

    #[error("Unsupported event code: {0}")]
    UnsupportedEvent(String),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action the job runner takes when a phase returns an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Undo the in-memory change and report failure
    Rollback,
    /// Condition is presently true; the requester may raise the job again later
    RetryLater,
    /// Request can never succeed as issued
    Abandon,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Spare pool conditions change as drives are inserted or freed
            Error::NoSparesAvailable { .. } | Error::NoSuitableSpare { .. } => {
                ErrorAction::RetryLater
            }

            Error::Validation { job_error } | Error::JobFailed { job_error } => {
                if job_error.is_presently() {
                    ErrorAction::RetryLater
                } else {
                    ErrorAction::Rollback
                }
            }

            // Bad input or programming errors
            Error::Configuration(_)
            | Error::ConfigValue { .. }
            | Error::InvalidDriveType(_)
            | Error::InvalidTier(_)
            | Error::PhaseOrder { .. }
            | Error::UnsupportedEvent(_)
            | Error::YamlParse(_)
            | Error::JsonParse(_) => ErrorAction::Abandon,

            _ => ErrorAction::Rollback,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::Abandon)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. }
                | Error::WaitTransport { .. }
                | Error::Gateway { .. }
                | Error::TransactionNotOpen { .. }
        )
    }

    /// Engine-local error code for failures the taxonomy names
    pub fn internal_code(&self) -> Option<InternalError> {
        match self {
            Error::NoSparesAvailable { .. } => Some(InternalError::NoSpareAvailable),
            Error::NoSuitableSpare { .. } => Some(InternalError::NoSuitableSpare),
            Error::InvalidEdgeIndex { .. } => Some(InternalError::InvalidEdgeIndex),
            Error::UnsupportedEvent(_) => Some(InternalError::UnsupportedEventCode),
            _ => None,
        }
    }

    /// Job-level error code reported for this failure
    pub fn job_error(&self) -> JobError {
        match self {
            Error::Validation { job_error } | Error::JobFailed { job_error } => *job_error,
            _ => match self.internal_code() {
                Some(code) => internal_error_to_job_error(code, JobError::InternalError),
                None => JobError::InternalError,
            },
        }
    }

    /// Helper for gateway failures
    pub fn gateway(operation: &'static str, object_id: u32, reason: impl Into<String>) -> Self {
        Error::Gateway {
            operation,
            object_id,
            reason: reason.into(),
        }
    }
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::NoSuitableSpare { vd_object_id: 0x10c };
        assert_eq!(err.action(), ErrorAction::RetryLater);

        let err = Error::Configuration("bad config".into());
        assert_eq!(err.action(), ErrorAction::Abandon);

        let err = Error::Timeout {
            what: "swap-in",
            object_id: 0x10c,
            waited_secs: 6,
        };
        assert_eq!(err.action(), ErrorAction::Rollback);

        let err = Error::Validation {
            job_error: JobError::PresentlyRaidGroupDegraded,
        };
        assert_eq!(err.action(), ErrorAction::RetryLater);

        let err = Error::Validation {
            job_error: JobError::InvalidEdgeIndex,
        };
        assert_eq!(err.action(), ErrorAction::Rollback);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::gateway("create_edge", 0x10c, "topology busy");
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let config_err = Error::ConfigValue {
            field: "operation_timeout_secs",
            value: 0,
            min: 1,
            max: 600,
        };
        assert!(!config_err.is_retryable());
        assert!(!config_err.is_transient());
    }

    #[test]
    fn test_job_error_translation() {
        let err = Error::NoSparesAvailable { vd_object_id: 0x10c };
        assert_eq!(err.internal_code(), Some(InternalError::NoSpareAvailable));
        assert_eq!(err.job_error(), JobError::PresentlyNoSparesAvailable);

        let err = Error::JobFailed {
            job_error: JobError::SwapCreateEdgeFailed,
        };
        assert_eq!(err.job_error(), JobError::SwapCreateEdgeFailed);

        let err = Error::Timeout {
            what: "config mode",
            object_id: 0x10c,
            waited_secs: 6,
        };
        assert_eq!(err.internal_code(), None);
        assert_eq!(err.job_error(), JobError::InternalError);
    }
}
