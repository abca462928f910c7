//! Error Taxonomy
//!
//! The first two tiers of failure classification: engine-local internal
//! errors and the job-level error codes stored in the job record and
//! surfaced in notifications. The third tier (event codes) lives in
//! [`crate::sparing::event_log`].

use serde::{Deserialize, Serialize};

// =============================================================================
// Job Error Codes
// =============================================================================

/// Job-level error code reported to the requester
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobError {
    NoError,
    InternalError,
    SwapStatusNotPopulated,
    SwapValidationFail,
    InvalidSwapCommand,
    InvalidVirtualDriveObjectId,
    InvalidOriginalObjectId,
    InvalidEdgeIndex,
    InvalidPermSpareEdgeIndex,
    InvalidProactiveSpareEdgeIndex,
    InvalidSpareObjectId,
    SwapUnexpectedError,
    SwapVirtualDriveBroken,
    SwapCurrentVdConfigModeDoesntSupport,
    PvdInvalidConfigType,
    SwapCreateEdgeFailed,
    SwapDestroyEdgeFailed,
    UnsupportedEventCode,
    EncryptionInProgress,
    SpareRaidGroupUnconsumed,
    SpareRaidGroupNotRedundant,
    SpareRaidGroupDestroyed,
    PresentlyRaidGroupBroken,
    PresentlyRaidGroupDegraded,
    PresentlyRaidGroupHasCopyInProgress,
    PresentlySourceDriveDegraded,
    PresentlyRaidGroupDenied,
    PresentlyNoSparesAvailable,
    PresentlyNoSuitableSpare,
    ProactiveSpareNotRequired,
    PermanentSpareNotRequired,
    InvalidDesiredSpareDriveType,
    SwapCopySourceDriveRemoved,
    SwapCopyDestinationDriveRemoved,
    SwapCopyInvalidDestinationDrive,
    SwapCopyDestinationDriveNotHealthy,
    SwapCopyDestinationHasUpstreamRaidGroup,
    OffsetMismatch,
    SysDriveMismatch,
    BlockSizeMismatch,
    CapacityMismatch,
    SpareNotReady,
    SpareRemoved,
    SpareBusy,
    InvalidValue,
    NullCommand,
}

impl JobError {
    /// Every variant, in declaration order
    pub const ALL: [JobError; 46] = [
        JobError::NoError,
        JobError::InternalError,
        JobError::SwapStatusNotPopulated,
        JobError::SwapValidationFail,
        JobError::InvalidSwapCommand,
        JobError::InvalidVirtualDriveObjectId,
        JobError::InvalidOriginalObjectId,
        JobError::InvalidEdgeIndex,
        JobError::InvalidPermSpareEdgeIndex,
        JobError::InvalidProactiveSpareEdgeIndex,
        JobError::InvalidSpareObjectId,
        JobError::SwapUnexpectedError,
        JobError::SwapVirtualDriveBroken,
        JobError::SwapCurrentVdConfigModeDoesntSupport,
        JobError::PvdInvalidConfigType,
        JobError::SwapCreateEdgeFailed,
        JobError::SwapDestroyEdgeFailed,
        JobError::UnsupportedEventCode,
        JobError::EncryptionInProgress,
        JobError::SpareRaidGroupUnconsumed,
        JobError::SpareRaidGroupNotRedundant,
        JobError::SpareRaidGroupDestroyed,
        JobError::PresentlyRaidGroupBroken,
        JobError::PresentlyRaidGroupDegraded,
        JobError::PresentlyRaidGroupHasCopyInProgress,
        JobError::PresentlySourceDriveDegraded,
        JobError::PresentlyRaidGroupDenied,
        JobError::PresentlyNoSparesAvailable,
        JobError::PresentlyNoSuitableSpare,
        JobError::ProactiveSpareNotRequired,
        JobError::PermanentSpareNotRequired,
        JobError::InvalidDesiredSpareDriveType,
        JobError::SwapCopySourceDriveRemoved,
        JobError::SwapCopyDestinationDriveRemoved,
        JobError::SwapCopyInvalidDestinationDrive,
        JobError::SwapCopyDestinationDriveNotHealthy,
        JobError::SwapCopyDestinationHasUpstreamRaidGroup,
        JobError::OffsetMismatch,
        JobError::SysDriveMismatch,
        JobError::BlockSizeMismatch,
        JobError::CapacityMismatch,
        JobError::SpareNotReady,
        JobError::SpareRemoved,
        JobError::SpareBusy,
        JobError::InvalidValue,
        JobError::NullCommand,
    ];

    /// Conditions that are expected to clear on their own. Internally raised
    /// requests repeat while they hold, so their event logs are suppressed.
    pub fn is_presently(&self) -> bool {
        matches!(
            self,
            JobError::PresentlyNoSparesAvailable
                | JobError::PresentlyNoSuitableSpare
                | JobError::PresentlyRaidGroupDenied
                | JobError::PresentlyRaidGroupDegraded
                | JobError::PresentlyRaidGroupBroken
                | JobError::PresentlyRaidGroupHasCopyInProgress
                | JobError::PresentlySourceDriveDegraded
        )
    }

    /// Structural refusal by the upstream raid group
    pub fn is_topology_denied(&self) -> bool {
        matches!(
            self,
            JobError::SpareRaidGroupNotRedundant
                | JobError::SpareRaidGroupUnconsumed
                | JobError::PresentlyRaidGroupDegraded
                | JobError::PresentlyRaidGroupHasCopyInProgress
                | JobError::PresentlyRaidGroupDenied
        )
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, JobError::NoError)
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// Internal Error Codes
// =============================================================================

/// Engine-local error, set by whichever component first detects it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InternalError {
    Invalid,
    None,
    NoSpareAvailable,
    NoSuitableSpare,
    UnexpectedJobStatus,
    SwapInValidationFail,
    InvalidSwapCommandType,
    InvalidVirtualDriveObjectId,
    InvalidEdgeIndex,
    InvalidVirtualDriveConfigMode,
    InvalidProvisionDriveConfigMode,
    InvalidSpareObjectId,
    CreateEdgeFailed,
    DestroyEdgeFailed,
    UnsupportedEventCode,
    RaidGroupDenied,
}

impl InternalError {
    /// Every variant, in declaration order
    pub const ALL: [InternalError; 16] = [
        InternalError::Invalid,
        InternalError::None,
        InternalError::NoSpareAvailable,
        InternalError::NoSuitableSpare,
        InternalError::UnexpectedJobStatus,
        InternalError::SwapInValidationFail,
        InternalError::InvalidSwapCommandType,
        InternalError::InvalidVirtualDriveObjectId,
        InternalError::InvalidEdgeIndex,
        InternalError::InvalidVirtualDriveConfigMode,
        InternalError::InvalidProvisionDriveConfigMode,
        InternalError::InvalidSpareObjectId,
        InternalError::CreateEdgeFailed,
        InternalError::DestroyEdgeFailed,
        InternalError::UnsupportedEventCode,
        InternalError::RaidGroupDenied,
    ];
}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// Internal -> Job Error Table
// =============================================================================

/// Target of an internal error translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorMapping {
    Code(JobError),
    /// Keep whatever status the request already carries
    RequestStatus,
}

/// Fixed internal -> job error table
pub const INTERNAL_TO_JOB_ERROR: [(InternalError, JobErrorMapping); 16] = [
    (InternalError::Invalid, JobErrorMapping::Code(JobError::SwapStatusNotPopulated)),
    (InternalError::None, JobErrorMapping::Code(JobError::NoError)),
    (InternalError::NoSpareAvailable, JobErrorMapping::Code(JobError::PresentlyNoSparesAvailable)),
    (InternalError::NoSuitableSpare, JobErrorMapping::Code(JobError::PresentlyNoSuitableSpare)),
    (InternalError::UnexpectedJobStatus, JobErrorMapping::RequestStatus),
    (InternalError::SwapInValidationFail, JobErrorMapping::Code(JobError::SwapValidationFail)),
    (InternalError::InvalidSwapCommandType, JobErrorMapping::Code(JobError::InvalidSwapCommand)),
    (
        InternalError::InvalidVirtualDriveObjectId,
        JobErrorMapping::Code(JobError::InvalidVirtualDriveObjectId),
    ),
    (InternalError::InvalidEdgeIndex, JobErrorMapping::Code(JobError::InvalidEdgeIndex)),
    (
        InternalError::InvalidVirtualDriveConfigMode,
        JobErrorMapping::Code(JobError::SwapCurrentVdConfigModeDoesntSupport),
    ),
    (
        InternalError::InvalidProvisionDriveConfigMode,
        JobErrorMapping::Code(JobError::PvdInvalidConfigType),
    ),
    (InternalError::InvalidSpareObjectId, JobErrorMapping::Code(JobError::InvalidSpareObjectId)),
    (InternalError::CreateEdgeFailed, JobErrorMapping::Code(JobError::SwapCreateEdgeFailed)),
    (InternalError::DestroyEdgeFailed, JobErrorMapping::Code(JobError::SwapDestroyEdgeFailed)),
    (InternalError::UnsupportedEventCode, JobErrorMapping::Code(JobError::UnsupportedEventCode)),
    (InternalError::RaidGroupDenied, JobErrorMapping::Code(JobError::PresentlyRaidGroupDenied)),
];

/// Translate an internal error into the job error vocabulary.
/// `request_status` is the status already carried by the request.
pub fn internal_error_to_job_error(internal: InternalError, request_status: JobError) -> JobError {
    let mapping = INTERNAL_TO_JOB_ERROR
        .iter()
        .find(|(code, _)| *code == internal)
        .map(|(_, mapping)| *mapping)
        .unwrap_or(JobErrorMapping::Code(JobError::InternalError));

    match mapping {
        JobErrorMapping::Code(code) => code,
        JobErrorMapping::RequestStatus => request_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_internal_table_is_exhaustive() {
        let mapped: HashSet<InternalError> =
            INTERNAL_TO_JOB_ERROR.iter().map(|(code, _)| *code).collect();
        assert_eq!(mapped.len(), INTERNAL_TO_JOB_ERROR.len(), "duplicate table entry");
        for code in InternalError::ALL {
            assert!(mapped.contains(&code), "{} has no job error mapping", code);
        }
    }

    #[test]
    fn test_internal_to_job_mapping() {
        assert_eq!(
            internal_error_to_job_error(InternalError::NoSpareAvailable, JobError::NoError),
            JobError::PresentlyNoSparesAvailable
        );
        assert_eq!(
            internal_error_to_job_error(InternalError::Invalid, JobError::NoError),
            JobError::SwapStatusNotPopulated
        );
        assert_eq!(
            internal_error_to_job_error(
                InternalError::InvalidVirtualDriveConfigMode,
                JobError::NoError
            ),
            JobError::SwapCurrentVdConfigModeDoesntSupport
        );
    }

    #[test]
    fn test_unexpected_status_keeps_request_status() {
        assert_eq!(
            internal_error_to_job_error(
                InternalError::UnexpectedJobStatus,
                JobError::SwapVirtualDriveBroken
            ),
            JobError::SwapVirtualDriveBroken
        );
    }

    #[test]
    fn test_presently_codes() {
        assert!(JobError::PresentlyNoSuitableSpare.is_presently());
        assert!(JobError::PresentlySourceDriveDegraded.is_presently());
        assert!(!JobError::SpareRaidGroupNotRedundant.is_presently());
        assert!(JobError::SpareRaidGroupNotRedundant.is_topology_denied());
    }
}
