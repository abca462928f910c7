//! Event Log Translator
//!
//! Third tier of the failure taxonomy: job error codes become event codes,
//! each with a fixed parameter layout built from drive locations and serial
//! numbers. Requests raised by the array itself do not log the transient
//! "presently" conditions, which would otherwise repeat on every retry.

use crate::domain::ports::{EventLogRef, TopologyServiceRef};
use crate::domain::types::*;
use crate::error::{Error, Result};
use crate::sparing::metrics::SparingMetrics;
use crate::sparing::taxonomy::{internal_error_to_job_error, InternalError, JobError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// =============================================================================
// Event Codes
// =============================================================================

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

/// Parameter layout of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFormat {
    /// Original drive port, enclosure, slot
    OriginalLocation,
    /// Destination drive port, enclosure, slot
    DestinationLocation,
    /// Destination location then original location
    DestinationAndOriginal,
    /// Destination location and serial then original location and serial
    DestinationAndOriginalWithSerials,
    /// Original location and serial
    OriginalWithSerial,
    /// Internal status then original location
    StatusAndOriginal,
}

impl EventFormat {
    pub fn param_count(&self) -> usize {
        match self {
            EventFormat::OriginalLocation | EventFormat::DestinationLocation => 3,
            EventFormat::DestinationAndOriginal => 6,
            EventFormat::DestinationAndOriginalWithSerials => 8,
            EventFormat::OriginalWithSerial | EventFormat::StatusAndOriginal => 4,
        }
    }
}

/// Event log message identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCode {
    // Success
    PermanentSpareSwappedIn,
    ProactiveSpareDriveSwappedIn,
    UserCopySpareDriveSwappedIn,
    UserCopyInitiated,
    DriveSwapOut,
    // Failure
    ProactiveCopyNoLongerRequired,
    PermanentSpareNoLongerRequired,
    SpareUnexpectedCommand,
    SpareUnexpectedError,
    CopySourceDriveInvalid,
    SpareSourceInUnexpectedState,
    SpareDriveValidationFailed,
    SpareCopyObjectNotReady,
    SpareOperationInProgress,
    SpareRaidGroupIsUnconsumed,
    SpareRaidGroupIsNotRedundant,
    SpareRaidGroupIsBroken,
    CopyRaidGroupDegraded,
    RaidGroupHasCopyInProgress,
    CopySourceDriveDegraded,
    SwapFailedRaidGroupDenied,
    SwapFailedRaidGroupDestroyed,
    NoSparesAvailable,
    NoSuitableSpareAvailable,
    CopyDestinationIncompatibleTier,
    CopySourceDriveRemoved,
    CopyDestinationDriveRemoved,
    CopyInvalidDestinationDrive,
    CopyDestinationDriveNotHealthy,
    CopyDestinationDriveInUse,
    DestinationIncompatibleRaidGroupOffset,
    SpareBlockSizeMismatch,
    SpareInsufficientCapacity,
}

impl EventCode {
    pub const ALL: [EventCode; 33] = [
        EventCode::PermanentSpareSwappedIn,
        EventCode::ProactiveSpareDriveSwappedIn,
        EventCode::UserCopySpareDriveSwappedIn,
        EventCode::UserCopyInitiated,
        EventCode::DriveSwapOut,
        EventCode::ProactiveCopyNoLongerRequired,
        EventCode::PermanentSpareNoLongerRequired,
        EventCode::SpareUnexpectedCommand,
        EventCode::SpareUnexpectedError,
        EventCode::CopySourceDriveInvalid,
        EventCode::SpareSourceInUnexpectedState,
        EventCode::SpareDriveValidationFailed,
        EventCode::SpareCopyObjectNotReady,
        EventCode::SpareOperationInProgress,
        EventCode::SpareRaidGroupIsUnconsumed,
        EventCode::SpareRaidGroupIsNotRedundant,
        EventCode::SpareRaidGroupIsBroken,
        EventCode::CopyRaidGroupDegraded,
        EventCode::RaidGroupHasCopyInProgress,
        EventCode::CopySourceDriveDegraded,
        EventCode::SwapFailedRaidGroupDenied,
        EventCode::SwapFailedRaidGroupDestroyed,
        EventCode::NoSparesAvailable,
        EventCode::NoSuitableSpareAvailable,
        EventCode::CopyDestinationIncompatibleTier,
        EventCode::CopySourceDriveRemoved,
        EventCode::CopyDestinationDriveRemoved,
        EventCode::CopyInvalidDestinationDrive,
        EventCode::CopyDestinationDriveNotHealthy,
        EventCode::CopyDestinationDriveInUse,
        EventCode::DestinationIncompatibleRaidGroupOffset,
        EventCode::SpareBlockSizeMismatch,
        EventCode::SpareInsufficientCapacity,
    ];

    /// Codes that report a completed operation
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            EventCode::PermanentSpareSwappedIn
                | EventCode::ProactiveSpareDriveSwappedIn
                | EventCode::UserCopySpareDriveSwappedIn
                | EventCode::UserCopyInitiated
                | EventCode::DriveSwapOut
        )
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            code if code.is_success() => EventSeverity::Info,
            EventCode::ProactiveCopyNoLongerRequired | EventCode::PermanentSpareNoLongerRequired => {
                EventSeverity::Info
            }
            EventCode::SpareUnexpectedCommand | EventCode::SpareUnexpectedError => {
                EventSeverity::Error
            }
            _ => EventSeverity::Warning,
        }
    }

    pub fn format(&self) -> EventFormat {
        match self {
            EventCode::PermanentSpareSwappedIn
            | EventCode::ProactiveSpareDriveSwappedIn
            | EventCode::UserCopySpareDriveSwappedIn => EventFormat::DestinationAndOriginalWithSerials,

            EventCode::UserCopyInitiated
            | EventCode::CopyDestinationIncompatibleTier
            | EventCode::SpareBlockSizeMismatch
            | EventCode::SpareInsufficientCapacity => EventFormat::DestinationAndOriginal,

            EventCode::CopyDestinationDriveRemoved
            | EventCode::CopyInvalidDestinationDrive
            | EventCode::CopyDestinationDriveNotHealthy
            | EventCode::CopyDestinationDriveInUse
            | EventCode::DestinationIncompatibleRaidGroupOffset
            | EventCode::SwapFailedRaidGroupDenied => EventFormat::DestinationLocation,

            EventCode::NoSparesAvailable
            | EventCode::NoSuitableSpareAvailable
            | EventCode::ProactiveCopyNoLongerRequired
            | EventCode::PermanentSpareNoLongerRequired => EventFormat::OriginalWithSerial,

            EventCode::SpareUnexpectedError | EventCode::SpareUnexpectedCommand => {
                EventFormat::StatusAndOriginal
            }

            EventCode::DriveSwapOut
            | EventCode::CopySourceDriveInvalid
            | EventCode::SpareSourceInUnexpectedState
            | EventCode::SpareDriveValidationFailed
            | EventCode::SpareCopyObjectNotReady
            | EventCode::SpareOperationInProgress
            | EventCode::SpareRaidGroupIsUnconsumed
            | EventCode::SpareRaidGroupIsNotRedundant
            | EventCode::SpareRaidGroupIsBroken
            | EventCode::CopyRaidGroupDegraded
            | EventCode::RaidGroupHasCopyInProgress
            | EventCode::CopySourceDriveDegraded
            | EventCode::SwapFailedRaidGroupDestroyed
            | EventCode::CopySourceDriveRemoved => EventFormat::OriginalLocation,
        }
    }

    /// Success event written on commit
    pub fn for_commit(command: SwapCommand) -> EventCode {
        match command {
            SwapCommand::PermanentSpare => EventCode::PermanentSpareSwappedIn,
            SwapCommand::ProactiveCopy => EventCode::ProactiveSpareDriveSwappedIn,
            SwapCommand::UserCopy => EventCode::UserCopySpareDriveSwappedIn,
            SwapCommand::UserCopyTo => EventCode::UserCopyInitiated,
            SwapCommand::CompleteCopy | SwapCommand::AbortCopy => EventCode::DriveSwapOut,
        }
    }
}

impl std::fmt::Display for EventCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// Job Error -> Event Table
// =============================================================================

/// What a rollback does for a job error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Event(EventCode),
    /// Recorded through the internal error path; the job itself is fine
    Internal,
    /// Code should never reach a rollback
    Unexpected,
}

/// Fixed job error -> event table
pub static JOB_ERROR_EVENTS: [(JobError, EventDisposition); 46] = {
    use EventCode as E;
    use EventDisposition::{Event, Internal, Unexpected};
    use JobError as J;
    [
        (J::NoError, Unexpected),
        (J::InternalError, Internal),
        (J::SwapStatusNotPopulated, Unexpected),
        (J::SwapValidationFail, Event(E::SpareUnexpectedError)),
        (J::InvalidSwapCommand, Event(E::SpareUnexpectedCommand)),
        (J::InvalidVirtualDriveObjectId, Event(E::CopySourceDriveInvalid)),
        (J::InvalidOriginalObjectId, Event(E::CopySourceDriveInvalid)),
        (J::InvalidEdgeIndex, Event(E::SpareSourceInUnexpectedState)),
        (J::InvalidPermSpareEdgeIndex, Event(E::SpareSourceInUnexpectedState)),
        (J::InvalidProactiveSpareEdgeIndex, Event(E::SpareSourceInUnexpectedState)),
        (J::InvalidSpareObjectId, Event(E::SpareDriveValidationFailed)),
        (J::SwapUnexpectedError, Event(E::SpareUnexpectedError)),
        (J::SwapVirtualDriveBroken, Event(E::SpareCopyObjectNotReady)),
        (J::SwapCurrentVdConfigModeDoesntSupport, Event(E::SpareOperationInProgress)),
        (J::PvdInvalidConfigType, Event(E::SpareUnexpectedError)),
        (J::SwapCreateEdgeFailed, Event(E::SpareUnexpectedError)),
        (J::SwapDestroyEdgeFailed, Event(E::SpareUnexpectedError)),
        (J::UnsupportedEventCode, Event(E::SpareUnexpectedError)),
        (J::EncryptionInProgress, Event(E::SpareOperationInProgress)),
        (J::SpareRaidGroupUnconsumed, Event(E::SpareRaidGroupIsUnconsumed)),
        (J::SpareRaidGroupNotRedundant, Event(E::SpareRaidGroupIsNotRedundant)),
        (J::SpareRaidGroupDestroyed, Event(E::SwapFailedRaidGroupDestroyed)),
        (J::PresentlyRaidGroupBroken, Event(E::SpareRaidGroupIsBroken)),
        (J::PresentlyRaidGroupDegraded, Event(E::CopyRaidGroupDegraded)),
        (J::PresentlyRaidGroupHasCopyInProgress, Event(E::RaidGroupHasCopyInProgress)),
        (J::PresentlySourceDriveDegraded, Event(E::CopySourceDriveDegraded)),
        (J::PresentlyRaidGroupDenied, Event(E::SwapFailedRaidGroupDenied)),
        (J::PresentlyNoSparesAvailable, Event(E::NoSparesAvailable)),
        (J::PresentlyNoSuitableSpare, Event(E::NoSuitableSpareAvailable)),
        (J::ProactiveSpareNotRequired, Event(E::ProactiveCopyNoLongerRequired)),
        (J::PermanentSpareNotRequired, Event(E::PermanentSpareNoLongerRequired)),
        (J::InvalidDesiredSpareDriveType, Event(E::CopyDestinationIncompatibleTier)),
        (J::SwapCopySourceDriveRemoved, Event(E::CopySourceDriveRemoved)),
        (J::SwapCopyDestinationDriveRemoved, Event(E::CopyDestinationDriveRemoved)),
        (J::SwapCopyInvalidDestinationDrive, Event(E::CopyInvalidDestinationDrive)),
        (J::SwapCopyDestinationDriveNotHealthy, Event(E::CopyDestinationDriveNotHealthy)),
        (J::SwapCopyDestinationHasUpstreamRaidGroup, Event(E::CopyDestinationDriveInUse)),
        (J::OffsetMismatch, Event(E::DestinationIncompatibleRaidGroupOffset)),
        (J::SysDriveMismatch, Event(E::DestinationIncompatibleRaidGroupOffset)),
        (J::BlockSizeMismatch, Event(E::SpareBlockSizeMismatch)),
        (J::CapacityMismatch, Event(E::SpareInsufficientCapacity)),
        (J::SpareNotReady, Internal),
        (J::SpareRemoved, Internal),
        (J::SpareBusy, Internal),
        (J::InvalidValue, Unexpected),
        (J::NullCommand, Unexpected),
    ]
};

/// Rollback disposition of a job error
pub fn event_disposition(job_error: JobError) -> EventDisposition {
    JOB_ERROR_EVENTS
        .iter()
        .find(|(code, _)| *code == job_error)
        .map(|(_, disposition)| *disposition)
        .unwrap_or(EventDisposition::Unexpected)
}

/// Internally raised requests do not log conditions expected to clear
pub fn is_suppressed(command: SwapCommand, job_error: JobError) -> bool {
    command.is_internal() && job_error.is_presently()
}

// =============================================================================
// Event Records
// =============================================================================

/// Location and serial number of a drive named in an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveIdentity {
    pub location: Option<DriveLocation>,
    pub serial_number: Option<String>,
}

impl DriveIdentity {
    fn location_params(&self) -> [String; 3] {
        match self.location {
            Some(location) => [
                location.port.to_string(),
                location.enclosure.to_string(),
                location.slot.to_string(),
            ],
            None => ["?".into(), "?".into(), "?".into()],
        }
    }

    fn serial_param(&self) -> String {
        self.serial_number.clone().unwrap_or_else(|| "?".into())
    }
}

/// Values an event may reference
#[derive(Debug, Clone, Default)]
pub struct EventParams {
    pub original: DriveIdentity,
    pub destination: DriveIdentity,
    pub status: String,
}

impl EventParams {
    /// Render parameters in the layout of `format`
    pub fn render(&self, format: EventFormat) -> Vec<String> {
        let original = self.original.location_params();
        let destination = self.destination.location_params();
        let params: Vec<String> = match format {
            EventFormat::OriginalLocation => original.to_vec(),
            EventFormat::DestinationLocation => destination.to_vec(),
            EventFormat::DestinationAndOriginal => {
                destination.into_iter().chain(original).collect()
            }
            EventFormat::DestinationAndOriginalWithSerials => destination
                .into_iter()
                .chain(std::iter::once(self.destination.serial_param()))
                .chain(original)
                .chain(std::iter::once(self.original.serial_param()))
                .collect(),
            EventFormat::OriginalWithSerial => original
                .into_iter()
                .chain(std::iter::once(self.original.serial_param()))
                .collect(),
            EventFormat::StatusAndOriginal => std::iter::once(self.status.clone())
                .chain(original)
                .collect(),
        };
        debug_assert_eq!(params.len(), format.param_count());
        params
    }
}

/// One persisted event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub code: EventCode,
    pub severity: EventSeverity,
    pub vd_object_id: ObjectId,
    pub params: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} vd {:#x}: {}",
            self.code,
            self.vd_object_id,
            self.params.join(" ")
        )
    }
}

// =============================================================================
// Event Writer
// =============================================================================

/// Writes rollback, commit and internal error events for drive swap jobs
pub struct EventLogWriter {
    event_log: EventLogRef,
    topology: TopologyServiceRef,
    metrics: Arc<SparingMetrics>,
}

impl EventLogWriter {
    pub fn new(
        event_log: EventLogRef,
        topology: TopologyServiceRef,
        metrics: Arc<SparingMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            event_log,
            topology,
            metrics,
        })
    }

    /// Classify a failed request and write its event
    pub async fn rollback_write_event(&self, request: &mut SwapRequest) -> Result<()> {
        let status = request.status_code;

        if is_suppressed(request.command, status) {
            debug!(
                "Suppressing event for {} on vd {:#x}: {}",
                request.command, request.vd_object_id, status
            );
            return Ok(());
        }

        match event_disposition(status) {
            EventDisposition::Event(code) => self.write_event(request, code).await,
            EventDisposition::Internal => {
                let code = match request.internal_error {
                    InternalError::Invalid | InternalError::None => {
                        InternalError::UnexpectedJobStatus
                    }
                    code => code,
                };
                self.log_internal_error(code, request).await
            }
            EventDisposition::Unexpected => {
                error!(
                    "Rollback of {} on vd {:#x} with unexpected status {}",
                    request.command, request.vd_object_id, status
                );
                self.log_internal_error(InternalError::UnexpectedJobStatus, request)
                    .await?;
                Err(Error::UnsupportedEvent(status.to_string()))
            }
        }
    }

    /// Write the success event for a committed request
    pub async fn commit_write_event(&self, request: &mut SwapRequest) -> Result<()> {
        let code = EventCode::for_commit(request.command);
        self.write_event(request, code).await
    }

    /// Write `code` for `request`; success codes require a successful
    /// request and failure codes a failed one
    pub async fn write_event(&self, request: &mut SwapRequest, code: EventCode) -> Result<()> {
        let succeeded = request.status_code == JobError::NoError;
        if code.is_success() != succeeded {
            error!(
                "Event {} does not match status {} for vd {:#x}",
                code, request.status_code, request.vd_object_id
            );
            self.log_internal_error(InternalError::UnexpectedJobStatus, request)
                .await?;
            return Err(Error::UnsupportedEvent(code.to_string()));
        }

        let params = self.params_for(request, request.internal_error.to_string()).await;
        self.emit(request.vd_object_id, code, &params).await
    }

    /// Record an internal error on the request and log it as unexpected.
    /// The request's job error code is left as it is.
    pub async fn log_internal_error(
        &self,
        internal_error: InternalError,
        request: &mut SwapRequest,
    ) -> Result<()> {
        request.internal_error = internal_error;
        let job_error = internal_error_to_job_error(internal_error, request.status_code);
        warn!(
            "Internal error {} for {} on vd {:#x} (status {})",
            internal_error, request.command, request.vd_object_id, job_error
        );

        let params = self.params_for(request, job_error.to_string()).await;
        self.emit(request.vd_object_id, EventCode::SpareUnexpectedError, &params)
            .await
    }

    async fn params_for(&self, request: &SwapRequest, status: String) -> EventParams {
        EventParams {
            original: self.identity(request.orig_pvd_object_id).await,
            destination: self.identity(request.spare_object_id).await,
            status,
        }
    }

    async fn identity(&self, pvd: Option<ObjectId>) -> DriveIdentity {
        let Some(pvd) = pvd else {
            return DriveIdentity::default();
        };
        match self.topology.drive_profile(pvd).await {
            Ok(profile) => DriveIdentity {
                location: Some(profile.location),
                serial_number: Some(profile.serial_number),
            },
            Err(e) => {
                debug!("No location for drive {:#x}: {}", pvd, e);
                DriveIdentity::default()
            }
        }
    }

    async fn emit(&self, vd_object_id: ObjectId, code: EventCode, params: &EventParams) -> Result<()> {
        let record = EventRecord {
            code,
            severity: code.severity(),
            vd_object_id,
            params: params.render(code.format()),
            timestamp: Utc::now(),
        };

        match record.severity {
            EventSeverity::Info => info!("Event: {}", record),
            EventSeverity::Warning => warn!("Event: {}", record),
            EventSeverity::Error => error!("Event: {}", record),
        }

        match self.event_log.write_event(record).await {
            Ok(()) => {
                self.metrics.record_event_written();
                Ok(())
            }
            Err(e) => {
                warn!("Failed to write event {} for vd {:#x}: {}", code, vd_object_id, e);
                Err(e)
            }
        }
    }
}
