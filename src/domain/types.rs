//! Domain Types - Records exchanged between the engine and the array
//!
//! Every identifier and status bundle that crosses a port boundary lives
//! here so the sparing components and the adapters agree on one vocabulary.

use crate::sparing::taxonomy::{InternalError, JobError};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of an object in the storage object graph
pub type ObjectId = u32;

/// Client-side index of an edge on a redundancy object
pub type EdgeIndex = u32;

/// Logical block address / block count
pub type Lba = u64;

/// Configuration database transaction identifier
pub type TransactionId = u64;

/// Sentinel for a capacity that could not be determined
pub const LBA_INVALID: Lba = u64::MAX;

/// Edge index of the first backing drive of a virtual drive
pub const FIRST_EDGE_INDEX: EdgeIndex = 0;

/// Edge index of the second backing drive of a virtual drive
pub const SECOND_EDGE_INDEX: EdgeIndex = 1;

// =============================================================================
// Drive Classification
// =============================================================================

/// Physical drive type as reported by the provision drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveType {
    Invalid,
    Sas,
    SasNl,
    SasFlashHe,
    SataFlashHe,
    SataPaddlecard,
    SasFlashMe,
    SasFlashLe,
    SasFlashRi,
}

impl DriveType {
    /// Every variant, in declaration order
    pub const ALL: [DriveType; 9] = [
        DriveType::Invalid,
        DriveType::Sas,
        DriveType::SasNl,
        DriveType::SasFlashHe,
        DriveType::SataFlashHe,
        DriveType::SataPaddlecard,
        DriveType::SasFlashMe,
        DriveType::SasFlashLe,
        DriveType::SasFlashRi,
    ];

    /// Whether the type names a real drive
    pub fn is_valid(&self) -> bool {
        !matches!(self, DriveType::Invalid)
    }
}

impl std::fmt::Display for DriveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriveType::Invalid => write!(f, "invalid"),
            DriveType::Sas => write!(f, "sas"),
            DriveType::SasNl => write!(f, "sas_nl"),
            DriveType::SasFlashHe => write!(f, "sas_flash_he"),
            DriveType::SataFlashHe => write!(f, "sata_flash_he"),
            DriveType::SataPaddlecard => write!(f, "sata_paddlecard"),
            DriveType::SasFlashMe => write!(f, "sas_flash_me"),
            DriveType::SasFlashLe => write!(f, "sas_flash_le"),
            DriveType::SasFlashRi => write!(f, "sas_flash_ri"),
        }
    }
}

/// Object lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Specialize,
    Activate,
    Ready,
    Hibernate,
    PendingHibernate,
    Fail,
    Destroy,
    Offline,
}

impl LifecycleState {
    /// States from which an object can still be brought to Ready without a rebuild
    pub fn can_become_ready(&self) -> bool {
        matches!(
            self,
            LifecycleState::Ready | LifecycleState::Hibernate | LifecycleState::PendingHibernate
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Specialize => write!(f, "specialize"),
            LifecycleState::Activate => write!(f, "activate"),
            LifecycleState::Ready => write!(f, "ready"),
            LifecycleState::Hibernate => write!(f, "hibernate"),
            LifecycleState::PendingHibernate => write!(f, "pending_hibernate"),
            LifecycleState::Fail => write!(f, "fail"),
            LifecycleState::Destroy => write!(f, "destroy"),
            LifecycleState::Offline => write!(f, "offline"),
        }
    }
}

/// State of the I/O path to a physical drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathState {
    Enabled,
    Slumber,
    Disabled,
    Broken,
    Invalid,
}

/// How a provision drive is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PvdConfigType {
    /// Free; eligible for the spare pool
    Unconsumed,
    /// Bound into a raid group
    Raid,
    /// Reserved for testing; never spared to
    TestReserved,
}

/// Physical location of a drive, printed as `port_enclosure_slot`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriveLocation {
    pub port: u32,
    pub enclosure: u32,
    pub slot: u32,
}

impl DriveLocation {
    pub fn new(port: u32, enclosure: u32, slot: u32) -> Self {
        Self {
            port,
            enclosure,
            slot,
        }
    }
}

impl std::fmt::Display for DriveLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.port, self.enclosure, self.slot)
    }
}

// =============================================================================
// Virtual Drive Configuration Mode
// =============================================================================

/// Addressing mode of a virtual drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VdConfigMode {
    PassThruFirstEdge,
    PassThruSecondEdge,
    MirrorFirstEdge,
    MirrorSecondEdge,
    Unknown,
}

impl VdConfigMode {
    pub fn is_pass_thru(&self) -> bool {
        matches!(self, VdConfigMode::PassThruFirstEdge | VdConfigMode::PassThruSecondEdge)
    }

    pub fn is_mirror(&self) -> bool {
        matches!(self, VdConfigMode::MirrorFirstEdge | VdConfigMode::MirrorSecondEdge)
    }

    /// Edge replaced by a permanent spare: the edge currently passed through
    pub fn permanent_spare_edge(&self) -> Option<EdgeIndex> {
        match self {
            VdConfigMode::PassThruFirstEdge => Some(FIRST_EDGE_INDEX),
            VdConfigMode::PassThruSecondEdge => Some(SECOND_EDGE_INDEX),
            _ => None,
        }
    }

    /// Edge a copy destination is attached to: the edge not passed through
    pub fn copy_swap_in_edge(&self) -> Option<EdgeIndex> {
        match self {
            VdConfigMode::PassThruFirstEdge => Some(SECOND_EDGE_INDEX),
            VdConfigMode::PassThruSecondEdge => Some(FIRST_EDGE_INDEX),
            _ => None,
        }
    }

    /// Mode entered when a copy starts
    pub fn after_initiate_copy(&self) -> Option<VdConfigMode> {
        match self {
            VdConfigMode::PassThruFirstEdge => Some(VdConfigMode::MirrorFirstEdge),
            VdConfigMode::PassThruSecondEdge => Some(VdConfigMode::MirrorSecondEdge),
            _ => None,
        }
    }

    /// Mode entered when a copy completes: pass through to the destination
    pub fn after_complete_copy(&self) -> Option<VdConfigMode> {
        match self {
            VdConfigMode::MirrorFirstEdge => Some(VdConfigMode::PassThruSecondEdge),
            VdConfigMode::MirrorSecondEdge => Some(VdConfigMode::PassThruFirstEdge),
            _ => None,
        }
    }

    /// Mode entered when a copy is aborted and `failed_edge` is removed
    pub fn after_aborted_copy(&self, failed_edge: EdgeIndex) -> Option<VdConfigMode> {
        if !self.is_mirror() {
            return None;
        }
        match failed_edge {
            FIRST_EDGE_INDEX => Some(VdConfigMode::PassThruSecondEdge),
            SECOND_EDGE_INDEX => Some(VdConfigMode::PassThruFirstEdge),
            _ => None,
        }
    }

    /// (source, destination) edges while mirrored
    pub fn mirror_edges(&self) -> Option<(EdgeIndex, EdgeIndex)> {
        match self {
            VdConfigMode::MirrorFirstEdge => Some((FIRST_EDGE_INDEX, SECOND_EDGE_INDEX)),
            VdConfigMode::MirrorSecondEdge => Some((SECOND_EDGE_INDEX, FIRST_EDGE_INDEX)),
            _ => None,
        }
    }
}

impl std::fmt::Display for VdConfigMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VdConfigMode::PassThruFirstEdge => write!(f, "pass_thru_first_edge"),
            VdConfigMode::PassThruSecondEdge => write!(f, "pass_thru_second_edge"),
            VdConfigMode::MirrorFirstEdge => write!(f, "mirror_first_edge"),
            VdConfigMode::MirrorSecondEdge => write!(f, "mirror_second_edge"),
            VdConfigMode::Unknown => write!(f, "unknown"),
        }
    }
}

// =============================================================================
// Swap Command and Request
// =============================================================================

/// Kind of drive swap requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapCommand {
    /// Replace a failed drive with a hot spare
    PermanentSpare,
    /// Copy from a drive predicted to fail
    ProactiveCopy,
    /// Operator-requested copy to an engine-selected spare
    UserCopy,
    /// Operator-requested copy to a named destination
    UserCopyTo,
    /// Swap out the source once a copy has finished
    CompleteCopy,
    /// Swap out the failed side of an aborted copy
    AbortCopy,
}

impl SwapCommand {
    /// Commands that attach a new drive to the virtual drive
    pub fn is_swap_in(&self) -> bool {
        matches!(
            self,
            SwapCommand::PermanentSpare
                | SwapCommand::ProactiveCopy
                | SwapCommand::UserCopy
                | SwapCommand::UserCopyTo
        )
    }

    /// Commands whose destination is chosen by spare selection
    pub fn requires_selection(&self) -> bool {
        matches!(
            self,
            SwapCommand::PermanentSpare | SwapCommand::ProactiveCopy | SwapCommand::UserCopy
        )
    }

    /// Operator-initiated copy commands
    pub fn is_user_copy(&self) -> bool {
        matches!(self, SwapCommand::UserCopy | SwapCommand::UserCopyTo)
    }

    /// Commands raised by the array itself rather than an operator
    pub fn is_internal(&self) -> bool {
        matches!(self, SwapCommand::PermanentSpare | SwapCommand::ProactiveCopy)
    }
}

impl std::fmt::Display for SwapCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwapCommand::PermanentSpare => write!(f, "permanent_spare"),
            SwapCommand::ProactiveCopy => write!(f, "proactive_copy"),
            SwapCommand::UserCopy => write!(f, "user_copy"),
            SwapCommand::UserCopyTo => write!(f, "user_copy_to"),
            SwapCommand::CompleteCopy => write!(f, "complete_copy"),
            SwapCommand::AbortCopy => write!(f, "abort_copy"),
        }
    }
}

/// One drive swap job request, mutated by every phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRequest {
    /// Requested operation
    pub command: SwapCommand,
    /// Redundancy object being rewired
    pub vd_object_id: ObjectId,
    /// Drive being replaced or copied from
    pub orig_pvd_object_id: Option<ObjectId>,
    /// Spare or copy destination
    pub spare_object_id: Option<ObjectId>,
    /// Edge being swapped in or out
    pub swap_edge_index: Option<EdgeIndex>,
    /// Peer edge of a mirrored virtual drive
    pub mirror_swap_edge_index: Option<EdgeIndex>,
    /// Open configuration database transaction
    pub transaction_id: Option<TransactionId>,
    /// Wait for the virtual drive to acknowledge topology changes
    pub operation_confirmation: bool,
    /// Copy was started proactively
    pub is_proactive_copy: bool,
    /// Job-level result
    pub status_code: JobError,
    /// Engine-local detail of the first failure
    pub internal_error: InternalError,
}

impl SwapRequest {
    /// Build a fresh request as raised by a virtual drive or operator
    pub fn new(command: SwapCommand, vd_object_id: ObjectId) -> Self {
        Self {
            command,
            vd_object_id,
            orig_pvd_object_id: None,
            spare_object_id: None,
            swap_edge_index: None,
            mirror_swap_edge_index: None,
            transaction_id: None,
            operation_confirmation: true,
            is_proactive_copy: matches!(command, SwapCommand::ProactiveCopy),
            status_code: JobError::SwapStatusNotPopulated,
            internal_error: InternalError::Invalid,
        }
    }

    pub fn with_original(mut self, pvd: ObjectId) -> Self {
        self.orig_pvd_object_id = Some(pvd);
        self
    }

    pub fn with_spare(mut self, pvd: ObjectId) -> Self {
        self.spare_object_id = Some(pvd);
        self
    }

    pub fn with_edge(mut self, edge_index: EdgeIndex) -> Self {
        self.swap_edge_index = Some(edge_index);
        self
    }
}

// =============================================================================
// Job Record
// =============================================================================

/// Job phases in dispatch order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Validate,
    Select,
    UpdateInMemory,
    Persist,
    Rollback,
    Commit,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "queued"),
            JobPhase::Validate => write!(f, "validate"),
            JobPhase::Select => write!(f, "select"),
            JobPhase::UpdateInMemory => write!(f, "update_in_memory"),
            JobPhase::Persist => write!(f, "persist"),
            JobPhase::Rollback => write!(f, "rollback"),
            JobPhase::Commit => write!(f, "commit"),
        }
    }
}

/// Generic outcome of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ok,
    Failure,
}

/// External job record carried alongside the swap request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Dispatcher-assigned job number
    pub job_number: u64,
    /// Outcome of the last phase
    pub status: JobStatus,
    /// Job-level error code
    pub error_code: JobError,
    /// Phase that ran before the current one
    pub previous_phase: JobPhase,
    /// Phase currently running
    pub current_phase: JobPhase,
    /// Downgraded when a reporting sub-step fails
    pub payload_status: JobStatus,
}

impl JobRecord {
    pub fn new(job_number: u64) -> Self {
        Self {
            job_number,
            status: JobStatus::Ok,
            error_code: JobError::NoError,
            previous_phase: JobPhase::Queued,
            current_phase: JobPhase::Queued,
            payload_status: JobStatus::Ok,
        }
    }

    /// Record a phase failure with its job error
    pub fn fail(&mut self, error_code: JobError) {
        self.status = JobStatus::Failure;
        self.error_code = error_code;
        self.payload_status = JobStatus::Failure;
    }

    /// Record a phase success
    pub fn succeed(&mut self) {
        self.status = JobStatus::Ok;
        self.error_code = JobError::NoError;
        self.payload_status = JobStatus::Ok;
    }

    pub fn is_ok(&self) -> bool {
        self.status == JobStatus::Ok
    }
}

// =============================================================================
// Drive and Object Profiles
// =============================================================================

/// Live profile of a drive considered as a spare
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateDriveProfile {
    pub object_id: ObjectId,
    pub drive_type: DriveType,
    /// Usable capacity; `LBA_INVALID` when unknown
    pub configured_capacity: Lba,
    /// First block exported to upstream consumers
    pub exported_offset: Lba,
    pub block_size: u32,
    /// Storage pool reservation
    pub pool_id: Option<u32>,
    pub end_of_life: bool,
    /// Single-loss-failure (drive lost on one SP)
    pub single_loss_failure: bool,
    pub path_state: PathState,
    pub lifecycle_state: LifecycleState,
    pub config_type: PvdConfigType,
    /// Consumed by a non-system raid group
    pub has_upstream_raid_group: bool,
    pub location: DriveLocation,
    pub serial_number: String,
}

/// Profile a replacement drive must satisfy, derived from the virtual drive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredSpareProfile {
    /// Drive being replaced
    pub original_object_id: Option<ObjectId>,
    pub drive_type: DriveType,
    /// Blocks the replacement must provide
    pub capacity_required: Lba,
    pub exported_offset: Lba,
    pub block_size: u32,
    pub location: DriveLocation,
}

/// Status bundle returned by a virtual drive get-info request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualDriveInfo {
    pub configuration_mode: Option<VdConfigMode>,
    /// Drive currently exported by the virtual drive
    pub original_pvd_object_id: Option<ObjectId>,
    /// Edge the virtual drive wants swapped
    pub swap_edge_index: Option<EdgeIndex>,
    pub is_proactive_copy: bool,
    pub swap_in_complete: bool,
    pub swap_out_complete: bool,
    pub change_mode_complete: bool,
    pub request_in_progress: bool,
    pub copy_complete_in_progress: bool,
    pub copy_failed_in_progress: bool,
    pub user_copy_started: bool,
}

/// Health of the raid group consuming a virtual drive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamInfo {
    pub upstream_object_id: ObjectId,
    pub is_redundant: bool,
    pub is_ready: bool,
    pub is_in_use: bool,
    pub is_degraded: bool,
    pub copy_in_progress: bool,
    pub rekey_in_progress: bool,
}

/// Block edge attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEdgeInfo {
    /// Provider at the far end; `None` when the edge is detached
    pub server_id: Option<ObjectId>,
    pub client_index: EdgeIndex,
    pub capacity: Lba,
    pub offset: Lba,
}

/// Class of a topology object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    VirtualDrive,
    ProvisionDrive,
    RaidGroup,
}

/// Answer of a virtual drive to a swap validation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapValidationVerdict {
    Accepted,
    /// Refused without detail; the upstream structure explains why
    Denied,
    Rejected(JobError),
}

// =============================================================================
// Drive Record Updates
// =============================================================================

/// Mutation applied to a provision drive record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveRecordChange {
    ConfigType(PvdConfigType),
    PoolId(Option<u32>),
}

/// Tag used when logging drive record updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveRecordUpdateKind {
    ConfigType,
    PoolId,
}

impl std::fmt::Display for DriveRecordUpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriveRecordUpdateKind::ConfigType => write!(f, "config_type"),
            DriveRecordUpdateKind::PoolId => write!(f, "pool_id"),
        }
    }
}

/// Drive record update issued inside a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveRecordUpdate {
    pub transaction_id: TransactionId,
    pub object_id: ObjectId,
    pub change: DriveRecordChange,
}

impl DriveRecordUpdate {
    pub fn kind(&self) -> DriveRecordUpdateKind {
        match self.change {
            DriveRecordChange::ConfigType(_) => DriveRecordUpdateKind::ConfigType,
            DriveRecordChange::PoolId(_) => DriveRecordUpdateKind::PoolId,
        }
    }
}

/// Edge to create between a provider and a virtual drive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub server_id: ObjectId,
    pub client_id: ObjectId,
    pub client_index: EdgeIndex,
    pub capacity: Lba,
    pub offset: Lba,
}

// =============================================================================
// Notifications
// =============================================================================

/// Completion notice published when a job finishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobNotification {
    pub vd_object_id: ObjectId,
    pub job_number: u64,
    pub status: JobStatus,
    pub error_code: JobError,
    pub command: SwapCommand,
    pub orig_pvd_object_id: Option<ObjectId>,
    pub spare_pvd_object_id: Option<ObjectId>,
    pub phase: JobPhase,
    pub sent_at: chrono::DateTime<chrono::Utc>,
}
