//! Domain Ports - Boundaries between the sparing engine and the array
//!
//! These traits define the external collaborators the engine drives: the
//! transactional configuration database, the object topology, the virtual
//! drive control protocol, peer liveness, the event log, the notification
//! bus and the clock. Adapters implement them; [`crate::memory`] provides an
//! in-memory array implementing all of them.

use super::types::*;
use crate::error::Result;
use crate::sparing::event_log::EventRecord;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Configuration Database Port
// =============================================================================

/// Transactional configuration database
#[async_trait]
pub trait ConfigDatabase: Send + Sync {
    /// Open a transaction on behalf of a job
    async fn start_transaction(&self, job_number: u64) -> Result<TransactionId>;

    /// Make every change in the transaction durable
    async fn commit_transaction(&self, transaction_id: TransactionId) -> Result<()>;

    /// Discard every change in the transaction
    async fn abort_transaction(&self, transaction_id: TransactionId) -> Result<()>;

    /// Attach a provider to a client edge
    async fn create_edge(&self, transaction_id: TransactionId, edge: &EdgeSpec) -> Result<()>;

    /// Detach whatever provider is attached to a client edge
    async fn destroy_edge(
        &self,
        transaction_id: TransactionId,
        client_id: ObjectId,
        client_index: EdgeIndex,
    ) -> Result<()>;

    /// Mutate a provision drive record
    async fn update_drive_record(&self, update: &DriveRecordUpdate) -> Result<()>;

    /// Change the addressing mode of a virtual drive
    async fn update_vd_config_mode(
        &self,
        transaction_id: TransactionId,
        vd_object_id: ObjectId,
        mode: VdConfigMode,
    ) -> Result<()>;

    /// Storage pool of a provision drive
    async fn drive_pool_id(&self, pvd_object_id: ObjectId) -> Result<Option<u32>>;

    /// Protect a drive from encryption scrubbing while a swap is pending
    async fn mark_swap_pending(&self, pvd_object_id: ObjectId) -> Result<()>;

    /// Release the swap-pending protection
    async fn clear_swap_pending(&self, pvd_object_id: ObjectId) -> Result<()>;

    /// Whether system-wide encryption is active
    async fn is_encrypted(&self) -> Result<bool>;
}

// =============================================================================
// Topology Port
// =============================================================================

/// Read-mostly view of the object graph
#[async_trait]
pub trait TopologyService: Send + Sync {
    /// Class of an object
    async fn object_class(&self, object_id: ObjectId) -> Result<ObjectClass>;

    /// Live profile of a provision drive
    async fn drive_profile(&self, pvd_object_id: ObjectId) -> Result<CandidateDriveProfile>;

    /// Drives eligible to replace a drive of the given virtual drive, in
    /// enumeration order
    async fn spare_pool(&self, vd_object_id: ObjectId) -> Result<Vec<ObjectId>>;

    /// Attributes of a client edge
    async fn block_edge_info(
        &self,
        object_id: ObjectId,
        edge_index: EdgeIndex,
    ) -> Result<BlockEdgeInfo>;

    /// Local lifecycle state
    async fn lifecycle_state(&self, object_id: ObjectId) -> Result<LifecycleState>;

    /// Lifecycle state of the same object on the peer SP
    async fn peer_lifecycle_state(&self, object_id: ObjectId) -> Result<LifecycleState>;

    /// Ask a hibernating object to spin up
    async fn exit_hibernation(&self, object_id: ObjectId) -> Result<()>;

    /// Health of the raid group consuming a virtual drive
    async fn upstream_info(&self, vd_object_id: ObjectId) -> Result<UpstreamInfo>;
}

// =============================================================================
// Virtual Drive Port
// =============================================================================

/// Control protocol of the redundancy ("virtual drive") object
#[async_trait]
pub trait VirtualDriveService: Send + Sync {
    /// Status bundle polled by confirmation waits
    async fn get_info(&self, vd_object_id: ObjectId) -> Result<VirtualDriveInfo>;

    /// Profile a replacement for the failing edge must satisfy
    async fn desired_spare_profile(&self, vd_object_id: ObjectId) -> Result<DesiredSpareProfile>;

    /// In-protocol validation of a swap-in
    async fn validate_swap_in(&self, request: &SwapRequest) -> Result<SwapValidationVerdict>;

    /// In-protocol validation of a swap-out
    async fn validate_swap_out(&self, request: &SwapRequest) -> Result<SwapValidationVerdict>;

    /// Hand the completed swap status to the virtual drive
    async fn swap_request_complete(&self, request: &SwapRequest) -> Result<()>;

    /// Start an operator copy
    async fn start_user_copy(&self, request: &SwapRequest) -> Result<()>;

    /// Ask the virtual drive to cancel a swap in progress
    async fn swap_request_rollback(&self, vd_object_id: ObjectId, command: SwapCommand)
        -> Result<()>;

    /// Tell the virtual drive the job is finished
    async fn send_job_complete(&self, vd_object_id: ObjectId) -> Result<()>;

    /// Move the copy checkpoint to the end marker (copy complete or failed)
    async fn set_checkpoint_to_end_marker(
        &self,
        vd_object_id: ObjectId,
        command: SwapCommand,
    ) -> Result<()>;

    /// Set the non-paged "permanent spare" marker bit
    async fn set_permanent_spare_marker(&self, vd_object_id: ObjectId) -> Result<()>;

    /// Read the non-paged "permanent spare" marker bit
    async fn permanent_spare_marker(&self, vd_object_id: ObjectId) -> Result<bool>;
}

// =============================================================================
// Peer / Event / Notification / Clock Ports
// =============================================================================

/// Liveness of the peer storage processor
pub trait PeerMonitor: Send + Sync {
    fn is_peer_alive(&self) -> bool;
}

/// Persistent event log
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn write_event(&self, record: EventRecord) -> Result<()>;
}

/// Job completion notifications
#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn send_notification(&self, notification: JobNotification) -> Result<()>;
}

/// Time source used by every wait
#[async_trait]
pub trait Clock: Send + Sync {
    /// Suspend for `duration`
    async fn sleep(&self, duration: Duration);

    /// Monotonic time since the clock was created
    fn elapsed(&self) -> Duration;
}

// =============================================================================
// Type Aliases
// =============================================================================

pub type ConfigDatabaseRef = Arc<dyn ConfigDatabase>;
pub type TopologyServiceRef = Arc<dyn TopologyService>;
pub type VirtualDriveServiceRef = Arc<dyn VirtualDriveService>;
pub type PeerMonitorRef = Arc<dyn PeerMonitor>;
pub type EventLogRef = Arc<dyn EventLog>;
pub type NotificationBusRef = Arc<dyn NotificationBus>;
pub type ClockRef = Arc<dyn Clock>;
