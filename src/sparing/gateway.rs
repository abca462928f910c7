//! Transaction & Topology Gateway
//!
//! Single entry point for every outbound call the engine makes: the
//! configuration database (transactions, edges, drive records, swap
//! pending), the virtual drive control protocol and the notification bus.
//! Calls that change the topology can block until the virtual drive
//! acknowledges the change; that wait happens only when the caller asks
//! for it and confirmation is enabled in the tunables.

use crate::domain::ports::*;
use crate::domain::types::*;
use crate::error::Result;
use crate::sparing::config::SparingTunables;
use crate::sparing::taxonomy::JobError;
use crate::sparing::wait::{Confirmation, Waiter};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// =============================================================================
// Port Bundle
// =============================================================================

/// Every external collaborator of one engine instance
#[derive(Clone)]
pub struct ArrayPorts {
    pub config_db: ConfigDatabaseRef,
    pub topology: TopologyServiceRef,
    pub virtual_drive: VirtualDriveServiceRef,
    pub peer: PeerMonitorRef,
    pub event_log: EventLogRef,
    pub notifications: NotificationBusRef,
}

impl ArrayPorts {
    /// Use one adapter for every port
    pub fn from_shared<T>(array: Arc<T>) -> Self
    where
        T: ConfigDatabase
            + TopologyService
            + VirtualDriveService
            + PeerMonitor
            + EventLog
            + NotificationBus
            + 'static,
    {
        Self {
            config_db: array.clone(),
            topology: array.clone(),
            virtual_drive: array.clone(),
            peer: array.clone(),
            event_log: array.clone(),
            notifications: array,
        }
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// Outbound calls with optional confirmation
pub struct TopologyGateway {
    ports: ArrayPorts,
    waiter: Arc<Waiter>,
    tunables: SparingTunables,
}

impl TopologyGateway {
    pub fn new(ports: ArrayPorts, waiter: Arc<Waiter>, tunables: SparingTunables) -> Arc<Self> {
        Arc::new(Self {
            ports,
            waiter,
            tunables,
        })
    }

    pub fn topology(&self) -> &dyn TopologyService {
        self.ports.topology.as_ref()
    }

    pub fn virtual_drive(&self) -> &dyn VirtualDriveService {
        self.ports.virtual_drive.as_ref()
    }

    pub fn tunables(&self) -> &SparingTunables {
        &self.tunables
    }

    /// Whether a call that asked for confirmation should wait for it
    pub fn confirmation_wanted(&self, requested: bool) -> bool {
        requested && self.tunables.confirmation_enabled()
    }

    async fn confirm(&self, vd_object_id: ObjectId, confirmation: Confirmation) -> Result<()> {
        self.waiter
            .confirm(self.virtual_drive(), vd_object_id, confirmation)
            .await
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub async fn start_transaction(&self, job_number: u64) -> Result<TransactionId> {
        let transaction_id = self
            .ports
            .config_db
            .start_transaction(job_number)
            .await
            .inspect_err(|e| error!("Failed to start transaction for job {}: {}", job_number, e))?;
        debug!("Job {} opened transaction {}", job_number, transaction_id);
        Ok(transaction_id)
    }

    pub async fn commit_transaction(&self, transaction_id: TransactionId) -> Result<()> {
        self.ports
            .config_db
            .commit_transaction(transaction_id)
            .await
            .inspect_err(|e| error!("Failed to commit transaction {}: {}", transaction_id, e))?;
        debug!("Committed transaction {}", transaction_id);
        Ok(())
    }

    pub async fn abort_transaction(&self, transaction_id: TransactionId) -> Result<()> {
        self.ports
            .config_db
            .abort_transaction(transaction_id)
            .await
            .inspect_err(|e| error!("Failed to abort transaction {}: {}", transaction_id, e))?;
        info!("Aborted transaction {}", transaction_id);
        Ok(())
    }

    // =========================================================================
    // Edges
    // =========================================================================

    /// Attach `edge.server_id` to the virtual drive, optionally waiting for swap-in
    pub async fn create_edge(
        &self,
        transaction_id: TransactionId,
        edge: &EdgeSpec,
        wait_for_confirmation: bool,
    ) -> Result<()> {
        info!(
            "Creating edge {} from vd {:#x} to pvd {:#x} (capacity {:#x} offset {:#x})",
            edge.client_index, edge.client_id, edge.server_id, edge.capacity, edge.offset
        );
        self.ports
            .config_db
            .create_edge(transaction_id, edge)
            .await
            .inspect_err(|e| {
                error!(
                    "Failed to create edge {} on vd {:#x}: {}",
                    edge.client_index, edge.client_id, e
                )
            })?;

        if self.confirmation_wanted(wait_for_confirmation) {
            self.confirm(
                edge.client_id,
                Confirmation::SwapIn {
                    edge_index: edge.client_index,
                },
            )
            .await?;
        }
        Ok(())
    }

    /// Detach whatever is attached to `edge_index`, optionally waiting for swap-out
    pub async fn destroy_edge(
        &self,
        transaction_id: TransactionId,
        vd_object_id: ObjectId,
        edge_index: EdgeIndex,
        wait_for_confirmation: bool,
    ) -> Result<()> {
        info!("Destroying edge {} of vd {:#x}", edge_index, vd_object_id);
        self.ports
            .config_db
            .destroy_edge(transaction_id, vd_object_id, edge_index)
            .await
            .inspect_err(|e| {
                error!(
                    "Failed to destroy edge {} on vd {:#x}: {}",
                    edge_index, vd_object_id, e
                )
            })?;

        if self.confirmation_wanted(wait_for_confirmation) {
            self.confirm(vd_object_id, Confirmation::SwapOut { edge_index })
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Drive Records
    // =========================================================================

    pub async fn update_drive_record(&self, update: &DriveRecordUpdate) -> Result<()> {
        debug!(
            "Updating {} of pvd {:#x} to {:?}",
            update.kind(),
            update.object_id,
            update.change
        );
        self.ports
            .config_db
            .update_drive_record(update)
            .await
            .inspect_err(|e| {
                error!(
                    "Failed to update {} of pvd {:#x}: {}",
                    update.kind(),
                    update.object_id,
                    e
                )
            })
    }

    /// Give the spare the pool of the drive it replaces. The original keeps
    /// its pool until it is released.
    pub async fn switch_pool_ids(
        &self,
        transaction_id: TransactionId,
        original: ObjectId,
        spare: ObjectId,
    ) -> Result<()> {
        let pool_id = self.drive_pool_id(original).await?;
        self.update_drive_record(&DriveRecordUpdate {
            transaction_id,
            object_id: spare,
            change: DriveRecordChange::PoolId(pool_id),
        })
        .await
    }

    /// Return a drive to the unconsumed pool
    pub async fn release_drive(&self, transaction_id: TransactionId, pvd: ObjectId) -> Result<()> {
        self.update_drive_record(&DriveRecordUpdate {
            transaction_id,
            object_id: pvd,
            change: DriveRecordChange::ConfigType(PvdConfigType::Unconsumed),
        })
        .await?;
        self.update_drive_record(&DriveRecordUpdate {
            transaction_id,
            object_id: pvd,
            change: DriveRecordChange::PoolId(None),
        })
        .await
    }

    /// Bind a spare into the raid group
    pub async fn consume_drive(&self, transaction_id: TransactionId, pvd: ObjectId) -> Result<()> {
        self.update_drive_record(&DriveRecordUpdate {
            transaction_id,
            object_id: pvd,
            change: DriveRecordChange::ConfigType(PvdConfigType::Raid),
        })
        .await
    }

    pub async fn drive_pool_id(&self, pvd: ObjectId) -> Result<Option<u32>> {
        self.ports
            .config_db
            .drive_pool_id(pvd)
            .await
            .inspect_err(|e| error!("Failed to get pool id of pvd {:#x}: {}", pvd, e))
    }

    pub async fn mark_swap_pending(&self, pvd: ObjectId) -> Result<()> {
        info!("Marking swap pending on pvd {:#x}", pvd);
        self.ports.config_db.mark_swap_pending(pvd).await
    }

    pub async fn clear_swap_pending(&self, pvd: ObjectId) -> Result<()> {
        info!("Clearing swap pending on pvd {:#x}", pvd);
        self.ports.config_db.clear_swap_pending(pvd).await
    }

    pub async fn is_encrypted(&self) -> Result<bool> {
        self.ports.config_db.is_encrypted().await
    }

    // =========================================================================
    // Virtual Drive Requests
    // =========================================================================

    /// Change the addressing mode of a virtual drive
    pub async fn update_vd_config_mode(
        &self,
        transaction_id: TransactionId,
        vd_object_id: ObjectId,
        mode: VdConfigMode,
        wait_for_confirmation: bool,
    ) -> Result<()> {
        info!("Changing vd {:#x} configuration mode to {}", vd_object_id, mode);
        self.ports
            .config_db
            .update_vd_config_mode(transaction_id, vd_object_id, mode)
            .await
            .inspect_err(|e| {
                error!(
                    "Failed to change vd {:#x} mode to {}: {}",
                    vd_object_id, mode, e
                )
            })?;

        if self.confirmation_wanted(wait_for_confirmation) {
            self.confirm(vd_object_id, Confirmation::ConfigMode(mode))
                .await?;
        }
        Ok(())
    }

    /// Hand the final swap status back to the virtual drive
    pub async fn send_swap_completion_status(
        &self,
        request: &SwapRequest,
        wait_for_confirmation: bool,
    ) -> Result<()> {
        debug!(
            "Sending swap completion {} for {} to vd {:#x}",
            request.status_code, request.command, request.vd_object_id
        );
        self.virtual_drive()
            .swap_request_complete(request)
            .await
            .inspect_err(|e| {
                error!(
                    "Failed to send swap completion to vd {:#x}: {}",
                    request.vd_object_id, e
                )
            })?;

        if self.confirmation_wanted(wait_for_confirmation) {
            self.confirm(request.vd_object_id, Confirmation::SwapRequestComplete)
                .await?;
        }
        Ok(())
    }

    pub async fn start_user_copy(&self, request: &SwapRequest, wait_for_confirmation: bool) -> Result<()> {
        info!(
            "Starting {} on vd {:#x} to pvd {:?}",
            request.command, request.vd_object_id, request.spare_object_id
        );
        self.virtual_drive().start_user_copy(request).await?;

        if self.confirmation_wanted(wait_for_confirmation) {
            self.confirm(request.vd_object_id, Confirmation::UserCopyStarted)
                .await?;
        }
        Ok(())
    }

    /// Mark the copy finished (complete) or failed (abort)
    pub async fn set_checkpoint_to_end_marker(
        &self,
        vd_object_id: ObjectId,
        command: SwapCommand,
        wait_for_confirmation: bool,
    ) -> Result<()> {
        self.virtual_drive()
            .set_checkpoint_to_end_marker(vd_object_id, command)
            .await
            .inspect_err(|e| {
                error!(
                    "Failed to set checkpoint to end marker on vd {:#x}: {}",
                    vd_object_id, e
                )
            })?;

        if self.confirmation_wanted(wait_for_confirmation) {
            self.confirm(vd_object_id, Confirmation::CopyCompleteOrFailed(command))
                .await?;
        }
        Ok(())
    }

    pub async fn set_permanent_spare_marker(&self, vd_object_id: ObjectId) -> Result<()> {
        self.virtual_drive()
            .set_permanent_spare_marker(vd_object_id)
            .await
            .inspect_err(|e| {
                error!(
                    "Failed to set permanent spare marker on vd {:#x}: {}",
                    vd_object_id, e
                )
            })
    }

    pub async fn swap_request_rollback(&self, vd_object_id: ObjectId, command: SwapCommand) -> Result<()> {
        warn!("Asking vd {:#x} to roll back {}", vd_object_id, command);
        self.virtual_drive()
            .swap_request_rollback(vd_object_id, command)
            .await
    }

    pub async fn send_job_complete(&self, vd_object_id: ObjectId) -> Result<()> {
        self.virtual_drive()
            .send_job_complete(vd_object_id)
            .await
            .inspect_err(|e| error!("Failed to send job complete to vd {:#x}: {}", vd_object_id, e))
    }

    // =========================================================================
    // Lifecycle Waits
    // =========================================================================

    /// Spin an object up and wait for it (and its peer) to become Ready
    pub async fn wait_for_ready(&self, object_id: ObjectId) -> Result<()> {
        self.waiter
            .wait_for_ready(self.topology(), self.ports.peer.as_ref(), object_id)
            .await
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Publish the outcome of a job. A failing error code always reports
    /// failure, whatever status the caller passed.
    pub async fn send_notification(
        &self,
        request: &SwapRequest,
        job_number: u64,
        status: JobStatus,
        error_code: JobError,
        phase: JobPhase,
    ) -> Result<()> {
        let status = if error_code != JobError::NoError && status == JobStatus::Ok {
            warn!(
                "Job {} for vd {:#x} reports {} with ok status; reporting failure",
                job_number, request.vd_object_id, error_code
            );
            JobStatus::Failure
        } else {
            status
        };

        let notification = JobNotification {
            vd_object_id: request.vd_object_id,
            job_number,
            status,
            error_code,
            command: request.command,
            orig_pvd_object_id: request.orig_pvd_object_id,
            spare_pvd_object_id: request.spare_object_id,
            phase,
            sent_at: chrono::Utc::now(),
        };

        self.ports
            .notifications
            .send_notification(notification)
            .await
            .inspect_err(|e| {
                error!(
                    "Failed to send notification for job {} on vd {:#x}: {}",
                    job_number, request.vd_object_id, e
                )
            })
    }
}
