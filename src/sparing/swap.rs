//! Swap Operations
//!
//! The UpdateInMemory work of a drive swap job. Each operation opens the
//! job's transaction, rewires the virtual drive's edges, updates the drive
//! records and moves the virtual drive to its next configuration mode.
//! Nothing here commits: Persist commits and Rollback aborts the transaction
//! recorded on the request.

use crate::domain::types::*;
use crate::error::{Error, Result};
use crate::sparing::gateway::TopologyGateway;
use crate::sparing::taxonomy::{InternalError, JobError};
use std::sync::Arc;
use tracing::{error, info, warn};

/// UpdateInMemory worker
pub struct SwapOperations {
    gateway: Arc<TopologyGateway>,
}

impl SwapOperations {
    pub fn new(gateway: Arc<TopologyGateway>) -> Arc<Self> {
        Arc::new(Self { gateway })
    }

    /// Dispatch on the request command
    pub async fn update_in_memory(&self, request: &mut SwapRequest, job_number: u64) -> Result<()> {
        info!(
            "Job {} updating vd {:#x} for {}",
            job_number, request.vd_object_id, request.command
        );
        match request.command {
            SwapCommand::PermanentSpare => self.swap_in_permanent_spare(request, job_number).await,
            SwapCommand::ProactiveCopy | SwapCommand::UserCopy | SwapCommand::UserCopyTo => {
                self.initiate_copy(request, job_number).await
            }
            SwapCommand::CompleteCopy => self.complete_copy(request, job_number).await,
            SwapCommand::AbortCopy => self.complete_aborted_copy(request, job_number).await,
        }
    }

    // =========================================================================
    // Permanent Spare
    // =========================================================================

    /// Replace the passed-through drive with the selected spare
    pub async fn swap_in_permanent_spare(
        &self,
        request: &mut SwapRequest,
        job_number: u64,
    ) -> Result<()> {
        let vd_object_id = request.vd_object_id;
        let mode = self.config_mode(request).await?;

        let Some(edge_index) = mode.permanent_spare_edge() else {
            warn!("Vd {:#x} in mode {} has no edge to spare", vd_object_id, mode);
            request.internal_error = InternalError::InvalidVirtualDriveConfigMode;
            return Err(fail(request, JobError::InvalidPermSpareEdgeIndex));
        };
        request.swap_edge_index = Some(edge_index);

        let Some(original) = request.orig_pvd_object_id else {
            return Err(fail(request, JobError::InvalidOriginalObjectId));
        };

        let edge = self.edge_info(request, edge_index).await?;
        let transaction_id = self.open_transaction(request, job_number).await?;

        let Some(spare) = request.spare_object_id else {
            request.internal_error = InternalError::InvalidSpareObjectId;
            return Err(fail(request, JobError::InvalidSpareObjectId));
        };
        let spare_profile = self
            .gateway
            .topology()
            .drive_profile(spare)
            .await
            .map_err(|e| internal(request, "get spare profile", e))?;

        self.gateway
            .destroy_edge(transaction_id, vd_object_id, edge_index, request.operation_confirmation)
            .await
            .map_err(|e| {
                request.internal_error = InternalError::DestroyEdgeFailed;
                step_failed(request, JobError::SwapDestroyEdgeFailed, "destroy edge", e)
            })?;

        let pool_id = self
            .gateway
            .drive_pool_id(original)
            .await
            .map_err(|e| internal(request, "get original pool id", e))?;
        self.gateway
            .consume_drive(transaction_id, spare)
            .await
            .map_err(|e| internal(request, "update spare config type", e))?;
        self.gateway
            .update_drive_record(&DriveRecordUpdate {
                transaction_id,
                object_id: spare,
                change: DriveRecordChange::PoolId(pool_id),
            })
            .await
            .map_err(|e| internal(request, "update spare pool id", e))?;

        self.gateway
            .set_permanent_spare_marker(vd_object_id)
            .await
            .map_err(|e| internal(request, "set permanent spare marker", e))?;

        let new_edge = EdgeSpec {
            server_id: spare,
            client_id: vd_object_id,
            client_index: edge_index,
            capacity: edge.capacity,
            offset: edge.offset,
        };
        self.gateway
            .create_edge(transaction_id, &new_edge, request.operation_confirmation)
            .await
            .map_err(|e| {
                request.internal_error = InternalError::CreateEdgeFailed;
                step_failed(request, JobError::SwapCreateEdgeFailed, "create edge", e)
            })?;

        self.gateway
            .release_drive(transaction_id, original)
            .await
            .map_err(|e| internal(request, "release original drive", e))?;

        info!(
            "Job {} swapped spare {:#x} ({}) into vd {:#x} edge {} replacing {:#x}",
            job_number, spare, spare_profile.location, vd_object_id, edge_index, original
        );
        Ok(())
    }

    // =========================================================================
    // Initiate Copy
    // =========================================================================

    /// Attach the copy destination to the free edge and start mirroring
    pub async fn initiate_copy(&self, request: &mut SwapRequest, job_number: u64) -> Result<()> {
        let vd_object_id = request.vd_object_id;
        let mode = self.config_mode(request).await?;

        let (Some(edge_index), Some(source_edge)) =
            (mode.copy_swap_in_edge(), mode.permanent_spare_edge())
        else {
            warn!("Vd {:#x} in mode {} has no free edge for a copy", vd_object_id, mode);
            request.internal_error = InternalError::InvalidVirtualDriveConfigMode;
            return Err(fail(request, JobError::InvalidProactiveSpareEdgeIndex));
        };
        request.swap_edge_index = Some(edge_index);
        request.mirror_swap_edge_index = Some(source_edge);

        let Some(original) = request.orig_pvd_object_id else {
            return Err(fail(request, JobError::InvalidOriginalObjectId));
        };
        let source = self.edge_info(request, source_edge).await?;

        let Some(destination) = request.spare_object_id else {
            request.internal_error = InternalError::InvalidSpareObjectId;
            return Err(fail(request, JobError::InvalidSpareObjectId));
        };

        let destination_state = self.lifecycle_state(request, destination).await?;
        if !destination_state.can_become_ready() {
            warn!(
                "Copy destination {:#x} is {}; cannot copy to it",
                destination, destination_state
            );
            return Err(fail(request, JobError::SwapCopyDestinationDriveNotHealthy));
        }
        let vd_state = self.lifecycle_state(request, vd_object_id).await?;
        if !vd_state.can_become_ready() {
            warn!("Vd {:#x} is {}; cannot start a copy", vd_object_id, vd_state);
            return Err(fail(request, JobError::SwapVirtualDriveBroken));
        }

        if destination_state != LifecycleState::Ready {
            self.gateway.wait_for_ready(destination).await.map_err(|e| {
                step_failed(
                    request,
                    JobError::SwapCopyDestinationDriveNotHealthy,
                    "wait for destination ready",
                    e,
                )
            })?;
        }
        if vd_state != LifecycleState::Ready {
            self.gateway.wait_for_ready(vd_object_id).await.map_err(|e| {
                step_failed(request, JobError::SwapVirtualDriveBroken, "wait for vd ready", e)
            })?;
        }

        let Some(new_mode) = mode.after_initiate_copy() else {
            request.internal_error = InternalError::InvalidVirtualDriveConfigMode;
            return Err(fail(request, JobError::SwapCurrentVdConfigModeDoesntSupport));
        };

        let transaction_id = self.open_transaction(request, job_number).await?;

        if request.command.is_user_copy() {
            let confirm = request.operation_confirmation;
            self.gateway
                .start_user_copy(request, confirm)
                .await
                .map_err(|e| internal(request, "start user copy", e))?;
        }

        self.gateway
            .consume_drive(transaction_id, destination)
            .await
            .map_err(|e| internal(request, "update destination config type", e))?;
        self.gateway
            .switch_pool_ids(transaction_id, original, destination)
            .await
            .map_err(|e| internal(request, "switch pool ids", e))?;
        self.gateway
            .set_permanent_spare_marker(vd_object_id)
            .await
            .map_err(|e| internal(request, "set permanent spare marker", e))?;

        let new_edge = EdgeSpec {
            server_id: destination,
            client_id: vd_object_id,
            client_index: edge_index,
            capacity: source.capacity,
            offset: source.offset,
        };
        // The mirror cannot start until the destination edge is attached
        self.gateway
            .create_edge(transaction_id, &new_edge, true)
            .await
            .map_err(|e| {
                request.internal_error = InternalError::CreateEdgeFailed;
                step_failed(request, JobError::SwapCreateEdgeFailed, "create edge", e)
            })?;

        if let Err(e) = self
            .gateway
            .update_vd_config_mode(transaction_id, vd_object_id, new_mode, request.operation_confirmation)
            .await
        {
            let broken = !matches!(
                self.gateway.topology().lifecycle_state(vd_object_id).await,
                Ok(LifecycleState::Ready)
            );
            let code = if broken {
                JobError::SwapVirtualDriveBroken
            } else {
                JobError::InternalError
            };
            return Err(step_failed(request, code, "update configuration mode", e));
        }

        info!(
            "Job {} started {} on vd {:#x} from {:#x} (edge {}) to {:#x} (edge {})",
            job_number, request.command, vd_object_id, original, source_edge, destination, edge_index
        );
        Ok(())
    }

    // =========================================================================
    // Complete Copy
    // =========================================================================

    /// Swap out the copy source and pass through to the destination
    pub async fn complete_copy(&self, request: &mut SwapRequest, job_number: u64) -> Result<()> {
        let vd_object_id = request.vd_object_id;
        let mode = self.config_mode(request).await?;

        let (Some((source_edge, destination_edge)), Some(new_mode)) =
            (mode.mirror_edges(), mode.after_complete_copy())
        else {
            warn!("Vd {:#x} in mode {} has no copy to complete", vd_object_id, mode);
            request.internal_error = InternalError::InvalidVirtualDriveConfigMode;
            return Err(fail(request, JobError::SwapCurrentVdConfigModeDoesntSupport));
        };
        request.swap_edge_index = Some(source_edge);
        request.mirror_swap_edge_index = Some(destination_edge);

        let Some(original) = self.edge_info(request, source_edge).await?.server_id else {
            return Err(fail(request, JobError::InvalidOriginalObjectId));
        };
        let Some(destination) = self.edge_info(request, destination_edge).await?.server_id else {
            request.internal_error = InternalError::InvalidSpareObjectId;
            return Err(fail(request, JobError::InvalidSpareObjectId));
        };
        request.orig_pvd_object_id = Some(original);
        request.spare_object_id = Some(destination);

        let encrypted = self
            .gateway
            .is_encrypted()
            .await
            .map_err(|e| internal(request, "read encryption mode", e))?;

        let transaction_id = self.open_transaction(request, job_number).await?;

        self.gateway
            .update_vd_config_mode(transaction_id, vd_object_id, new_mode, request.operation_confirmation)
            .await
            .map_err(|e| internal(request, "update configuration mode", e))?;

        if encrypted {
            self.gateway
                .mark_swap_pending(original)
                .await
                .map_err(|e| internal(request, "mark swap pending", e))?;
        }

        self.gateway
            .destroy_edge(transaction_id, vd_object_id, source_edge, request.operation_confirmation)
            .await
            .map_err(|e| {
                request.internal_error = InternalError::DestroyEdgeFailed;
                step_failed(request, JobError::SwapDestroyEdgeFailed, "destroy edge", e)
            })?;

        self.gateway
            .release_drive(transaction_id, original)
            .await
            .map_err(|e| internal(request, "release source drive", e))?;
        self.gateway
            .consume_drive(transaction_id, destination)
            .await
            .map_err(|e| internal(request, "update destination config type", e))?;

        self.gateway
            .set_checkpoint_to_end_marker(vd_object_id, SwapCommand::CompleteCopy, request.operation_confirmation)
            .await
            .map_err(|e| internal(request, "set checkpoint to end marker", e))?;

        info!(
            "Job {} completed copy on vd {:#x}: {:#x} swapped out, {:#x} now {}",
            job_number, vd_object_id, original, destination, new_mode
        );
        Ok(())
    }

    // =========================================================================
    // Aborted Copy
    // =========================================================================

    /// Remove the failed side of a copy and pass through to the survivor
    pub async fn complete_aborted_copy(
        &self,
        request: &mut SwapRequest,
        job_number: u64,
    ) -> Result<()> {
        let vd_object_id = request.vd_object_id;
        let mode = self.config_mode(request).await?;

        let Some((source_edge, destination_edge)) = mode.mirror_edges() else {
            warn!("Vd {:#x} in mode {} has no copy to abort", vd_object_id, mode);
            request.internal_error = InternalError::InvalidVirtualDriveConfigMode;
            return Err(fail(request, JobError::SwapCurrentVdConfigModeDoesntSupport));
        };
        let failed_edge = request.swap_edge_index.unwrap_or(destination_edge);
        let Some(new_mode) = mode.after_aborted_copy(failed_edge) else {
            request.internal_error = InternalError::InvalidEdgeIndex;
            return Err(fail(request, JobError::SwapCurrentVdConfigModeDoesntSupport));
        };
        request.swap_edge_index = Some(failed_edge);

        if request.orig_pvd_object_id.is_none() {
            request.orig_pvd_object_id = self.edge_info(request, source_edge).await?.server_id;
        }
        if request.spare_object_id.is_none() {
            request.spare_object_id = self.edge_info(request, destination_edge).await?.server_id;
        }
        let Some(failed_pvd) = self.edge_info(request, failed_edge).await?.server_id else {
            request.internal_error = InternalError::InvalidSpareObjectId;
            return Err(fail(request, JobError::InvalidSpareObjectId));
        };

        let transaction_id = self.open_transaction(request, job_number).await?;

        self.gateway
            .update_vd_config_mode(transaction_id, vd_object_id, new_mode, request.operation_confirmation)
            .await
            .map_err(|e| internal(request, "update configuration mode", e))?;

        self.gateway
            .destroy_edge(transaction_id, vd_object_id, failed_edge, request.operation_confirmation)
            .await
            .map_err(|e| {
                request.internal_error = InternalError::DestroyEdgeFailed;
                step_failed(request, JobError::SwapDestroyEdgeFailed, "destroy edge", e)
            })?;

        self.gateway
            .release_drive(transaction_id, failed_pvd)
            .await
            .map_err(|e| internal(request, "release failed drive", e))?;

        self.gateway
            .set_checkpoint_to_end_marker(vd_object_id, SwapCommand::AbortCopy, request.operation_confirmation)
            .await
            .map_err(|e| internal(request, "set checkpoint to end marker", e))?;

        info!(
            "Job {} aborted copy on vd {:#x}: {:#x} (edge {}) swapped out, now {}",
            job_number, vd_object_id, failed_pvd, failed_edge, new_mode
        );
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn config_mode(&self, request: &mut SwapRequest) -> Result<VdConfigMode> {
        let vd_object_id = request.vd_object_id;
        let info = self
            .gateway
            .virtual_drive()
            .get_info(vd_object_id)
            .await
            .map_err(|e| internal(request, "get vd info", e))?;
        Ok(info.configuration_mode.unwrap_or(VdConfigMode::Unknown))
    }

    async fn edge_info(&self, request: &mut SwapRequest, edge_index: EdgeIndex) -> Result<BlockEdgeInfo> {
        let vd_object_id = request.vd_object_id;
        self.gateway
            .topology()
            .block_edge_info(vd_object_id, edge_index)
            .await
            .map_err(|e| internal(request, "get block edge info", e))
    }

    async fn lifecycle_state(&self, request: &mut SwapRequest, object_id: ObjectId) -> Result<LifecycleState> {
        self.gateway
            .topology()
            .lifecycle_state(object_id)
            .await
            .map_err(|e| internal(request, "get lifecycle state", e))
    }

    async fn open_transaction(&self, request: &mut SwapRequest, job_number: u64) -> Result<TransactionId> {
        let transaction_id = self
            .gateway
            .start_transaction(job_number)
            .await
            .map_err(|e| internal(request, "start transaction", e))?;
        request.transaction_id = Some(transaction_id);
        Ok(transaction_id)
    }
}

fn fail(request: &mut SwapRequest, code: JobError) -> Error {
    request.status_code = code;
    Error::JobFailed { job_error: code }
}

fn step_failed(request: &mut SwapRequest, code: JobError, step: &str, cause: Error) -> Error {
    error!(
        "{} on vd {:#x} failed at {}: {}",
        request.command, request.vd_object_id, step, cause
    );
    fail(request, code)
}

fn internal(request: &mut SwapRequest, step: &str, cause: Error) -> Error {
    step_failed(request, JobError::InternalError, step, cause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryArray;
    use crate::sparing::config::{SparingConfig, SparingTunables};
    use crate::sparing::gateway::ArrayPorts;
    use crate::sparing::metrics::SparingMetrics;
    use crate::sparing::wait::{ManualClock, Waiter};
    use assert_matches::assert_matches;

    fn operations(array: &Arc<InMemoryArray>) -> (Arc<SwapOperations>, Arc<TopologyGateway>) {
        let tunables = SparingTunables::new(SparingConfig::default());
        let waiter = Waiter::new(ManualClock::new(), tunables.clone(), SparingMetrics::new());
        let gateway = TopologyGateway::new(ArrayPorts::from_shared(array.clone()), waiter, tunables);
        (SwapOperations::new(gateway.clone()), gateway)
    }

    fn spare_array() -> Arc<InMemoryArray> {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        array.set_pool_id(0x100, Some(3));
        array.add_spare(InMemoryArray::drive(0x201, DriveType::Sas, 4000));
        array
    }

    #[tokio::test]
    async fn test_permanent_spare_rewires_edge() {
        let array = spare_array();
        let (operations, gateway) = operations(&array);
        let mut request = SwapRequest::new(SwapCommand::PermanentSpare, 0x10c)
            .with_original(0x100)
            .with_spare(0x201);

        operations.update_in_memory(&mut request, 1).await.unwrap();
        let transaction_id = request.transaction_id.unwrap();
        gateway.commit_transaction(transaction_id).await.unwrap();

        assert_eq!(array.edge_server(0x10c, 0), Some(0x201));
        assert_eq!(array.config_type(0x201), Some(PvdConfigType::Raid));
        assert_eq!(array.config_type(0x100), Some(PvdConfigType::Unconsumed));
        assert_eq!(gateway.drive_pool_id(0x201).await.unwrap(), Some(3));
        assert_eq!(gateway.drive_pool_id(0x100).await.unwrap(), None);
        assert!(array.permanent_spare_marker_set(0x10c));
    }

    #[tokio::test]
    async fn test_permanent_spare_abort_restores_topology() {
        let array = spare_array();
        let (operations, gateway) = operations(&array);
        let mut request = SwapRequest::new(SwapCommand::PermanentSpare, 0x10c)
            .with_original(0x100)
            .with_spare(0x201);

        operations.update_in_memory(&mut request, 1).await.unwrap();
        gateway
            .abort_transaction(request.transaction_id.unwrap())
            .await
            .unwrap();

        assert_eq!(array.edge_server(0x10c, 0), Some(0x100));
        assert_eq!(array.config_type(0x201), Some(PvdConfigType::Unconsumed));
        assert_eq!(gateway.drive_pool_id(0x100).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_permanent_spare_without_spare() {
        let array = spare_array();
        let (operations, _) = operations(&array);
        let mut request = SwapRequest::new(SwapCommand::PermanentSpare, 0x10c).with_original(0x100);

        let result = operations.update_in_memory(&mut request, 1).await;
        assert_matches!(
            result,
            Err(Error::JobFailed {
                job_error: JobError::InvalidSpareObjectId
            })
        );
        assert!(request.transaction_id.is_some());
    }

    #[tokio::test]
    async fn test_permanent_spare_in_mirror_mode() {
        let array = spare_array();
        array.set_config_mode(0x10c, VdConfigMode::MirrorFirstEdge);
        let (operations, _) = operations(&array);
        let mut request = SwapRequest::new(SwapCommand::PermanentSpare, 0x10c)
            .with_original(0x100)
            .with_spare(0x201);

        let result = operations.update_in_memory(&mut request, 1).await;
        assert_matches!(result, Err(Error::JobFailed { .. }));
        assert_eq!(request.status_code, JobError::InvalidPermSpareEdgeIndex);
        assert_eq!(request.transaction_id, None);
    }

    #[tokio::test]
    async fn test_edge_create_failure_code() {
        let array = spare_array();
        array.fail_operation("create_edge");
        let (operations, _) = operations(&array);
        let mut request = SwapRequest::new(SwapCommand::PermanentSpare, 0x10c)
            .with_original(0x100)
            .with_spare(0x201);

        let result = operations.update_in_memory(&mut request, 1).await;
        assert_matches!(result, Err(Error::JobFailed { .. }));
        assert_eq!(request.status_code, JobError::SwapCreateEdgeFailed);
        assert_eq!(request.internal_error, InternalError::CreateEdgeFailed);
    }

    #[tokio::test]
    async fn test_initiate_copy_enters_mirror() {
        let array = spare_array();
        let (operations, gateway) = operations(&array);
        let mut request = SwapRequest::new(SwapCommand::ProactiveCopy, 0x10c)
            .with_original(0x100)
            .with_spare(0x201);

        operations.update_in_memory(&mut request, 2).await.unwrap();
        gateway
            .commit_transaction(request.transaction_id.unwrap())
            .await
            .unwrap();

        assert_eq!(request.swap_edge_index, Some(SECOND_EDGE_INDEX));
        assert_eq!(array.edge_server(0x10c, 0), Some(0x100));
        assert_eq!(array.edge_server(0x10c, 1), Some(0x201));
        assert_eq!(array.config_mode(0x10c), Some(VdConfigMode::MirrorFirstEdge));
        assert_eq!(gateway.drive_pool_id(0x201).await.unwrap(), Some(3));
        assert_eq!(gateway.drive_pool_id(0x100).await.unwrap(), Some(3));
        assert!(!array.user_copy_started(0x10c));
    }

    #[tokio::test]
    async fn test_user_copy_wakes_hibernating_destination() {
        let array = spare_array();
        array.set_lifecycle_state(0x201, LifecycleState::Hibernate);
        let (operations, _) = operations(&array);
        let mut request = SwapRequest::new(SwapCommand::UserCopyTo, 0x10c)
            .with_original(0x100)
            .with_spare(0x201);

        operations.update_in_memory(&mut request, 3).await.unwrap();
        assert_eq!(array.exit_hibernation_requests(), vec![0x201]);
        assert!(array.user_copy_started(0x10c));
    }

    #[tokio::test]
    async fn test_user_copy_accepts_pending_hibernate_destination() {
        let array = spare_array();
        array.set_lifecycle_state(0x201, LifecycleState::PendingHibernate);
        let (operations, _) = operations(&array);
        let mut request = SwapRequest::new(SwapCommand::UserCopyTo, 0x10c)
            .with_original(0x100)
            .with_spare(0x201);

        operations.update_in_memory(&mut request, 3).await.unwrap();
        assert_eq!(array.exit_hibernation_requests(), vec![0x201]);
        assert!(array.user_copy_started(0x10c));
    }

    #[tokio::test]
    async fn test_copy_to_failed_destination() {
        let array = spare_array();
        array.set_lifecycle_state(0x201, LifecycleState::Fail);
        let (operations, _) = operations(&array);
        let mut request = SwapRequest::new(SwapCommand::UserCopy, 0x10c)
            .with_original(0x100)
            .with_spare(0x201);

        let result = operations.update_in_memory(&mut request, 3).await;
        assert_matches!(result, Err(Error::JobFailed { .. }));
        assert_eq!(request.status_code, JobError::SwapCopyDestinationDriveNotHealthy);
        assert_eq!(request.transaction_id, None);
    }

    #[tokio::test]
    async fn test_complete_copy_swaps_out_source() {
        let array = spare_array();
        array.set_encrypted(true);
        let (operations, gateway) = operations(&array);
        let mut copy = SwapRequest::new(SwapCommand::ProactiveCopy, 0x10c)
            .with_original(0x100)
            .with_spare(0x201);
        operations.update_in_memory(&mut copy, 4).await.unwrap();
        gateway.commit_transaction(copy.transaction_id.unwrap()).await.unwrap();

        let mut complete = SwapRequest::new(SwapCommand::CompleteCopy, 0x10c);
        operations.update_in_memory(&mut complete, 5).await.unwrap();
        gateway
            .commit_transaction(complete.transaction_id.unwrap())
            .await
            .unwrap();

        assert_eq!(complete.orig_pvd_object_id, Some(0x100));
        assert_eq!(complete.spare_object_id, Some(0x201));
        assert_eq!(array.edge_server(0x10c, 0), None);
        assert_eq!(array.config_mode(0x10c), Some(VdConfigMode::PassThruSecondEdge));
        assert_eq!(array.config_type(0x100), Some(PvdConfigType::Unconsumed));
        assert!(array.swap_pending(0x100));
    }

    #[tokio::test]
    async fn test_swap_pending_failure_is_internal() {
        let array = spare_array();
        array.set_encrypted(true);
        let (operations, gateway) = operations(&array);
        let mut copy = SwapRequest::new(SwapCommand::ProactiveCopy, 0x10c)
            .with_original(0x100)
            .with_spare(0x201);
        operations.update_in_memory(&mut copy, 4).await.unwrap();
        gateway.commit_transaction(copy.transaction_id.unwrap()).await.unwrap();

        array.fail_operation("mark_swap_pending");
        let mut complete = SwapRequest::new(SwapCommand::CompleteCopy, 0x10c);
        let result = operations.update_in_memory(&mut complete, 5).await;

        assert_matches!(result, Err(Error::JobFailed { job_error: JobError::InternalError }));
        assert_eq!(complete.status_code, JobError::InternalError);
        assert!(!array.swap_pending(0x100));
        assert_eq!(array.edge_server(0x10c, 0), Some(0x100));
    }

    #[tokio::test]
    async fn test_abort_copy_drops_destination() {
        let array = spare_array();
        let (operations, gateway) = operations(&array);
        let mut copy = SwapRequest::new(SwapCommand::ProactiveCopy, 0x10c)
            .with_original(0x100)
            .with_spare(0x201);
        operations.update_in_memory(&mut copy, 6).await.unwrap();
        gateway.commit_transaction(copy.transaction_id.unwrap()).await.unwrap();

        let mut abort = SwapRequest::new(SwapCommand::AbortCopy, 0x10c);
        operations.update_in_memory(&mut abort, 7).await.unwrap();

        assert_eq!(abort.swap_edge_index, Some(SECOND_EDGE_INDEX));
        assert_eq!(abort.orig_pvd_object_id, Some(0x100));
        assert_eq!(abort.spare_object_id, Some(0x201));
        assert_eq!(array.edge_server(0x10c, 1), None);
        assert_eq!(array.config_mode(0x10c), Some(VdConfigMode::PassThruFirstEdge));
        assert_eq!(array.config_type(0x201), Some(PvdConfigType::Unconsumed));
    }

    #[tokio::test]
    async fn test_complete_copy_outside_mirror() {
        let array = spare_array();
        let (operations, _) = operations(&array);
        let mut request = SwapRequest::new(SwapCommand::CompleteCopy, 0x10c);

        let result = operations.update_in_memory(&mut request, 8).await;
        assert_matches!(result, Err(Error::JobFailed { .. }));
        assert_eq!(request.status_code, JobError::SwapCurrentVdConfigModeDoesntSupport);
    }
}
