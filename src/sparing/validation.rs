//! Validation Stage
//!
//! Checks a swap request against the live topology before anything is
//! selected or changed. Every refusal records the specific job error on the
//! request; the job layer reports the phase itself as a validation failure.

use crate::domain::types::*;
use crate::error::{Error, Result};
use crate::sparing::gateway::TopologyGateway;
use crate::sparing::selection::{capacity_check, is_drive_healthy};
use crate::sparing::taxonomy::{InternalError, JobError};
use crate::sparing::tier::{desired_tier, drive_type_position};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Validate phase worker
pub struct Validator {
    gateway: Arc<TopologyGateway>,
}

impl Validator {
    pub fn new(gateway: Arc<TopologyGateway>) -> Arc<Self> {
        Arc::new(Self { gateway })
    }

    /// Run every check that applies to the request's command. On success the
    /// request carries its original drive and swap edge and a NoError status.
    pub async fn validate_request(&self, request: &mut SwapRequest) -> Result<()> {
        request.status_code = JobError::SwapStatusNotPopulated;
        request.internal_error = InternalError::Invalid;

        self.validate_virtual_drive_object_id(request).await?;

        let vd_object_id = request.vd_object_id;
        let info = self.gateway.virtual_drive().get_info(vd_object_id).await.map_err(|e| {
            warn!("Failed to get info for vd {:#x}: {}", vd_object_id, e);
            refuse(request, JobError::InternalError)
        })?;

        if request.command != SwapCommand::AbortCopy {
            match request.orig_pvd_object_id {
                None => request.orig_pvd_object_id = info.original_pvd_object_id,
                Some(orig) if Some(orig) != info.original_pvd_object_id => {
                    warn!(
                        "Request original {:#x} does not match vd {:#x} original {:?}",
                        orig, vd_object_id, info.original_pvd_object_id
                    );
                    return Err(refuse(request, JobError::InvalidOriginalObjectId));
                }
                Some(_) => {}
            }
        }

        if request.command.is_user_copy() {
            request.swap_edge_index = info
                .swap_edge_index
                .or_else(|| info.configuration_mode.and_then(|mode| mode.copy_swap_in_edge()));
            self.validate_user_request_swap_edge_index(request)?;
        }

        if request.command.is_swap_in() {
            self.validate_swap_in(request, &info).await?;
        } else {
            self.validate_swap_out(request, &info).await?;
        }

        request.status_code = JobError::NoError;
        debug!(
            "Validated {} for vd {:#x} original {:?} edge {:?}",
            request.command, vd_object_id, request.orig_pvd_object_id, request.swap_edge_index
        );
        Ok(())
    }

    /// The target must be a virtual drive
    pub async fn validate_virtual_drive_object_id(&self, request: &mut SwapRequest) -> Result<()> {
        let vd_object_id = request.vd_object_id;
        match self.gateway.topology().object_class(vd_object_id).await {
            Ok(ObjectClass::VirtualDrive) => Ok(()),
            Ok(class) => {
                warn!("Object {:#x} is a {:?}, not a virtual drive", vd_object_id, class);
                request.internal_error = InternalError::InvalidVirtualDriveObjectId;
                Err(refuse(request, JobError::InvalidVirtualDriveObjectId))
            }
            Err(e) => {
                warn!("Cannot resolve vd {:#x}: {}", vd_object_id, e);
                request.internal_error = InternalError::InvalidVirtualDriveObjectId;
                Err(refuse(request, JobError::InvalidVirtualDriveObjectId))
            }
        }
    }

    /// Operator copies must name the first or second edge
    pub fn validate_user_request_swap_edge_index(&self, request: &mut SwapRequest) -> Result<()> {
        match request.swap_edge_index {
            Some(edge) if edge <= SECOND_EDGE_INDEX => Ok(()),
            other => {
                warn!(
                    "User {} on vd {:#x} has invalid swap edge {:?}",
                    request.command, request.vd_object_id, other
                );
                request.internal_error = InternalError::InvalidEdgeIndex;
                Err(refuse(request, JobError::InvalidEdgeIndex))
            }
        }
    }

    // =========================================================================
    // Swap-in
    // =========================================================================

    pub async fn validate_swap_in(
        &self,
        request: &mut SwapRequest,
        info: &VirtualDriveInfo,
    ) -> Result<()> {
        let vd_object_id = request.vd_object_id;
        let mode = info.configuration_mode.unwrap_or(VdConfigMode::Unknown);
        if !mode.is_pass_thru() {
            info!(
                "Vd {:#x} in mode {} cannot accept {}",
                vd_object_id, mode, request.command
            );
            return Err(refuse(request, JobError::SwapCurrentVdConfigModeDoesntSupport));
        }

        let swap_edge = match request.command {
            SwapCommand::PermanentSpare => mode.permanent_spare_edge(),
            _ => request.swap_edge_index.or_else(|| mode.copy_swap_in_edge()),
        };
        let Some(swap_edge) = swap_edge else {
            request.internal_error = InternalError::InvalidEdgeIndex;
            return Err(refuse(request, JobError::InvalidEdgeIndex));
        };
        request.swap_edge_index = Some(swap_edge);

        let verdict = self
            .gateway
            .virtual_drive()
            .validate_swap_in(request)
            .await
            .map_err(|e| {
                error!("Swap-in validation request to vd {:#x} failed: {}", vd_object_id, e);
                refuse(request, JobError::InternalError)
            })?;

        let upstream = self.upstream(request).await?;
        self.apply_verdict(request, verdict, &upstream)?;

        let refusal = if !upstream.is_redundant {
            Some(JobError::SpareRaidGroupNotRedundant)
        } else if !upstream.is_in_use {
            Some(JobError::SpareRaidGroupUnconsumed)
        } else if !upstream.is_ready {
            Some(JobError::PresentlyRaidGroupBroken)
        } else if request.command != SwapCommand::PermanentSpare && upstream.is_degraded {
            Some(JobError::PresentlyRaidGroupDegraded)
        } else if request.command != SwapCommand::PermanentSpare && upstream.copy_in_progress {
            Some(JobError::PresentlyRaidGroupHasCopyInProgress)
        } else if request.command != SwapCommand::PermanentSpare && upstream.rekey_in_progress {
            Some(JobError::EncryptionInProgress)
        } else {
            None
        };
        if let Some(code) = refusal {
            info!(
                "Upstream {:#x} of vd {:#x} refuses {}: {}",
                upstream.upstream_object_id, vd_object_id, request.command, code
            );
            return Err(refuse(request, code));
        }

        if request.command == SwapCommand::UserCopyTo {
            self.validate_copy_to_destination(request).await?;
        }
        Ok(())
    }

    /// Destination named by the operator must be a healthy, free drive that
    /// could replace the source
    pub async fn validate_copy_to_destination(&self, request: &mut SwapRequest) -> Result<()> {
        let vd_object_id = request.vd_object_id;
        let Some(destination) = request.spare_object_id else {
            warn!("Copy-to on vd {:#x} names no destination", vd_object_id);
            request.internal_error = InternalError::InvalidSpareObjectId;
            return Err(refuse(request, JobError::InvalidSpareObjectId));
        };
        if request.orig_pvd_object_id == Some(destination) {
            return Err(refuse(request, JobError::SwapCopyInvalidDestinationDrive));
        }

        match self.gateway.topology().object_class(destination).await {
            Ok(ObjectClass::ProvisionDrive) => {}
            Ok(_) => return Err(refuse(request, JobError::SwapCopyInvalidDestinationDrive)),
            Err(_) => return Err(refuse(request, JobError::SwapCopyDestinationDriveRemoved)),
        }

        let candidate = match self.gateway.topology().drive_profile(destination).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Copy destination {:#x} unavailable: {}", destination, e);
                return Err(refuse(request, JobError::SwapCopyDestinationDriveRemoved));
            }
        };
        let desired = self
            .gateway
            .virtual_drive()
            .desired_spare_profile(vd_object_id)
            .await
            .map_err(|e| {
                error!("Failed to get desired spare profile for vd {:#x}: {}", vd_object_id, e);
                refuse(request, JobError::InternalError)
            })?;

        if let Some(code) = destination_refusal(&desired, &candidate) {
            info!(
                "Copy destination {:#x} ({} at {}) refused for vd {:#x}: {}",
                destination, candidate.drive_type, candidate.location, vd_object_id, code
            );
            return Err(refuse(request, code));
        }
        Ok(())
    }

    // =========================================================================
    // Swap-out
    // =========================================================================

    pub async fn validate_swap_out(
        &self,
        request: &mut SwapRequest,
        info: &VirtualDriveInfo,
    ) -> Result<()> {
        let vd_object_id = request.vd_object_id;
        let mode = info.configuration_mode.unwrap_or(VdConfigMode::Unknown);
        let Some((source, destination)) = mode.mirror_edges() else {
            info!(
                "Vd {:#x} in mode {} is not copying; cannot {}",
                vd_object_id, mode, request.command
            );
            return Err(refuse(request, JobError::SwapCurrentVdConfigModeDoesntSupport));
        };

        let swap_edge = match request.command {
            SwapCommand::CompleteCopy => source,
            _ => request
                .swap_edge_index
                .or(info.swap_edge_index)
                .unwrap_or(destination),
        };
        if swap_edge > SECOND_EDGE_INDEX {
            request.internal_error = InternalError::InvalidEdgeIndex;
            return Err(refuse(request, JobError::InvalidEdgeIndex));
        }
        request.swap_edge_index = Some(swap_edge);
        request.mirror_swap_edge_index = Some(if swap_edge == source {
            destination
        } else {
            source
        });

        let verdict = self
            .gateway
            .virtual_drive()
            .validate_swap_out(request)
            .await
            .map_err(|e| {
                error!("Swap-out validation request to vd {:#x} failed: {}", vd_object_id, e);
                refuse(request, JobError::InternalError)
            })?;
        if verdict != SwapValidationVerdict::Accepted {
            let upstream = self.upstream(request).await?;
            self.apply_verdict(request, verdict, &upstream)?;
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn upstream(&self, request: &mut SwapRequest) -> Result<UpstreamInfo> {
        let vd_object_id = request.vd_object_id;
        self.gateway
            .topology()
            .upstream_info(vd_object_id)
            .await
            .map_err(|e| {
                error!("Failed to get upstream info for vd {:#x}: {}", vd_object_id, e);
                refuse(request, JobError::InternalError)
            })
    }

    /// Translate the virtual drive's answer. A bare denial is explained by
    /// the state of the upstream raid group.
    fn apply_verdict(
        &self,
        request: &mut SwapRequest,
        verdict: SwapValidationVerdict,
        upstream: &UpstreamInfo,
    ) -> Result<()> {
        match verdict {
            SwapValidationVerdict::Accepted => Ok(()),
            SwapValidationVerdict::Rejected(code) => {
                info!(
                    "Vd {:#x} rejected {}: {}",
                    request.vd_object_id, request.command, code
                );
                Err(refuse(request, code))
            }
            SwapValidationVerdict::Denied => {
                let code = if !upstream.is_redundant {
                    JobError::SpareRaidGroupNotRedundant
                } else if !upstream.is_in_use {
                    JobError::SpareRaidGroupUnconsumed
                } else if upstream.is_degraded {
                    JobError::PresentlyRaidGroupDegraded
                } else {
                    JobError::PresentlyRaidGroupDenied
                };
                request.internal_error = InternalError::RaidGroupDenied;
                info!(
                    "Upstream {:#x} denied {} on vd {:#x}: {}",
                    upstream.upstream_object_id, request.command, request.vd_object_id, code
                );
                Err(refuse(request, code))
            }
        }
    }
}

/// First reason `candidate` cannot be the destination of a copy-to
pub fn destination_refusal(
    desired: &DesiredSpareProfile,
    candidate: &CandidateDriveProfile,
) -> Option<JobError> {
    if matches!(candidate.path_state, PathState::Broken | PathState::Invalid)
        || matches!(
            candidate.lifecycle_state,
            LifecycleState::Destroy | LifecycleState::Offline
        )
    {
        return Some(JobError::SwapCopyDestinationDriveRemoved);
    }
    if !is_drive_healthy(candidate) {
        return Some(JobError::SwapCopyDestinationDriveNotHealthy);
    }
    if candidate.has_upstream_raid_group || candidate.config_type == PvdConfigType::Raid {
        return Some(JobError::SwapCopyDestinationHasUpstreamRaidGroup);
    }
    if candidate.config_type == PvdConfigType::TestReserved {
        return Some(JobError::SwapCopyInvalidDestinationDrive);
    }
    let compatible = desired_tier(desired.drive_type)
        .and_then(|tier| drive_type_position(tier, candidate.drive_type))
        .map(|position| position.is_some())
        .unwrap_or(false);
    if !compatible {
        return Some(JobError::SwapCopyInvalidDestinationDrive);
    }
    if candidate.exported_offset > desired.exported_offset {
        return Some(JobError::OffsetMismatch);
    }
    if !capacity_check(desired.capacity_required, candidate.configured_capacity) {
        return Some(JobError::CapacityMismatch);
    }
    None
}

fn refuse(request: &mut SwapRequest, code: JobError) -> Error {
    request.status_code = code;
    Error::Validation { job_error: code }
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

    fn validator(array: &Arc<InMemoryArray>) -> Arc<Validator> {
        let tunables = SparingTunables::new(SparingConfig::default());
        let waiter = Waiter::new(ManualClock::new(), tunables.clone(), SparingMetrics::new());
        Validator::new(TopologyGateway::new(
            ArrayPorts::from_shared(array.clone()),
            waiter,
            tunables,
        ))
    }

    #[tokio::test]
    async fn test_permanent_spare_accepted() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        let mut request = SwapRequest::new(SwapCommand::PermanentSpare, 0x10c);

        validator(&array).validate_request(&mut request).await.unwrap();
        assert_eq!(request.status_code, JobError::NoError);
        assert_eq!(request.orig_pvd_object_id, Some(0x100));
        assert_eq!(request.swap_edge_index, Some(FIRST_EDGE_INDEX));
    }

    #[tokio::test]
    async fn test_unknown_virtual_drive() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        let mut request = SwapRequest::new(SwapCommand::PermanentSpare, 0x100);

        let result = validator(&array).validate_request(&mut request).await;
        assert_matches!(
            result,
            Err(Error::Validation {
                job_error: JobError::InvalidVirtualDriveObjectId
            })
        );
    }

    #[tokio::test]
    async fn test_original_mismatch() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        let mut request = SwapRequest::new(SwapCommand::ProactiveCopy, 0x10c).with_original(0x101);

        let result = validator(&array).validate_request(&mut request).await;
        assert_matches!(result, Err(Error::Validation { .. }));
        assert_eq!(request.status_code, JobError::InvalidOriginalObjectId);
    }

    #[tokio::test]
    async fn test_user_copy_invalid_edge() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        array.update_vd_info(0x10c, |info| info.swap_edge_index = Some(4));
        let mut request = SwapRequest::new(SwapCommand::UserCopy, 0x10c);

        let result = validator(&array).validate_request(&mut request).await;
        assert_matches!(
            result,
            Err(Error::Validation {
                job_error: JobError::InvalidEdgeIndex
            })
        );
        assert_eq!(request.internal_error, InternalError::InvalidEdgeIndex);
    }

    #[tokio::test]
    async fn test_copy_refused_while_degraded() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        array.update_upstream(0x10c, |upstream| upstream.is_degraded = true);

        let mut copy = SwapRequest::new(SwapCommand::ProactiveCopy, 0x10c);
        let result = validator(&array).validate_request(&mut copy).await;
        assert_matches!(result, Err(Error::Validation { .. }));
        assert_eq!(copy.status_code, JobError::PresentlyRaidGroupDegraded);

        let mut spare = SwapRequest::new(SwapCommand::PermanentSpare, 0x10c);
        validator(&array).validate_request(&mut spare).await.unwrap();
    }

    #[tokio::test]
    async fn test_copy_refused_during_rekey() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        array.update_upstream(0x10c, |upstream| upstream.rekey_in_progress = true);

        let mut copy = SwapRequest::new(SwapCommand::UserCopy, 0x10c);
        let result = validator(&array).validate_request(&mut copy).await;
        assert_matches!(result, Err(Error::Validation { .. }));
        assert_eq!(copy.status_code, JobError::EncryptionInProgress);
    }

    #[tokio::test]
    async fn test_denial_explained_by_upstream() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        array.set_swap_in_verdict(SwapValidationVerdict::Denied);

        let mut request = SwapRequest::new(SwapCommand::PermanentSpare, 0x10c);
        let result = validator(&array).validate_request(&mut request).await;
        assert_matches!(result, Err(Error::Validation { .. }));
        assert_eq!(request.status_code, JobError::PresentlyRaidGroupDenied);
        assert_eq!(request.internal_error, InternalError::RaidGroupDenied);

        array.update_upstream(0x10c, |upstream| upstream.is_in_use = false);
        let mut request = SwapRequest::new(SwapCommand::PermanentSpare, 0x10c);
        let _ = validator(&array).validate_request(&mut request).await;
        assert_eq!(request.status_code, JobError::SpareRaidGroupUnconsumed);
    }

    #[tokio::test]
    async fn test_swap_out_requires_mirror() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        let mut request = SwapRequest::new(SwapCommand::CompleteCopy, 0x10c);

        let result = validator(&array).validate_request(&mut request).await;
        assert_matches!(result, Err(Error::Validation { .. }));
        assert_eq!(request.status_code, JobError::SwapCurrentVdConfigModeDoesntSupport);
    }

    #[tokio::test]
    async fn test_swap_out_edges() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        array.set_config_mode(0x10c, VdConfigMode::MirrorFirstEdge);

        let mut complete = SwapRequest::new(SwapCommand::CompleteCopy, 0x10c);
        validator(&array).validate_request(&mut complete).await.unwrap();
        assert_eq!(complete.swap_edge_index, Some(FIRST_EDGE_INDEX));
        assert_eq!(complete.mirror_swap_edge_index, Some(SECOND_EDGE_INDEX));

        let mut abort = SwapRequest::new(SwapCommand::AbortCopy, 0x10c);
        validator(&array).validate_request(&mut abort).await.unwrap();
        assert_eq!(abort.swap_edge_index, Some(SECOND_EDGE_INDEX));
    }

    #[tokio::test]
    async fn test_copy_to_destination_checks() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        let mut consumed = InMemoryArray::drive(0x201, DriveType::Sas, 4000);
        consumed.has_upstream_raid_group = true;
        array.add_drive(consumed);
        array.add_drive(InMemoryArray::drive(0x202, DriveType::Sas, 10));
        array.add_drive(InMemoryArray::drive(0x203, DriveType::Sas, 4000));

        let mut request = SwapRequest::new(SwapCommand::UserCopyTo, 0x10c).with_spare(0x201);
        let _ = validator(&array).validate_request(&mut request).await;
        assert_eq!(request.status_code, JobError::SwapCopyDestinationHasUpstreamRaidGroup);

        let mut request = SwapRequest::new(SwapCommand::UserCopyTo, 0x10c).with_spare(0x202);
        let _ = validator(&array).validate_request(&mut request).await;
        assert_eq!(request.status_code, JobError::CapacityMismatch);

        let mut request = SwapRequest::new(SwapCommand::UserCopyTo, 0x10c).with_spare(0x203);
        validator(&array).validate_request(&mut request).await.unwrap();
        assert_eq!(request.swap_edge_index, Some(SECOND_EDGE_INDEX));
    }

    #[test]
    fn test_destination_refusal_order() {
        let desired = DesiredSpareProfile {
            original_object_id: Some(0x100),
            drive_type: DriveType::Sas,
            capacity_required: 1000,
            exported_offset: 0x10000,
            block_size: 520,
            location: DriveLocation::new(0, 0, 0),
        };

        let mut removed = InMemoryArray::drive(0x201, DriveType::Sas, 4000);
        removed.path_state = PathState::Broken;
        assert_eq!(
            destination_refusal(&desired, &removed),
            Some(JobError::SwapCopyDestinationDriveRemoved)
        );

        let mut worn = InMemoryArray::drive(0x202, DriveType::Sas, 4000);
        worn.end_of_life = true;
        assert_eq!(
            destination_refusal(&desired, &worn),
            Some(JobError::SwapCopyDestinationDriveNotHealthy)
        );

        let flash = InMemoryArray::drive(0x203, DriveType::SasFlashHe, 4000);
        assert_eq!(
            destination_refusal(&desired, &flash),
            Some(JobError::SwapCopyInvalidDestinationDrive)
        );

        let mut offset = InMemoryArray::drive(0x204, DriveType::Sas, 4000);
        offset.exported_offset = 0x20000;
        assert_eq!(destination_refusal(&desired, &offset), Some(JobError::OffsetMismatch));
    }
}
