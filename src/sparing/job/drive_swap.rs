//! Drive Swap Job
//!
//! One swap request carried through Validate, Select, UpdateInMemory,
//! Persist and then Commit or Rollback.

use super::JobPhases;
use crate::domain::types::*;
use crate::error::{Error, Result};
use crate::sparing::config::SparingTunables;
use crate::sparing::event_log::EventLogWriter;
use crate::sparing::gateway::TopologyGateway;
use crate::sparing::metrics::SparingMetrics;
use crate::sparing::selection::SpareSelector;
use crate::sparing::swap::SwapOperations;
use crate::sparing::taxonomy::JobError;
use crate::sparing::validation::Validator;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Components a drive swap job calls into
#[derive(Clone)]
pub struct SwapServices {
    pub gateway: Arc<TopologyGateway>,
    pub validator: Arc<Validator>,
    pub selector: Arc<SpareSelector>,
    pub operations: Arc<SwapOperations>,
    pub events: Arc<EventLogWriter>,
    pub tunables: SparingTunables,
    pub metrics: Arc<SparingMetrics>,
}

pub struct DriveSwapJob {
    request: SwapRequest,
    services: SwapServices,
}

impl DriveSwapJob {
    pub fn new(request: SwapRequest, services: SwapServices) -> Self {
        Self { request, services }
    }

    pub fn request(&self) -> &SwapRequest {
        &self.request
    }

    pub fn into_request(self) -> SwapRequest {
        self.request
    }

    /// Whether Persist blocks on the swap-complete acknowledgement
    fn completion_confirmation(&self) -> bool {
        match self.request.command {
            SwapCommand::PermanentSpare => true,
            SwapCommand::ProactiveCopy | SwapCommand::UserCopy | SwapCommand::UserCopyTo => false,
            SwapCommand::CompleteCopy | SwapCommand::AbortCopy => self.request.operation_confirmation,
        }
    }

    fn persist_failed(&mut self, record: &mut JobRecord, step: &str, cause: Error) -> Error {
        error!(
            "Job {} persist of {} on vd {:#x} failed at {}: {}",
            record.job_number, self.request.command, self.request.vd_object_id, step, cause
        );
        self.request.status_code = JobError::InternalError;
        record.fail(JobError::InternalError);
        Error::JobFailed {
            job_error: JobError::InternalError,
        }
    }
}

#[async_trait]
impl JobPhases for DriveSwapJob {
    fn name(&self) -> &'static str {
        "drive_swap"
    }

    fn has_phase(&self, _phase: JobPhase) -> bool {
        true
    }

    async fn validate(&mut self, record: &mut JobRecord) -> Result<()> {
        self.services.metrics.record_job_started();

        self.request.operation_confirmation = self.services.tunables.confirmation_enabled();
        if !self.request.operation_confirmation {
            warn!(
                "Job {} on vd {:#x}: confirmation disabled",
                record.job_number, self.request.vd_object_id
            );
        }

        match self.services.validator.validate_request(&mut self.request).await {
            Ok(()) => {
                record.succeed();
                Ok(())
            }
            Err(e) => {
                info!(
                    "Job {} {} on vd {:#x} failed validation: {}",
                    record.job_number, self.request.command, self.request.vd_object_id, self.request.status_code
                );
                record.fail(JobError::SwapValidationFail);
                Err(e)
            }
        }
    }

    async fn select(&mut self, record: &mut JobRecord) -> Result<()> {
        if !self.request.command.requires_selection() {
            record.succeed();
            return Ok(());
        }

        match self.services.selector.select_spare(&mut self.request).await {
            Ok(spare) => {
                info!(
                    "Job {} selected spare {:#x} for vd {:#x}",
                    record.job_number, spare, self.request.vd_object_id
                );
                record.succeed();
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Job {} found no spare for vd {:#x}: {}",
                    record.job_number, self.request.vd_object_id, e
                );
                record.fail(self.request.status_code);
                Err(e)
            }
        }
    }

    async fn update_in_memory(&mut self, record: &mut JobRecord) -> Result<()> {
        match self
            .services
            .operations
            .update_in_memory(&mut self.request, record.job_number)
            .await
        {
            Ok(()) => {
                record.succeed();
                Ok(())
            }
            Err(e) => {
                record.fail(self.request.status_code);
                Err(e)
            }
        }
    }

    async fn persist(&mut self, record: &mut JobRecord) -> Result<()> {
        let gateway = self.services.gateway.clone();

        let Some(transaction_id) = self.request.transaction_id else {
            return Err(self.persist_failed(
                record,
                "commit",
                Error::Internal("no open transaction".into()),
            ));
        };
        if let Err(e) = gateway.commit_transaction(transaction_id).await {
            return Err(self.persist_failed(record, "commit", e));
        }
        self.request.transaction_id = None;

        self.request.status_code = JobError::NoError;
        let confirm = self.completion_confirmation();
        if let Err(e) = gateway
            .send_swap_completion_status(&self.request, confirm)
            .await
        {
            return Err(self.persist_failed(record, "send swap completion", e));
        }

        // The swap is committed; housekeeping failures past this point
        // must not turn it into a rollback
        if self.request.command == SwapCommand::CompleteCopy {
            match gateway.is_encrypted().await {
                Ok(true) => {
                    if let Some(original) = self.request.orig_pvd_object_id {
                        if let Err(e) = gateway.clear_swap_pending(original).await {
                            error!(
                                "Job {} vd {:#x} cannot clear swap pending on {:#x}: {}",
                                record.job_number, self.request.vd_object_id, original, e
                            );
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "Job {} vd {:#x} cannot read encryption mode: {}",
                        record.job_number, self.request.vd_object_id, e
                    );
                }
            }
        }

        record.succeed();
        Ok(())
    }

    async fn rollback(&mut self, record: &mut JobRecord) {
        let gateway = self.services.gateway.clone();
        let vd_object_id = self.request.vd_object_id;
        let mut payload = JobStatus::Ok;

        if matches!(
            record.previous_phase,
            JobPhase::Persist | JobPhase::UpdateInMemory
        ) {
            match gateway
                .swap_request_rollback(vd_object_id, self.request.command)
                .await
            {
                Ok(()) => {
                    if let Some(transaction_id) = self.request.transaction_id.take() {
                        if let Err(e) = gateway.abort_transaction(transaction_id).await {
                            error!("Job {} cannot abort transaction {}: {}", record.job_number, transaction_id, e);
                            payload = JobStatus::Failure;
                        }
                    }
                }
                Err(e) => {
                    error!(
                        "Job {} vd {:#x} could not clean up; transaction left open: {}",
                        record.job_number, vd_object_id, e
                    );
                    payload = JobStatus::Failure;
                }
            }
        } else {
            info!(
                "Job {} rollback after {} needs no abort",
                record.job_number, record.previous_phase
            );
        }

        if self.request.status_code == JobError::NoError || record.is_ok() {
            error!(
                "Job {} rolling back with error code {} and status {:?}; reporting internal error",
                record.job_number, self.request.status_code, record.status
            );
            self.request.status_code = JobError::InternalError;
        }
        record.status = JobStatus::Failure;
        record.error_code = self.request.status_code;

        if let Err(e) = gateway
            .send_swap_completion_status(&self.request, self.request.operation_confirmation)
            .await
        {
            warn!("Job {} swap completion status not delivered: {}", record.job_number, e);
        }

        if let Err(e) = self.services.events.rollback_write_event(&mut self.request).await {
            error!("Job {} rollback event not written: {}", record.job_number, e);
        }

        if let Err(e) = gateway
            .send_notification(
                &self.request,
                record.job_number,
                record.status,
                self.request.status_code,
                JobPhase::Rollback,
            )
            .await
        {
            warn!("Job {} rollback notification failed: {}", record.job_number, e);
            payload = JobStatus::Failure;
        }

        let _ = gateway.send_job_complete(vd_object_id).await;

        record.payload_status = payload;
        self.services.metrics.record_job_rolled_back();
    }

    async fn commit(&mut self, record: &mut JobRecord) {
        let gateway = self.services.gateway.clone();
        let mut payload = JobStatus::Ok;

        if self.request.status_code != JobError::NoError || !record.is_ok() {
            error!(
                "Job {} committing with error code {} and status {:?}; reporting internal error",
                record.job_number, self.request.status_code, record.status
            );
            self.request.status_code = JobError::InternalError;
            record.status = JobStatus::Failure;
            record.error_code = JobError::InternalError;
        }

        if let Err(e) = self.services.events.commit_write_event(&mut self.request).await {
            error!("Job {} commit event not written: {}", record.job_number, e);
        }

        if let Err(e) = gateway
            .send_notification(
                &self.request,
                record.job_number,
                record.status,
                self.request.status_code,
                JobPhase::Commit,
            )
            .await
        {
            warn!("Job {} commit notification failed: {}", record.job_number, e);
            payload = JobStatus::Failure;
        }

        let _ = gateway.send_job_complete(self.request.vd_object_id).await;

        record.payload_status = payload;
        self.services.metrics.record_job_committed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryArray;
    use crate::sparing::config::SparingConfig;
    use crate::sparing::engine::SparingEngine;
    use crate::sparing::event_log::EventCode;
    use crate::sparing::gateway::ArrayPorts;
    use crate::sparing::job::{JobKind, JobRunner};
    use crate::sparing::taxonomy::InternalError;
    use crate::sparing::wait::ManualClock;

    fn setup() -> (Arc<InMemoryArray>, SwapServices) {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        array.add_spare(InMemoryArray::drive(0x201, DriveType::Sas, 4000));
        let engine = SparingEngine::new(
            SparingConfig::default(),
            ArrayPorts::from_shared(array.clone()),
            ManualClock::new(),
        )
        .unwrap();
        (array, engine.services().clone())
    }

    fn spare_request() -> SwapRequest {
        SwapRequest::new(SwapCommand::PermanentSpare, 0x10c)
            .with_original(0x100)
            .with_spare(0x201)
    }

    #[tokio::test]
    async fn test_commit_with_failure_status_reports_internal_error() {
        let (array, services) = setup();
        let mut job = DriveSwapJob::new(spare_request(), services);
        job.request.status_code = JobError::SpareBusy;
        let mut record = JobRecord::new(5);

        job.commit(&mut record).await;

        assert_eq!(record.status, JobStatus::Failure);
        assert_eq!(record.error_code, JobError::InternalError);
        let notifications = array.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].status, JobStatus::Failure);
        assert_eq!(notifications[0].phase, JobPhase::Commit);
        // The success event no longer matches the status
        assert_eq!(array.events()[0].code, EventCode::SpareUnexpectedError);
        assert_eq!(array.job_complete_count(0x10c), 1);
    }

    #[tokio::test]
    async fn test_rollback_without_error_code_reports_internal_error() {
        let (array, services) = setup();
        let mut job = DriveSwapJob::new(spare_request(), services);
        job.request.status_code = JobError::NoError;
        let mut record = JobRecord::new(6);
        record.previous_phase = JobPhase::Validate;
        record.current_phase = JobPhase::Rollback;

        job.rollback(&mut record).await;

        assert_eq!(record.status, JobStatus::Failure);
        assert_eq!(record.error_code, JobError::InternalError);
        assert_eq!(array.rollback_requests(0x10c), 0);
        assert_eq!(array.notifications()[0].status, JobStatus::Failure);
        assert_eq!(array.job_complete_count(0x10c), 1);
    }

    #[tokio::test]
    async fn test_rollback_notification_matches_report() {
        let (array, services) = setup();
        let mut job = DriveSwapJob::new(spare_request(), services);
        job.request.status_code = JobError::SpareBusy;
        job.request.internal_error = InternalError::DestroyEdgeFailed;
        let mut record = JobRecord::new(7);
        record.fail(JobError::SpareBusy);
        record.previous_phase = JobPhase::Select;
        record.current_phase = JobPhase::Rollback;

        job.rollback(&mut record).await;

        assert_eq!(record.error_code, JobError::SpareBusy);
        let notifications = array.notifications();
        assert_eq!(notifications[0].error_code, record.error_code);
        assert_eq!(array.events()[0].code, EventCode::SpareUnexpectedError);
        assert_eq!(array.events()[0].params[0], "SwapDestroyEdgeFailed");
    }

    #[tokio::test]
    async fn test_rollback_after_update_aborts_transaction() {
        let (array, services) = setup();
        let transaction_id = services.gateway.start_transaction(7).await.unwrap();
        services
            .gateway
            .destroy_edge(transaction_id, 0x10c, FIRST_EDGE_INDEX, false)
            .await
            .unwrap();

        let mut request = spare_request();
        request.transaction_id = Some(transaction_id);
        request.status_code = JobError::SwapCreateEdgeFailed;
        let mut job = DriveSwapJob::new(request, services);
        let mut record = JobRecord::new(7);
        record.fail(JobError::SwapCreateEdgeFailed);
        record.previous_phase = JobPhase::UpdateInMemory;
        record.current_phase = JobPhase::Rollback;

        job.rollback(&mut record).await;

        assert_eq!(record.error_code, JobError::SwapCreateEdgeFailed);
        assert_eq!(record.payload_status, JobStatus::Ok);
        assert_eq!(job.request().transaction_id, None);
        assert_eq!(array.edge_server(0x10c, 0), Some(0x100));
        assert_eq!(array.rollback_requests(0x10c), 1);
        assert!(!array.has_open_transactions());
    }

    #[tokio::test]
    async fn test_refused_rollback_leaves_transaction_open() {
        let (array, services) = setup();
        array.fail_operation("swap_request_rollback");
        let transaction_id = services.gateway.start_transaction(8).await.unwrap();

        let mut request = spare_request();
        request.transaction_id = Some(transaction_id);
        request.status_code = JobError::SwapDestroyEdgeFailed;
        let mut job = DriveSwapJob::new(request, services);
        let mut record = JobRecord::new(8);
        record.fail(JobError::SwapDestroyEdgeFailed);
        record.previous_phase = JobPhase::UpdateInMemory;

        job.rollback(&mut record).await;

        assert!(array.has_open_transactions());
        assert_eq!(array.transactions_aborted(), 0);
        assert_eq!(record.payload_status, JobStatus::Failure);
        assert_eq!(array.job_complete_count(0x10c), 1);
    }

    #[tokio::test]
    async fn test_persist_failure_rolls_back_the_swap() {
        let (array, services) = setup();
        array.fail_operation("commit_transaction");
        let mut job = JobKind::DriveSwap(DriveSwapJob::new(
            SwapRequest::new(SwapCommand::PermanentSpare, 0x10c),
            services,
        ));

        let report = JobRunner::new().run(9, &mut job).await.unwrap();

        assert_eq!(report.phases.last(), Some(&JobPhase::Rollback));
        assert!(report.phases.contains(&JobPhase::Persist));
        assert_eq!(report.error_code, JobError::InternalError);
        assert_eq!(array.transactions_aborted(), 1);
        assert_eq!(array.edge_server(0x10c, 0), Some(0x100));
        assert_eq!(array.config_type(0x201), Some(PvdConfigType::Unconsumed));
    }

    #[tokio::test]
    async fn test_disabled_confirmation_is_recorded_on_request() {
        let (_, services) = setup();
        services.tunables.set_confirmation_enabled(false);
        let mut job = JobKind::DriveSwap(DriveSwapJob::new(
            SwapRequest::new(SwapCommand::PermanentSpare, 0x10c),
            services,
        ));

        let report = JobRunner::new().run(10, &mut job).await.unwrap();

        assert!(report.committed());
        assert!(!report.request.unwrap().operation_confirmation);
    }
}
