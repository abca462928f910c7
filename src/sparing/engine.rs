//! Sparing Engine
//!
//! Wires the components of one engine instance to a set of array ports and
//! hands out jobs. Each instance owns its tunables, so several engines with
//! different configurations can run side by side.

use crate::domain::ports::ClockRef;
use crate::domain::types::*;
use crate::error::Result;
use crate::sparing::config::{SparingConfig, SparingTunables};
use crate::sparing::event_log::EventLogWriter;
use crate::sparing::gateway::{ArrayPorts, TopologyGateway};
use crate::sparing::job::{
    ConfigUpdateRequest, DriveSwapJob, JobKind, JobReport, JobRunner, SwapServices,
    UpdateSparingConfigJob,
};
use crate::sparing::metrics::SparingMetrics;
use crate::sparing::selection::{RankedSpare, SpareSelector};
use crate::sparing::swap::SwapOperations;
use crate::sparing::validation::Validator;
use crate::sparing::wait::Waiter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

pub struct SparingEngine {
    services: SwapServices,
    runner: JobRunner,
    next_job_number: AtomicU64,
}

impl std::fmt::Debug for SparingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparingEngine").finish_non_exhaustive()
    }
}

impl SparingEngine {
    /// Build an engine over `ports`, timing every wait with `clock`
    pub fn new(config: SparingConfig, ports: ArrayPorts, clock: ClockRef) -> Result<Arc<Self>> {
        config.validate()?;
        info!(
            "Starting sparing engine (timeout {}s, confirmation {})",
            config.operation_timeout_secs, config.confirmation_enabled
        );

        let tunables = SparingTunables::new(config);
        let metrics = SparingMetrics::new();
        let waiter = Waiter::new(clock, tunables.clone(), metrics.clone());
        let gateway = TopologyGateway::new(ports.clone(), waiter, tunables.clone());

        let services = SwapServices {
            validator: Validator::new(gateway.clone()),
            selector: SpareSelector::new(
                ports.topology.clone(),
                ports.virtual_drive.clone(),
                metrics.clone(),
            ),
            operations: SwapOperations::new(gateway.clone()),
            events: EventLogWriter::new(ports.event_log.clone(), ports.topology.clone(), metrics.clone()),
            gateway,
            tunables,
            metrics,
        };

        Ok(Arc::new(Self {
            services,
            runner: JobRunner::new(),
            next_job_number: AtomicU64::new(1),
        }))
    }

    pub fn tunables(&self) -> &SparingTunables {
        &self.services.tunables
    }

    pub fn metrics(&self) -> Arc<SparingMetrics> {
        self.services.metrics.clone()
    }

    pub fn services(&self) -> &SwapServices {
        &self.services
    }

    pub fn drive_swap_job(&self, request: SwapRequest) -> JobKind {
        JobKind::DriveSwap(DriveSwapJob::new(request, self.services.clone()))
    }

    pub fn config_update_job(&self, command: Option<ConfigUpdateRequest>) -> JobKind {
        JobKind::UpdateConfig(UpdateSparingConfigJob::new(
            command,
            self.services.tunables.clone(),
            self.services.metrics.clone(),
        ))
    }

    /// Run a job under the next job number
    pub async fn run(&self, job: &mut JobKind) -> Result<JobReport> {
        let job_number = self.next_job_number.fetch_add(1, Ordering::Relaxed);
        self.runner.run(job_number, job).await
    }

    pub async fn submit_swap(&self, request: SwapRequest) -> Result<JobReport> {
        let mut job = self.drive_swap_job(request);
        self.run(&mut job).await
    }

    pub async fn update_config(&self, command: ConfigUpdateRequest) -> Result<JobReport> {
        let mut job = self.config_update_job(Some(command));
        self.run(&mut job).await
    }

    /// Standalone selection against a caller-supplied profile
    pub async fn find_best_suitable_spare(
        &self,
        vd_object_id: ObjectId,
        desired: &DesiredSpareProfile,
    ) -> Result<RankedSpare> {
        self.services
            .selector
            .find_best_suitable_spare(vd_object_id, desired)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::memory::InMemoryArray;
    use crate::sparing::event_log::EventCode;
    use crate::sparing::job::SUCCESS_PATH;
    use crate::sparing::taxonomy::JobError;
    use crate::sparing::wait::ManualClock;
    use assert_matches::assert_matches;

    fn engine(array: &Arc<InMemoryArray>) -> Arc<SparingEngine> {
        SparingEngine::new(
            SparingConfig::default(),
            ArrayPorts::from_shared(array.clone()),
            ManualClock::new(),
        )
        .unwrap()
    }

    fn spare_array() -> Arc<InMemoryArray> {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        array.add_spare(InMemoryArray::drive(0x201, DriveType::Sas, 4000));
        array.add_spare(InMemoryArray::drive(0x202, DriveType::Sas, 2000));
        array
    }

    #[test]
    fn test_rejects_bad_config() {
        let array = InMemoryArray::new();
        let config = SparingConfig {
            operation_timeout_secs: 0,
            ..Default::default()
        };
        let result = SparingEngine::new(config, ArrayPorts::from_shared(array), ManualClock::new());
        assert_matches!(result, Err(Error::ConfigValue { .. }));
    }

    #[tokio::test]
    async fn test_permanent_spare_success_path() {
        let array = spare_array();
        let engine = engine(&array);

        let report = engine
            .submit_swap(SwapRequest::new(SwapCommand::PermanentSpare, 0x10c))
            .await
            .unwrap();

        assert_eq!(report.phases, SUCCESS_PATH.to_vec());
        assert_eq!(report.status, JobStatus::Ok);
        assert_eq!(report.error_code, JobError::NoError);
        assert_eq!(array.edge_server(0x10c, 0), Some(0x202));
        assert!(!array.has_open_transactions());

        let events = array.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, EventCode::PermanentSpareSwappedIn);

        let notifications = array.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].phase, JobPhase::Commit);
        assert_eq!(notifications[0].spare_pvd_object_id, Some(0x202));
        assert_eq!(array.job_complete_count(0x10c), 1);

        let metrics = engine.metrics().snapshot();
        assert_eq!(metrics.jobs_started, 1);
        assert_eq!(metrics.jobs_committed, 1);
        assert_eq!(metrics.jobs_rolled_back, 0);
    }

    #[tokio::test]
    async fn test_invalid_edge_goes_straight_to_rollback() {
        let array = spare_array();
        array.update_vd_info(0x10c, |info| info.swap_edge_index = Some(7));
        let engine = engine(&array);

        let report = engine
            .submit_swap(SwapRequest::new(SwapCommand::UserCopy, 0x10c))
            .await
            .unwrap();

        assert_eq!(report.phases, vec![JobPhase::Validate, JobPhase::Rollback]);
        assert_eq!(report.error_code, JobError::InvalidEdgeIndex);
        assert_eq!(array.transactions_started(), 0);
        assert_eq!(array.transactions_aborted(), 0);
        assert_eq!(array.rollback_requests(0x10c), 0);
        assert_eq!(array.notifications()[0].error_code, JobError::InvalidEdgeIndex);
        assert_eq!(array.job_complete_count(0x10c), 1);
    }

    #[tokio::test]
    async fn test_no_spare_rolls_back_without_abort() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        let engine = engine(&array);

        let report = engine
            .submit_swap(SwapRequest::new(SwapCommand::PermanentSpare, 0x10c))
            .await
            .unwrap();

        assert_eq!(
            report.phases,
            vec![JobPhase::Validate, JobPhase::Select, JobPhase::Rollback]
        );
        assert_eq!(report.error_code, JobError::PresentlyNoSparesAvailable);
        assert_eq!(array.transactions_aborted(), 0);
        // Internal requests repeat while no spare exists
        assert!(array.events().is_empty());
    }

    #[tokio::test]
    async fn test_update_failure_aborts_transaction() {
        let array = spare_array();
        array.fail_operation("create_edge");
        let engine = engine(&array);

        let report = engine
            .submit_swap(SwapRequest::new(SwapCommand::PermanentSpare, 0x10c))
            .await
            .unwrap();

        assert_eq!(
            report.phases,
            vec![
                JobPhase::Validate,
                JobPhase::Select,
                JobPhase::UpdateInMemory,
                JobPhase::Rollback
            ]
        );
        assert_eq!(report.error_code, JobError::SwapCreateEdgeFailed);
        assert_eq!(array.rollback_requests(0x10c), 1);
        assert_eq!(array.transactions_aborted(), 1);
        assert_eq!(array.edge_server(0x10c, 0), Some(0x100));
        assert_eq!(array.config_type(0x202), Some(PvdConfigType::Unconsumed));
        assert_eq!(array.events()[0].code, EventCode::SpareUnexpectedError);
    }

    #[tokio::test]
    async fn test_copy_lifecycle() {
        let array = spare_array();
        let engine = engine(&array);

        let start = engine
            .submit_swap(SwapRequest::new(SwapCommand::UserCopy, 0x10c))
            .await
            .unwrap();
        assert!(start.committed());
        assert_eq!(array.config_mode(0x10c), Some(VdConfigMode::MirrorFirstEdge));

        let complete = engine
            .submit_swap(SwapRequest::new(SwapCommand::CompleteCopy, 0x10c))
            .await
            .unwrap();
        assert!(complete.committed());
        assert_eq!(complete.phases, SUCCESS_PATH.to_vec());
        assert_eq!(array.config_mode(0x10c), Some(VdConfigMode::PassThruSecondEdge));
        assert_eq!(array.edge_server(0x10c, 1), Some(0x202));
        assert_eq!(array.config_type(0x100), Some(PvdConfigType::Unconsumed));

        let codes: Vec<EventCode> = array.events().iter().map(|event| event.code).collect();
        assert_eq!(
            codes,
            vec![EventCode::UserCopySpareDriveSwappedIn, EventCode::DriveSwapOut]
        );
    }

    #[tokio::test]
    async fn test_encrypted_complete_copy_clears_swap_pending() {
        let array = spare_array();
        array.set_encrypted(true);
        let engine = engine(&array);

        engine
            .submit_swap(SwapRequest::new(SwapCommand::UserCopy, 0x10c))
            .await
            .unwrap();
        let complete = engine
            .submit_swap(SwapRequest::new(SwapCommand::CompleteCopy, 0x10c))
            .await
            .unwrap();

        assert!(complete.committed());
        assert!(!array.swap_pending(0x100));
        assert_eq!(array.config_mode(0x10c), Some(VdConfigMode::PassThruSecondEdge));
    }

    #[tokio::test]
    async fn test_swap_pending_cleanup_failure_keeps_committed_copy() {
        let array = spare_array();
        array.set_encrypted(true);
        let engine = engine(&array);

        let start = engine
            .submit_swap(SwapRequest::new(SwapCommand::UserCopy, 0x10c))
            .await
            .unwrap();
        assert!(start.committed());

        array.fail_operation("clear_swap_pending");
        let complete = engine
            .submit_swap(SwapRequest::new(SwapCommand::CompleteCopy, 0x10c))
            .await
            .unwrap();

        assert!(complete.committed());
        assert_eq!(complete.phases, SUCCESS_PATH.to_vec());
        assert_eq!(complete.error_code, JobError::NoError);
        assert_eq!(array.config_mode(0x10c), Some(VdConfigMode::PassThruSecondEdge));
        assert_eq!(array.rollback_requests(0x10c), 0);
        assert!(array.swap_pending(0x100));
        assert!(!array.has_open_transactions());

        let notifications = array.notifications();
        let last = notifications.last().unwrap();
        assert_eq!(last.error_code, JobError::NoError);
        assert_eq!(last.phase, JobPhase::Commit);
        assert_eq!(array.events().last().unwrap().code, EventCode::DriveSwapOut);
    }

    #[tokio::test]
    async fn test_copy_to_named_destination() {
        let array = spare_array();
        array.add_drive(InMemoryArray::drive(0x300, DriveType::Sas, 8000));
        let engine = engine(&array);

        let report = engine
            .submit_swap(SwapRequest::new(SwapCommand::UserCopyTo, 0x10c).with_spare(0x300))
            .await
            .unwrap();

        assert!(report.committed());
        assert_eq!(array.edge_server(0x10c, 1), Some(0x300));
        assert_eq!(report.request.unwrap().spare_object_id, Some(0x300));
    }

    #[tokio::test]
    async fn test_engines_keep_separate_tunables() {
        let array = spare_array();
        let first = engine(&array);
        let second = engine(&array);

        first
            .update_config(ConfigUpdateRequest {
                operation_timeout_secs: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(first.tunables().operation_timeout_secs(), 10);
        assert_eq!(second.tunables().operation_timeout_secs(), 60);
    }

    #[tokio::test]
    async fn test_job_numbers_increase() {
        let array = spare_array();
        let engine = engine(&array);

        let first = engine
            .update_config(ConfigUpdateRequest {
                set_default: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let second = engine
            .submit_swap(SwapRequest::new(SwapCommand::PermanentSpare, 0x10c))
            .await
            .unwrap();
        assert_eq!(first.job_number + 1, second.job_number);
    }
}
