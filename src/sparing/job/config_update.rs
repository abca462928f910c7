//! Sparing Config Update Job
//!
//! Changes the engine tunables. Runs Validate and UpdateInMemory; a failure
//! rolls the tunables back to their defaults.

use super::JobPhases;
use crate::domain::types::*;
use crate::error::{Error, Result};
use crate::sparing::config::{validate_operation_timeout, SparingTunables};
use crate::sparing::metrics::SparingMetrics;
use crate::sparing::taxonomy::JobError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Requested change to the tunables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdateRequest {
    /// Restore the defaults; other fields are ignored
    pub set_default: bool,
    /// Stop waiting for confirmations (testing only)
    pub disable_confirmation: bool,
    /// New operation timeout, required unless one of the flags is set
    pub operation_timeout_secs: u32,
}

pub struct UpdateSparingConfigJob {
    command: Option<ConfigUpdateRequest>,
    tunables: SparingTunables,
    metrics: Arc<SparingMetrics>,
}

impl UpdateSparingConfigJob {
    pub fn new(
        command: Option<ConfigUpdateRequest>,
        tunables: SparingTunables,
        metrics: Arc<SparingMetrics>,
    ) -> Self {
        Self {
            command,
            tunables,
            metrics,
        }
    }

    fn refuse(record: &mut JobRecord, code: JobError) -> Error {
        record.fail(code);
        Error::JobFailed { job_error: code }
    }
}

#[async_trait]
impl JobPhases for UpdateSparingConfigJob {
    fn name(&self) -> &'static str {
        "update_sparing_config"
    }

    fn has_phase(&self, phase: JobPhase) -> bool {
        matches!(
            phase,
            JobPhase::Validate | JobPhase::UpdateInMemory | JobPhase::Rollback
        )
    }

    async fn validate(&mut self, record: &mut JobRecord) -> Result<()> {
        let Some(command) = &self.command else {
            warn!("Job {} has no config update command", record.job_number);
            return Err(Self::refuse(record, JobError::NullCommand));
        };

        if !command.set_default && !command.disable_confirmation {
            if let Err(e) = validate_operation_timeout(command.operation_timeout_secs) {
                warn!("Job {} rejected: {}", record.job_number, e);
                return Err(Self::refuse(record, JobError::InvalidValue));
            }
        }

        record.succeed();
        Ok(())
    }

    async fn update_in_memory(&mut self, record: &mut JobRecord) -> Result<()> {
        let Some(command) = &self.command else {
            return Err(Self::refuse(record, JobError::NullCommand));
        };

        if command.set_default {
            self.tunables.reset();
        } else if command.disable_confirmation {
            self.tunables.set_confirmation_enabled(false);
        } else {
            if let Err(e) = self.tunables.set_operation_timeout_secs(command.operation_timeout_secs) {
                warn!("Job {} cannot set timeout: {}", record.job_number, e);
                return Err(Self::refuse(record, JobError::InvalidValue));
            }
            self.tunables.set_confirmation_enabled(true);
        }

        self.metrics.record_config_update();
        record.succeed();
        Ok(())
    }

    async fn rollback(&mut self, record: &mut JobRecord) {
        info!(
            "Job {} config update failed ({}); restoring defaults",
            record.job_number, record.error_code
        );
        self.tunables.reset();
        self.metrics.record_job_rolled_back();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparing::config::{SparingConfig, DEFAULT_OPERATION_TIMEOUT_SECS};
    use crate::sparing::job::{JobKind, JobRunner};

    fn job(command: Option<ConfigUpdateRequest>, tunables: &SparingTunables) -> JobKind {
        JobKind::UpdateConfig(UpdateSparingConfigJob::new(
            command,
            tunables.clone(),
            SparingMetrics::new(),
        ))
    }

    #[tokio::test]
    async fn test_set_timeout() {
        let tunables = SparingTunables::new(SparingConfig::default());
        let mut job = job(
            Some(ConfigUpdateRequest {
                operation_timeout_secs: 120,
                ..Default::default()
            }),
            &tunables,
        );

        let report = JobRunner::new().run(1, &mut job).await.unwrap();
        assert_eq!(report.phases, vec![JobPhase::Validate, JobPhase::UpdateInMemory]);
        assert_eq!(report.error_code, JobError::NoError);
        assert_eq!(tunables.operation_timeout_secs(), 120);
        assert!(tunables.confirmation_enabled());
    }

    #[tokio::test]
    async fn test_disable_then_restore() {
        let tunables = SparingTunables::new(SparingConfig::default());
        tunables.set_operation_timeout_secs(30).unwrap();

        let mut disable = job(
            Some(ConfigUpdateRequest {
                disable_confirmation: true,
                ..Default::default()
            }),
            &tunables,
        );
        JobRunner::new().run(1, &mut disable).await.unwrap();
        assert!(!tunables.confirmation_enabled());
        assert_eq!(tunables.operation_timeout_secs(), 30);

        let mut restore = job(
            Some(ConfigUpdateRequest {
                set_default: true,
                operation_timeout_secs: 0,
                ..Default::default()
            }),
            &tunables,
        );
        JobRunner::new().run(2, &mut restore).await.unwrap();
        assert!(tunables.confirmation_enabled());
        assert_eq!(tunables.operation_timeout_secs(), DEFAULT_OPERATION_TIMEOUT_SECS);
    }

    #[tokio::test]
    async fn test_out_of_range_timeout_rolls_back() {
        let tunables = SparingTunables::new(SparingConfig::default());
        tunables.set_operation_timeout_secs(30).unwrap();
        let mut job = job(
            Some(ConfigUpdateRequest {
                operation_timeout_secs: 601,
                ..Default::default()
            }),
            &tunables,
        );

        let report = JobRunner::new().run(1, &mut job).await.unwrap();
        assert_eq!(report.phases, vec![JobPhase::Validate, JobPhase::Rollback]);
        assert_eq!(report.error_code, JobError::InvalidValue);
        assert_eq!(report.status, JobStatus::Failure);
        assert_eq!(tunables.operation_timeout_secs(), DEFAULT_OPERATION_TIMEOUT_SECS);
    }

    #[tokio::test]
    async fn test_missing_command() {
        let tunables = SparingTunables::new(SparingConfig::default());
        let mut job = job(None, &tunables);

        let report = JobRunner::new().run(1, &mut job).await.unwrap();
        assert_eq!(report.error_code, JobError::NullCommand);
        assert!(!report.committed());
    }
}
