//! Job Phases
//!
//! Every job the engine runs implements [`JobPhases`]. The kind is chosen
//! once when the job is created ([`JobKind`]) and [`JobRunner`] drives its
//! phases in the fixed order:
//!
//! ```text
//! Validate -> Select -> UpdateInMemory -> Persist -> Commit
//!     \          \            \              \
//!      +----------+------------+--------------+--> Rollback
//! ```
//!
//! Kinds without a phase (the config-update job has no Select, Persist or
//! Commit) skip it.

pub mod config_update;
pub mod drive_swap;

pub use config_update::{ConfigUpdateRequest, UpdateSparingConfigJob};
pub use drive_swap::{DriveSwapJob, SwapServices};

use crate::domain::types::*;
use crate::error::{Error, Result};
use crate::sparing::taxonomy::JobError;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

// =============================================================================
// Phase Contract
// =============================================================================

/// Phase callbacks of one job. Each phase records its outcome on the job
/// record and returns `Err` when the job must roll back.
#[async_trait]
pub trait JobPhases: Send {
    /// Short name used in logs and reports
    fn name(&self) -> &'static str;

    /// Whether this kind runs `phase` at all
    fn has_phase(&self, phase: JobPhase) -> bool;

    async fn validate(&mut self, record: &mut JobRecord) -> Result<()>;

    async fn select(&mut self, record: &mut JobRecord) -> Result<()> {
        record.succeed();
        Ok(())
    }

    async fn update_in_memory(&mut self, record: &mut JobRecord) -> Result<()>;

    async fn persist(&mut self, record: &mut JobRecord) -> Result<()> {
        record.succeed();
        Ok(())
    }

    /// Undo whatever the failed phase left behind and report the failure.
    /// Always completes the job.
    async fn rollback(&mut self, record: &mut JobRecord);

    /// Report success. Always completes the job.
    async fn commit(&mut self, _record: &mut JobRecord) {}
}

/// Job variants known to the engine
pub enum JobKind {
    DriveSwap(DriveSwapJob),
    UpdateConfig(UpdateSparingConfigJob),
}

impl JobKind {
    pub fn phases(&mut self) -> &mut dyn JobPhases {
        match self {
            JobKind::DriveSwap(job) => job,
            JobKind::UpdateConfig(job) => job,
        }
    }

    /// Swap request of a drive swap job
    pub fn swap_request(&self) -> Option<&SwapRequest> {
        match self {
            JobKind::DriveSwap(job) => Some(job.request()),
            JobKind::UpdateConfig(_) => None,
        }
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Phases a successful job passes through, in order
pub const SUCCESS_PATH: [JobPhase; 5] = [
    JobPhase::Validate,
    JobPhase::Select,
    JobPhase::UpdateInMemory,
    JobPhase::Persist,
    JobPhase::Commit,
];

/// Whether `next` may follow `previous`
pub fn is_valid_transition(previous: JobPhase, next: JobPhase) -> bool {
    use JobPhase::*;
    match next {
        Validate => previous == Queued,
        Select => previous == Validate,
        UpdateInMemory => matches!(previous, Validate | Select),
        Persist => previous == UpdateInMemory,
        Commit => matches!(previous, UpdateInMemory | Persist),
        Rollback => matches!(previous, Validate | Select | UpdateInMemory | Persist),
        Queued => false,
    }
}

/// Outcome of one job run
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_number: u64,
    pub kind: &'static str,
    /// Phases that ran, in order
    pub phases: Vec<JobPhase>,
    pub status: JobStatus,
    pub error_code: JobError,
    pub payload_status: JobStatus,
    /// Final state of the swap request, for drive swap jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<SwapRequest>,
}

impl JobReport {
    pub fn committed(&self) -> bool {
        self.phases.last() == Some(&JobPhase::Commit)
    }
}

/// Drives a job through its phases
#[derive(Debug, Default)]
pub struct JobRunner;

impl JobRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run every phase of `job`, rolling back on the first failure
    pub async fn run(&self, job_number: u64, job: &mut JobKind) -> Result<JobReport> {
        let mut record = JobRecord::new(job_number);
        let mut ran = Vec::with_capacity(SUCCESS_PATH.len());
        let phases = job.phases();
        let name = phases.name();

        info!("Job {} ({}) started", job_number, name);

        let mut failed = false;
        for phase in SUCCESS_PATH {
            if !phases.has_phase(phase) {
                continue;
            }
            if phase == JobPhase::Commit {
                break;
            }
            enter(&mut record, phase)?;
            ran.push(phase);

            let result = match phase {
                JobPhase::Validate => phases.validate(&mut record).await,
                JobPhase::Select => phases.select(&mut record).await,
                JobPhase::UpdateInMemory => phases.update_in_memory(&mut record).await,
                JobPhase::Persist => phases.persist(&mut record).await,
                _ => Ok(()),
            };

            if let Err(e) = result {
                warn!("Job {} ({}) failed in {}: {}", job_number, name, phase, e);
                if record.is_ok() {
                    record.fail(e.job_error());
                }
                failed = true;
                break;
            }
            debug!("Job {} ({}) finished {}", job_number, name, phase);
        }

        if failed && phases.has_phase(JobPhase::Rollback) {
            enter(&mut record, JobPhase::Rollback)?;
            ran.push(JobPhase::Rollback);
            phases.rollback(&mut record).await;
        } else if !failed && phases.has_phase(JobPhase::Commit) {
            enter(&mut record, JobPhase::Commit)?;
            ran.push(JobPhase::Commit);
            phases.commit(&mut record).await;
        }

        info!(
            "Job {} ({}) finished: {:?} {} after {:?}",
            job_number, name, record.status, record.error_code, ran
        );

        Ok(JobReport {
            job_number,
            kind: name,
            phases: ran,
            status: record.status,
            error_code: record.error_code,
            payload_status: record.payload_status,
            request: job.swap_request().cloned(),
        })
    }
}

fn enter(record: &mut JobRecord, phase: JobPhase) -> Result<()> {
    if !is_valid_transition(record.current_phase, phase) {
        return Err(Error::PhaseOrder {
            phase: phase.to_string(),
            previous: record.current_phase.to_string(),
        });
    }
    record.previous_phase = record.current_phase;
    record.current_phase = phase;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_transitions() {
        assert!(is_valid_transition(JobPhase::Queued, JobPhase::Validate));
        assert!(is_valid_transition(JobPhase::Validate, JobPhase::UpdateInMemory));
        assert!(is_valid_transition(JobPhase::Persist, JobPhase::Commit));
        assert!(is_valid_transition(JobPhase::Validate, JobPhase::Rollback));
        assert!(!is_valid_transition(JobPhase::Queued, JobPhase::Commit));
        assert!(!is_valid_transition(JobPhase::Select, JobPhase::Persist));
        assert!(!is_valid_transition(JobPhase::Commit, JobPhase::Rollback));
        assert!(!is_valid_transition(JobPhase::Rollback, JobPhase::Commit));
    }

    #[test]
    fn test_success_path_is_ordered() {
        let mut previous = JobPhase::Queued;
        for phase in SUCCESS_PATH {
            assert!(is_valid_transition(previous, phase), "{} after {}", phase, previous);
            previous = phase;
        }
    }

    #[test]
    fn test_enter_rejects_out_of_order() {
        let mut record = JobRecord::new(1);
        enter(&mut record, JobPhase::Validate).unwrap();
        let result = enter(&mut record, JobPhase::Persist);
        assert_matches!(result, Err(Error::PhaseOrder { .. }));
        assert_eq!(record.current_phase, JobPhase::Validate);
        assert_eq!(record.previous_phase, JobPhase::Queued);
    }
}
