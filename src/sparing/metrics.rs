//! Sparing Metrics
//!
//! Lock-free counters for job outcomes, spare selection and confirmation
//! waits, with a Prometheus text export.

use crate::error::{Error, Result};
use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// =============================================================================
// Counters
// =============================================================================

/// Engine counters, shared by every component of one engine instance
#[derive(Debug, Default)]
pub struct SparingMetrics {
    /// Jobs that entered Validate
    pub jobs_started: AtomicU64,
    /// Jobs that finished through Commit
    pub jobs_committed: AtomicU64,
    /// Jobs that finished through Rollback
    pub jobs_rolled_back: AtomicU64,
    /// Select phases that produced a spare
    pub selections_succeeded: AtomicU64,
    /// Select phases that found nothing usable
    pub selections_failed: AtomicU64,
    /// Candidate drives examined by selection
    pub candidates_evaluated: AtomicU64,
    /// Confirmation waits that were satisfied
    pub waits_satisfied: AtomicU64,
    /// Confirmation waits that timed out
    pub wait_timeouts: AtomicU64,
    /// Event log records written
    pub events_written: AtomicU64,
    /// Configuration updates applied
    pub config_updates: AtomicU64,
}

impl SparingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    pub fn record_job_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_job_committed(&self) {
        self.jobs_committed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_job_rolled_back(&self) {
        self.jobs_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished selection and the number of candidates it examined
    #[inline]
    pub fn record_selection(&self, found: bool, candidates: usize) {
        if found {
            self.selections_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.selections_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.candidates_evaluated
            .fetch_add(candidates as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_wait_satisfied(&self) {
        self.waits_satisfied.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_wait_timeout(&self) {
        self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_written(&self) {
        self.events_written.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_config_update(&self) {
        self.config_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_committed: self.jobs_committed.load(Ordering::Relaxed),
            jobs_rolled_back: self.jobs_rolled_back.load(Ordering::Relaxed),
            selections_succeeded: self.selections_succeeded.load(Ordering::Relaxed),
            selections_failed: self.selections_failed.load(Ordering::Relaxed),
            candidates_evaluated: self.candidates_evaluated.load(Ordering::Relaxed),
            waits_satisfied: self.waits_satisfied.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            events_written: self.events_written.load(Ordering::Relaxed),
            config_updates: self.config_updates.load(Ordering::Relaxed),
        }
    }

    /// Render the counters in the Prometheus text exposition format
    pub fn to_prometheus_text(&self) -> Result<String> {
        let registry = Registry::new_custom(Some("drive_sparing".into()), None)
            .map_err(|e| Error::Internal(format!("metrics registry: {}", e)))?;

        for (name, help, value) in self.snapshot().counters() {
            let counter = IntCounter::with_opts(Opts::new(name, help))
                .map_err(|e| Error::Internal(format!("metric {}: {}", name, e)))?;
            counter.inc_by(value);
            registry
                .register(Box::new(counter))
                .map_err(|e| Error::Internal(format!("metric {}: {}", name, e)))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("metrics encode: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics utf8: {}", e)))
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Serializable copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_started: u64,
    pub jobs_committed: u64,
    pub jobs_rolled_back: u64,
    pub selections_succeeded: u64,
    pub selections_failed: u64,
    pub candidates_evaluated: u64,
    pub waits_satisfied: u64,
    pub wait_timeouts: u64,
    pub events_written: u64,
    pub config_updates: u64,
}

impl MetricsSnapshot {
    fn counters(&self) -> [(&'static str, &'static str, u64); 10] {
        [
            ("jobs_started_total", "Jobs that entered validation", self.jobs_started),
            ("jobs_committed_total", "Jobs finished through commit", self.jobs_committed),
            ("jobs_rolled_back_total", "Jobs finished through rollback", self.jobs_rolled_back),
            ("selections_succeeded_total", "Spare selections that found a drive", self.selections_succeeded),
            ("selections_failed_total", "Spare selections that found nothing", self.selections_failed),
            ("candidates_evaluated_total", "Candidate drives examined", self.candidates_evaluated),
            ("waits_satisfied_total", "Confirmation waits satisfied", self.waits_satisfied),
            ("wait_timeouts_total", "Confirmation waits that timed out", self.wait_timeouts),
            ("events_written_total", "Event log records written", self.events_written),
            ("config_updates_total", "Configuration updates applied", self.config_updates),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = SparingMetrics::new();
        metrics.record_job_started();
        metrics.record_job_committed();
        metrics.record_selection(true, 4);
        metrics.record_selection(false, 2);
        metrics.record_wait_timeout();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_started, 1);
        assert_eq!(snapshot.jobs_committed, 1);
        assert_eq!(snapshot.selections_succeeded, 1);
        assert_eq!(snapshot.selections_failed, 1);
        assert_eq!(snapshot.candidates_evaluated, 6);
        assert_eq!(snapshot.wait_timeouts, 1);
        assert_eq!(snapshot.jobs_rolled_back, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = SparingMetrics::new();
        metrics.record_job_rolled_back();
        metrics.record_job_rolled_back();

        let text = metrics.to_prometheus_text().unwrap();
        assert!(text.contains("drive_sparing_jobs_rolled_back_total 2"));
        assert!(text.contains("drive_sparing_jobs_committed_total 0"));
    }
}
