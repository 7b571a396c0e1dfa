//! Workload accounting
//!
//! Every admitted request is metered in domain-specific workload units
//! (words of prompt, seconds of audio). The tracker carries the set of
//! outstanding samples as aggregate counts; the reporter reads them to
//! describe pending load and the calibrator normalizes them into an
//! expected queue drain time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};

/// One metered request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSample {
    /// Workload units estimated from the payload before forwarding
    pub units: u64,
    /// When the sample was recorded (before the upstream call)
    pub started_at: DateTime<Utc>,
    /// When the request finished draining, on any exit path
    pub finished_at: Option<DateTime<Utc>>,
    /// Whether the upstream call completed successfully
    pub success: bool,
}

impl WorkloadSample {
    /// Wall-clock duration, available once finalized
    pub fn duration_seconds(&self) -> Option<f64> {
        self.finished_at.map(|end| {
            let micros = (end - self.started_at).num_microseconds().unwrap_or(0);
            (micros.max(0) as f64) / 1_000_000.0
        })
    }
}

/// Aggregate counters over all samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSnapshot {
    /// Requests admitted but not yet finalized
    pub pending_requests: u64,
    /// Workload units belonging to pending requests
    pub pending_units: u64,
    /// Finalized successful requests
    pub completed: u64,
    /// Finalized failed requests (transport errors, disconnects, non-200s)
    pub failed: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    snapshot: WorkloadSnapshot,
}

/// Shared pending-workload ledger.
///
/// Mutations are single lock acquisitions with no suspension points, so
/// counts stay consistent under the cooperative scheduler. Pending counts
/// saturate at zero rather than going negative.
#[derive(Debug, Clone, Default)]
pub struct WorkloadTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl WorkloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending sample before the upstream call is issued
    pub fn begin(&self, units: u64) -> WorkloadSample {
        let mut state = self.state.lock().expect("workload tracker poisoned");
        state.snapshot.pending_requests += 1;
        state.snapshot.pending_units += units;
        WorkloadSample {
            units,
            started_at: Utc::now(),
            finished_at: None,
            success: false,
        }
    }

    /// Finalize a sample exactly once, on any exit path
    pub fn finish(&self, sample: &mut WorkloadSample, success: bool) {
        debug_assert!(sample.finished_at.is_none(), "sample finalized twice");
        sample.finished_at = Some(Utc::now());
        sample.success = success;

        let mut state = self.state.lock().expect("workload tracker poisoned");
        state.snapshot.pending_requests = state.snapshot.pending_requests.saturating_sub(1);
        state.snapshot.pending_units = state.snapshot.pending_units.saturating_sub(sample.units);
        if success {
            state.snapshot.completed += 1;
        } else {
            state.snapshot.failed += 1;
        }
    }

    /// Aggregate counters at this instant
    pub fn snapshot(&self) -> WorkloadSnapshot {
        self.state.lock().expect("workload tracker poisoned").snapshot
    }

    /// Workload units belonging to requests currently in flight
    pub fn pending_units(&self) -> u64 {
        self.snapshot().pending_units
    }
}

/// Measured throughput of the model server, in workload units per second.
///
/// Holds the configured conservative default until calibration overwrites
/// it; read-mostly afterwards.
#[derive(Debug, Clone)]
pub struct CapacityEstimate {
    units_per_second: Arc<RwLock<f64>>,
}

impl CapacityEstimate {
    /// Create an estimate holding the conservative default
    pub fn new(default_units_per_second: f64) -> Self {
        Self {
            units_per_second: Arc::new(RwLock::new(default_units_per_second.max(f64::MIN_POSITIVE))),
        }
    }

    pub fn units_per_second(&self) -> f64 {
        *self.units_per_second.read().expect("capacity estimate poisoned")
    }

    /// Overwrite the estimate with a measured value; non-positive
    /// measurements are rejected and the previous value kept
    pub fn calibrate_to(&self, measured: f64) -> bool {
        if !measured.is_finite() || measured <= 0.0 {
            return false;
        }
        *self.units_per_second.write().expect("capacity estimate poisoned") = measured;
        true
    }

    /// Expected time to drain the given pending units at current capacity
    pub fn expected_drain_seconds(&self, pending_units: u64) -> f64 {
        pending_units as f64 / self.units_per_second()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_finish_roundtrip() {
        let tracker = WorkloadTracker::new();
        let mut sample = tracker.begin(256);

        let snap = tracker.snapshot();
        assert_eq!(snap.pending_requests, 1);
        assert_eq!(snap.pending_units, 256);

        tracker.finish(&mut sample, true);
        let snap = tracker.snapshot();
        assert_eq!(snap.pending_requests, 0);
        assert_eq!(snap.pending_units, 0);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 0);
        assert!(sample.finished_at.is_some());
        assert!(sample.success);
    }

    #[test]
    fn test_failed_sample_still_finalizes() {
        let tracker = WorkloadTracker::new();
        let mut sample = tracker.begin(30);
        tracker.finish(&mut sample, false);

        let snap = tracker.snapshot();
        assert_eq!(snap.pending_units, 0);
        assert_eq!(snap.failed, 1);
        assert!(!sample.success);
    }

    #[test]
    fn test_pending_never_negative() {
        let tracker = WorkloadTracker::new();
        let mut orphan = WorkloadSample {
            units: 10,
            started_at: Utc::now(),
            finished_at: None,
            success: false,
        };
        // Finalizing a sample the tracker never saw must saturate, not wrap
        tracker.finish(&mut orphan, false);
        assert_eq!(tracker.snapshot().pending_units, 0);
        assert_eq!(tracker.snapshot().pending_requests, 0);
    }

    #[test]
    fn test_overlapping_samples() {
        let tracker = WorkloadTracker::new();
        let mut first = tracker.begin(100);
        let mut second = tracker.begin(50);
        assert_eq!(tracker.pending_units(), 150);

        tracker.finish(&mut second, true);
        assert_eq!(tracker.pending_units(), 100);
        tracker.finish(&mut first, true);
        assert_eq!(tracker.pending_units(), 0);
    }

    #[test]
    fn test_sample_duration() {
        let started = Utc::now();
        let sample = WorkloadSample {
            units: 1,
            started_at: started,
            finished_at: Some(started + chrono::Duration::milliseconds(1500)),
            success: true,
        };
        let secs = sample.duration_seconds().unwrap();
        assert!((secs - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_capacity_default_and_calibration() {
        let capacity = CapacityEstimate::new(10.0);
        assert!((capacity.units_per_second() - 10.0).abs() < f64::EPSILON);

        assert!(capacity.calibrate_to(42.5));
        assert!((capacity.units_per_second() - 42.5).abs() < f64::EPSILON);

        // Bogus measurements keep the previous estimate
        assert!(!capacity.calibrate_to(0.0));
        assert!(!capacity.calibrate_to(f64::NAN));
        assert!((capacity.units_per_second() - 42.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_expected_drain() {
        let capacity = CapacityEstimate::new(8.0);
        assert!((capacity.expected_drain_seconds(80) - 10.0).abs() < 1e-9);
    }
}
