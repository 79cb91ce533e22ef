//! Job and frame metrics.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "crowdmon_jobs_submitted_total";
    pub const JOBS_REJECTED_TOTAL: &str = "crowdmon_jobs_rejected_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "crowdmon_jobs_completed_total";
    pub const JOBS_STOPPED_TOTAL: &str = "crowdmon_jobs_stopped_total";
    pub const JOBS_FAILED_TOTAL: &str = "crowdmon_jobs_failed_total";
    pub const JOBS_ACTIVE: &str = "crowdmon_jobs_active";
    pub const FRAMES_PROCESSED_TOTAL: &str = "crowdmon_frames_processed_total";
    pub const FRAME_DURATION_SECONDS: &str = "crowdmon_frame_duration_seconds";
    pub const RESULTS_EXPIRED_TOTAL: &str = "crowdmon_results_expired_total";
}

pub fn record_job_submitted(kind: &str) {
    counter!(names::JOBS_SUBMITTED_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn record_job_rejected(reason: &str) {
    counter!(names::JOBS_REJECTED_TOTAL, "reason" => reason.to_string()).increment(1);
}

pub fn record_job_completed(kind: &str) {
    counter!(names::JOBS_COMPLETED_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn record_job_stopped(kind: &str) {
    counter!(names::JOBS_STOPPED_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn record_job_failed(kind: &str, error_kind: &str) {
    let labels = [
        ("kind", kind.to_string()),
        ("error", error_kind.to_string()),
    ];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn set_active_jobs(count: usize) {
    gauge!(names::JOBS_ACTIVE).set(count as f64);
}

/// Record one fully processed frame.
pub fn record_frame(kind: &str, duration_secs: f64) {
    counter!(names::FRAMES_PROCESSED_TOTAL, "kind" => kind.to_string()).increment(1);
    histogram!(names::FRAME_DURATION_SECONDS, "kind" => kind.to_string()).record(duration_secs);
}

pub fn record_results_expired(count: usize) {
    counter!(names::RESULTS_EXPIRED_TOTAL).increment(count as u64);
}
