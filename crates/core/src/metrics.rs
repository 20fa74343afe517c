//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Scheduler (admission, queue depth, running jobs)
//! - Job pipeline (stage attempts, stage durations, terminal states)
//! - Workspaces (disposals)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Scheduler Metrics
// =============================================================================

/// Jobs accepted by `submit`.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("mediafetch_jobs_submitted_total", "Total jobs admitted").unwrap()
});

/// Jobs refused at submission by reason.
pub static JOBS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediafetch_jobs_rejected_total", "Total jobs rejected at submission"),
        &["reason"], // "capacity", "invalid_request", "not_running"
    )
    .unwrap()
});

/// Jobs reaching a terminal state.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediafetch_jobs_finished_total", "Total jobs finished"),
        &["state"], // "done", "failed", "cancelled"
    )
    .unwrap()
});

/// Jobs currently holding a slot.
pub static JOBS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("mediafetch_jobs_running", "Jobs currently holding a slot").unwrap()
});

/// Jobs waiting for a slot.
pub static JOBS_QUEUED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("mediafetch_jobs_queued", "Jobs waiting for a slot").unwrap()
});

// =============================================================================
// Pipeline Metrics
// =============================================================================

/// Stage attempts by stage and result.
pub static STAGE_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediafetch_stage_attempts_total", "Total stage attempts"),
        &["stage", "result"], // result: "success", "retryable", "fatal", "timeout", ...
    )
    .unwrap()
});

/// Stage attempt duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mediafetch_stage_duration_seconds",
            "Duration of a single stage attempt",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]),
        &["stage"],
    )
    .unwrap()
});

/// Whole job duration from slot grant to terminal state.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("mediafetch_job_duration_seconds", "Duration of a running job")
            .buckets(vec![1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0]),
        &["state"],
    )
    .unwrap()
});

// =============================================================================
// Workspace Metrics
// =============================================================================

/// Workspaces removed by job cleanup.
pub static WORKSPACES_DISPOSED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mediafetch_workspaces_disposed_total",
        "Total workspaces disposed",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Scheduler
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOBS_REJECTED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOBS_RUNNING.clone()),
        Box::new(JOBS_QUEUED.clone()),
        // Pipeline
        Box::new(STAGE_ATTEMPTS.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(JOB_DURATION.clone()),
        // Workspaces
        Box::new(WORKSPACES_DISPOSED.clone()),
    ]
}

/// Registers every core metric in `registry`.
pub fn register_metrics(registry: &prometheus::Registry) -> prometheus::Result<()> {
    for metric in all_metrics() {
        registry.register(metric)?;
    }
    Ok(())
}
