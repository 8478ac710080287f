//! Prometheus metrics for the upload worker
//!
//! This module tracks:
//! - Dispatch: uploads by outcome, quota deferrals, credential skips
//! - Cycles: duration of each poll cycle
//! - Quota: remaining units per API project, resets
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram, Counter,
    CounterVec, Encoder, GaugeVec, Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all worker metrics
struct WorkerMetrics {
    uploads: CounterVec,
    quota_deferrals: Counter,
    credential_skips: Counter,
    lost_claims: Counter,
    cycle_duration: Histogram,
    cycles: CounterVec,
    quota_remaining: GaugeVec,
    quota_resets: Counter,
}

static WORKER_METRICS: OnceLock<WorkerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Registration failures are returned; the application may continue and
/// every recording function then does nothing.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = shortcast::metrics::init_metrics() {
///     tracing::warn!(error = %e, "Metrics disabled");
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = WorkerMetrics {
        uploads: register_counter_vec!(
            "shortcast_uploads_total",
            "Upload attempts by outcome (done, retry, failed)",
            &["outcome"]
        )?,
        quota_deferrals: register_counter!(
            "shortcast_quota_deferrals_total",
            "Due uploads left untouched because no project had quota"
        )?,
        credential_skips: register_counter!(
            "shortcast_credential_skips_total",
            "Due uploads skipped because the account token was unavailable"
        )?,
        lost_claims: register_counter!(
            "shortcast_lost_claims_total",
            "Claims that lost a race with another writer"
        )?,
        cycle_duration: register_histogram!(
            "shortcast_cycle_duration_seconds",
            "Dispatch cycle duration in seconds",
            vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 900.0]
        )?,
        cycles: register_counter_vec!(
            "shortcast_cycles_total",
            "Dispatch cycles by result (completed, skipped, aborted)",
            &["result"]
        )?,
        quota_remaining: register_gauge_vec!(
            "shortcast_quota_remaining_units",
            "Quota units remaining today per API project",
            &["project"]
        )?,
        quota_resets: register_counter!(
            "shortcast_quota_resets_total",
            "Daily quota resets applied"
        )?,
    };

    WORKER_METRICS
        .set(metrics)
        .map_err(|_| "Worker metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    WORKER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the outcome of one transport attempt
pub fn record_upload_outcome(outcome: &str) {
    if let Some(m) = WORKER_METRICS.get() {
        m.uploads.with_label_values(&[outcome]).inc();
    }
}

pub fn record_quota_deferral() {
    if let Some(m) = WORKER_METRICS.get() {
        m.quota_deferrals.inc();
    }
}

pub fn record_credential_skips(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = WORKER_METRICS.get() {
        m.credential_skips.inc_by(count as f64);
    }
}

pub fn record_lost_claim() {
    if let Some(m) = WORKER_METRICS.get() {
        m.lost_claims.inc();
    }
}

/// Record a finished cycle
pub fn record_cycle(result: &str, duration_secs: f64) {
    let Some(m) = WORKER_METRICS.get() else {
        return;
    };

    m.cycles.with_label_values(&[result]).inc();
    if result != "skipped" {
        m.cycle_duration.observe(duration_secs);
    }
}

/// Publish a project's remaining quota
pub fn set_quota_remaining(project: &str, remaining: u64) {
    if let Some(m) = WORKER_METRICS.get() {
        m.quota_remaining
            .with_label_values(&[project])
            .set(remaining as f64);
    }
}

pub fn record_quota_resets(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = WORKER_METRICS.get() {
        m.quota_resets.inc_by(count as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================
