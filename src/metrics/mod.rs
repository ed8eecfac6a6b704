//! Prometheus metrics for proctor nodes
//!
//! Tracks admissions per lane, session finalizations, critical-section entries
//! and clock synchronization.
//!
//! # Usage
//!
//! Call `init_metrics()` at node startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Encoder, Gauge,
    Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct NodeMetrics {
    admissions: CounterVec,
    finalizations: CounterVec,
    cs_entries: CounterVec,
    cs_wait: Histogram,
    sync_runs: CounterVec,
    clock_offset: Gauge,
}

static NODE_METRICS: OnceLock<NodeMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Register all metrics with the default registry.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = NodeMetrics {
        admissions: register_counter_vec!(
            "proctor_admissions_total",
            "Admission attempts by outcome (primary, backup, overloaded)",
            &["outcome"]
        )?,
        finalizations: register_counter_vec!(
            "proctor_finalizations_total",
            "Finalized sessions by completion source and race flag",
            &["source", "race_resolved"]
        )?,
        cs_entries: register_counter_vec!(
            "proctor_critical_section_entries_total",
            "Critical section entries by mode (all_replies, timed_out)",
            &["mode"]
        )?,
        cs_wait: register_histogram!(
            "proctor_critical_section_wait_seconds",
            "Time from request to critical section entry",
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
        )?,
        sync_runs: register_counter_vec!(
            "proctor_sync_participants_total",
            "Berkeley sync participants by reachability",
            &["reachable"]
        )?,
        clock_offset: register_gauge!(
            "proctor_clock_offset_seconds",
            "Current wall clock offset of this node"
        )?,
    };

    NODE_METRICS
        .set(metrics)
        .map_err(|_| "Node metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

pub fn metrics_initialized() -> bool {
    NODE_METRICS.get().is_some()
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

pub fn record_admission(outcome: &str) {
    if let Some(m) = NODE_METRICS.get() {
        m.admissions.with_label_values(&[outcome]).inc();
    }
}

pub fn record_finalize(source: &str, race_resolved: bool) {
    if let Some(m) = NODE_METRICS.get() {
        let race = if race_resolved { "true" } else { "false" };
        m.finalizations.with_label_values(&[source, race]).inc();
    }
}

pub fn record_cs_entry(mode: &str) {
    if let Some(m) = NODE_METRICS.get() {
        m.cs_entries.with_label_values(&[mode]).inc();
    }
}

pub fn record_sync(reachable: usize, unreachable: usize) {
    let Some(m) = NODE_METRICS.get() else {
        return;
    };

    m.sync_runs
        .with_label_values(&["true"])
        .inc_by(reachable as f64);
    if unreachable > 0 {
        m.sync_runs
            .with_label_values(&["false"])
            .inc_by(unreachable as f64);
    }
}

pub fn set_clock_offset(offset_micros: i64) {
    if let Some(m) = NODE_METRICS.get() {
        m.clock_offset.set(offset_micros as f64 / 1e6);
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Times a critical-section acquisition until dropped
pub fn start_cs_wait_timer() -> MetricsTimer {
    MetricsTimer {
        timer: NODE_METRICS.get().map(|m| m.cs_wait.start_timer()),
    }
}
