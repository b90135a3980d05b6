//! Prometheus Metrics Module
//!
//! Exposes ingestion metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Upserts**: per-table success and failure counts
//! - **Drops**: rows discarded before reaching the store, by reason
//! - **Cycles**: outcomes and durations
//! - **Process**: forced restarts and the market gate state
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::category::Category;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "quote_ingestor_upserts_total",
        "Upsert requests by destination table and outcome"
    );
    describe_counter!(
        "quote_ingestor_records_dropped_total",
        "Rows discarded before reaching the store"
    );
    describe_counter!(
        "quote_ingestor_cycles_total",
        "Ingestion cycles by outcome"
    );
    describe_histogram!(
        "quote_ingestor_cycle_duration_seconds",
        "Wall time of successful ingestion cycles"
    );
    describe_counter!(
        "quote_ingestor_restarts_total",
        "Forced process restarts after the uptime budget"
    );
    describe_gauge!(
        "quote_ingestor_market_open",
        "1 while the market-hours gate is open"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Upsert outcome label.
#[derive(Debug, Clone, Copy)]
pub enum UpsertOutcome {
    /// Store answered 2xx.
    Success,
    /// Anything else.
    Failure,
}

impl UpsertOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Why a row never reached the store.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// No category matched.
    Unclassified,
    /// Removed by kind rules.
    Filtered,
    /// Failed normalization.
    Malformed,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Unclassified => "unclassified",
            Self::Filtered => "filtered",
            Self::Malformed => "malformed",
        }
    }
}

/// Record one upsert attempt.
pub fn record_upsert(category: Category, outcome: UpsertOutcome) {
    counter!(
        "quote_ingestor_upserts_total",
        "table" => category.table(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a dropped row.
pub fn record_dropped(reason: DropReason) {
    counter!(
        "quote_ingestor_records_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a successful cycle.
pub fn record_cycle_success(duration: Duration) {
    counter!("quote_ingestor_cycles_total", "outcome" => "success").increment(1);
    histogram!("quote_ingestor_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Record a failed cycle.
pub fn record_cycle_failure() {
    counter!("quote_ingestor_cycles_total", "outcome" => "failure").increment(1);
}

/// Record a forced restart.
pub fn record_restart() {
    counter!("quote_ingestor_restarts_total").increment(1);
}

/// Publish the gate state.
pub fn set_market_open(open: bool) {
    gauge!("quote_ingestor_market_open").set(if open { 1.0 } else { 0.0 });
}

// =============================================================================
// Tests
// =============================================================================
