//! Prometheus metrics for CDN seeding and the scheduler client
//!
//! This module provides metrics tracking for:
//! - CDN seeding: seed streams, piece events, fan-out results, teardowns
//! - Scheduler client: retries and node migrations per method
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all CDN seeding metrics
struct SeedMetrics {
    streams: CounterVec,
    events: CounterVec,
    fanout: CounterVec,
    teardowns: CounterVec,
    in_flight: Gauge,
    seed_duration: HistogramVec,
}

/// Container for all scheduler client metrics
struct RpcMetrics {
    retries: CounterVec,
    migrations: CounterVec,
}

static SEED_METRICS: OnceLock<SeedMetrics> = OnceLock::new();

static RPC_METRICS: OnceLock<RpcMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; later calls are no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = seedsched::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let seed = SeedMetrics {
        streams: register_counter_vec!(
            "seedsched_seed_streams_total",
            "Seed streams by outcome (opened, failed)",
            &["outcome"]
        )?,
        events: register_counter_vec!(
            "seedsched_seed_events_total",
            "Piece seed events by outcome (processed, dropped)",
            &["outcome"]
        )?,
        fanout: register_counter_vec!(
            "seedsched_fanout_total",
            "First-seed notifications delivered, by result",
            &["result"]
        )?,
        teardowns: register_counter_vec!(
            "seedsched_task_teardowns_total",
            "Tasks removed after a seeding failure",
            &["reason"]
        )?,
        in_flight: register_gauge!(
            "seedsched_seed_in_flight",
            "Tasks with an open seed stream awaiting their first seed"
        )?,
        seed_duration: register_histogram_vec!(
            "seedsched_first_seed_duration_seconds",
            "Time from trigger to first-seed resolution",
            &["result"],
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
    };

    let rpc = RpcMetrics {
        retries: register_counter_vec!(
            "seedsched_rpc_retries_total",
            "Scheduler call retries by method",
            &["method"]
        )?,
        migrations: register_counter_vec!(
            "seedsched_rpc_migrations_total",
            "Scheduler node migrations by method",
            &["method"]
        )?,
    };

    SEED_METRICS
        .set(seed)
        .map_err(|_| "Seed metrics already initialized")?;
    RPC_METRICS
        .set(rpc)
        .map_err(|_| "RPC metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SEED_METRICS.get().is_some() && RPC_METRICS.get().is_some()
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

/// Record a seed stream being opened or failing to open
pub fn record_seed_stream(opened: bool) {
    if let Some(m) = SEED_METRICS.get() {
        let outcome = if opened { "opened" } else { "failed" };
        m.streams.with_label_values(&[outcome]).inc();
    }
}

/// Record one piece seed event
pub fn record_seed_event(processed: bool) {
    if let Some(m) = SEED_METRICS.get() {
        let outcome = if processed { "processed" } else { "dropped" };
        m.events.with_label_values(&[outcome]).inc();
    }
}

/// Record notifications delivered by a fan-out
pub fn record_fanout(success: bool, delivered: usize) {
    let Some(m) = SEED_METRICS.get() else {
        return;
    };

    let result = if success { "success" } else { "failure" };
    m.fanout
        .with_label_values(&[result])
        .inc_by(delivered as f64);
}

/// Record a task removed after seeding failed
pub fn record_teardown(reason: &str) {
    if let Some(m) = SEED_METRICS.get() {
        m.teardowns.with_label_values(&[reason]).inc();
    }
}

/// Update the number of tasks awaiting their first seed
pub fn update_in_flight(count: usize) {
    if let Some(m) = SEED_METRICS.get() {
        m.in_flight.set(count as f64);
    }
}

/// Record time to first-seed resolution
pub fn observe_first_seed(success: bool, duration_secs: f64) {
    if let Some(m) = SEED_METRICS.get() {
        let result = if success { "success" } else { "failure" };
        m.seed_duration
            .with_label_values(&[result])
            .observe(duration_secs);
    }
}

/// Record a scheduler call retry
pub fn record_rpc_retry(method: &str) {
    if let Some(m) = RPC_METRICS.get() {
        m.retries.with_label_values(&[method]).inc();
    }
}

/// Record a scheduler node migration
pub fn record_rpc_migration(method: &str) {
    if let Some(m) = RPC_METRICS.get() {
        m.migrations.with_label_values(&[method]).inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
