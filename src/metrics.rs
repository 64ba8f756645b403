/// Metrics Module - Prometheus Instrumentation
///
/// Compact catalog for the indexer pipeline: progress, operation outcomes,
/// reorgs, and commit latency. Registered against a crate-local registry;
/// `gather_text` renders the standard text exposition for logging or for a
/// dump tool. No exporter endpoint lives here.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Standard latency buckets for histograms (seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0];

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Blocks committed to the store
    pub static ref BLOCKS_COMMITTED: IntCounter = IntCounter::new(
        "tokenblox_blocks_committed_total",
        "Blocks committed to the store"
    ).unwrap();

    /// Valid operations by op tag
    pub static ref OPERATIONS_VALID: IntCounterVec = IntCounterVec::new(
        Opts::new("tokenblox_operations_valid_total", "Valid operations by op tag"),
        &["op"]
    ).unwrap();

    /// Invalid operations by error code
    pub static ref OPERATIONS_INVALID: IntCounterVec = IntCounterVec::new(
        Opts::new("tokenblox_operations_invalid_total", "Invalid operations by error code"),
        &["code"]
    ).unwrap();

    /// Reorgs handled
    pub static ref REORGS_HANDLED: IntCounter = IntCounter::new(
        "tokenblox_reorgs_handled_total",
        "Chain reorganizations handled"
    ).unwrap();

    /// Blocks rolled back during reorgs
    pub static ref BLOCKS_ROLLED_BACK: IntCounter = IntCounter::new(
        "tokenblox_blocks_rolled_back_total",
        "Blocks rolled back during reorgs"
    ).unwrap();

    /// Transient failures that triggered a block retry
    pub static ref TRANSIENT_RETRIES: IntCounterVec = IntCounterVec::new(
        Opts::new("tokenblox_transient_retries_total", "Block retries by error code"),
        &["code"]
    ).unwrap();

    /// Indexed tip height
    pub static ref INDEXED_TIP_HEIGHT: IntGauge = IntGauge::new(
        "tokenblox_indexed_tip_height",
        "Height of the last committed block"
    ).unwrap();

    /// Node tip height as last reported
    pub static ref NODE_TIP_HEIGHT: IntGauge = IntGauge::new(
        "tokenblox_node_tip_height",
        "Chain tip height reported by the node"
    ).unwrap();

    /// Commit latency
    pub static ref COMMIT_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new("tokenblox_commit_seconds", "Block commit latency")
            .buckets(LATENCY_BUCKETS.to_vec())
    ).unwrap();
}

/// Register all metrics. Call once at startup; re-registration errors are
/// reported, not fatal.
pub fn register_all() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(BLOCKS_COMMITTED.clone()),
        Box::new(OPERATIONS_VALID.clone()),
        Box::new(OPERATIONS_INVALID.clone()),
        Box::new(REORGS_HANDLED.clone()),
        Box::new(BLOCKS_ROLLED_BACK.clone()),
        Box::new(TRANSIENT_RETRIES.clone()),
        Box::new(INDEXED_TIP_HEIGHT.clone()),
        Box::new(NODE_TIP_HEIGHT.clone()),
        Box::new(COMMIT_LATENCY.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            tracing::warn!(error = %e, "metric registration failed");
        }
    }
}

/// Text exposition of the whole registry.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "metric encoding failed");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
