/// Prometheus metrics for auth_stack processing
#[cfg(feature = "metrics")]
use prometheus::{register_histogram, register_int_counter_vec, Histogram, IntCounterVec};

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;

#[cfg(feature = "metrics")]
static WALKS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "auth_stack_walks_total",
        "Total number of auth_stack chain walks by terminal state",
        &["outcome"]
    )
    .expect("Failed to register auth_stack walks metric")
});

#[cfg(feature = "metrics")]
static CHAIN_DEPTH: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "auth_stack_chain_depth",
        "Nested layers processed per walk",
        vec![0.0, 1.0, 2.0, 3.0, 4.0, 6.0, 8.0, 12.0, 16.0]
    )
    .expect("Failed to register auth_stack chain depth metric")
});

#[cfg(feature = "metrics")]
static VERDICTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "auth_stack_verdicts_total",
        "Total number of auth_stack policy verdicts",
        &["verdict"]
    )
    .expect("Failed to register auth_stack verdicts metric")
});

/// Metrics collector for chain walks
#[cfg(feature = "metrics")]
pub struct WalkMetrics;

#[cfg(feature = "metrics")]
impl WalkMetrics {
    pub fn record_walk(outcome: &str, nodes_processed: usize) {
        WALKS.with_label_values(&[outcome]).inc();
        CHAIN_DEPTH.observe(nodes_processed as f64);
    }
}

/// Metrics collector for policy verdicts
#[cfg(feature = "metrics")]
pub struct VerdictMetrics;

#[cfg(feature = "metrics")]
impl VerdictMetrics {
    pub fn record(verdict: &str) {
        VERDICTS.with_label_values(&[verdict]).inc();
    }
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub struct WalkMetrics;

#[cfg(not(feature = "metrics"))]
impl WalkMetrics {
    pub fn record_walk(_outcome: &str, _nodes_processed: usize) {}
}

#[cfg(not(feature = "metrics"))]
pub struct VerdictMetrics;

#[cfg(not(feature = "metrics"))]
impl VerdictMetrics {
    pub fn record(_verdict: &str) {}
}
