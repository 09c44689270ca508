//! Prometheus metrics for the proxy path.
//!
//! Tracks request volume, chaos injection activity, and end-to-end request
//! duration. Exposed at `GET /metrics` on the management surface.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Total number of requests handled on the proxy surface
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "havoc_requests_total",
        "Total number of requests handled on the proxy surface",
        &["method", "status"]
    )
    .unwrap();

    /// Total number of chaos effects applied
    pub static ref CHAOS_INJECTED_TOTAL: CounterVec = register_counter_vec!(
        "havoc_chaos_injected_total",
        "Total number of chaos effects applied, by type and rule",
        &["type", "rule_id"]
    )
    .unwrap();

    /// Injected latency in milliseconds
    pub static ref LATENCY_INJECTED_MS: HistogramVec = register_histogram_vec!(
        "havoc_latency_injected_ms",
        "Histogram of injected latency in milliseconds",
        &["rule_id"],
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap();

    /// Total request duration including chaos effects and forwarding
    pub static ref PROXY_REQUEST_DURATION_MS: HistogramVec = register_histogram_vec!(
        "havoc_proxy_request_duration_ms",
        "Total request duration including chaos effects and forwarding",
        &["method", "chaos_applied"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format.
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_request(method: &str, status: &str) {
    REQUESTS_TOTAL.with_label_values(&[method, status]).inc();
}

pub fn record_chaos(kind: &str, rule_id: &str) {
    CHAOS_INJECTED_TOTAL
        .with_label_values(&[kind, rule_id])
        .inc();
}

pub fn record_latency(rule_id: &str, duration_ms: u64) {
    LATENCY_INJECTED_MS
        .with_label_values(&[rule_id])
        .observe(duration_ms as f64);
}

pub fn record_duration(method: &str, chaos_applied: bool, duration_ms: f64) {
    let label = if chaos_applied { "true" } else { "false" };
    PROXY_REQUEST_DURATION_MS
        .with_label_values(&[method, label])
        .observe(duration_ms);
}
