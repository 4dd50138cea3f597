//! Prometheus metrics for Portico
//!
//! Centralized metrics collection for:
//! - Gateway HTTP traffic (count, latency, sizes)
//! - Circuit breaker states

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    exponential_buckets, histogram_opts, opts, register_gauge_vec, register_histogram_vec,
    register_int_counter_vec, Encoder, GaugeVec, HistogramVec, IntCounterVec, TextEncoder,
};

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Total number of HTTP requests
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("http_request_total", "Total number of HTTP requests"),
        &["path", "method", "code"]
    )
    .expect("Failed to register HTTP_REQUESTS_TOTAL metric")
});

/// Latencies for HTTP requests
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "http_request_duration_seconds",
        "Tracks the latencies for HTTP requests",
        &["path", "method", "code"]
    )
    .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS metric")
});

/// Size of HTTP requests
pub static HTTP_REQUEST_SIZE_BYTES: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "http_request_size_bytes",
            "Size of HTTP requests",
            exponential_buckets(64.0, 4.0, 8).expect("bucket layout")
        ),
        &["path", "method", "code"]
    )
    .expect("Failed to register HTTP_REQUEST_SIZE_BYTES metric")
});

/// Size of HTTP responses
pub static HTTP_RESPONSE_SIZE_BYTES: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "http_response_size_bytes",
            "Size of HTTP responses",
            exponential_buckets(64.0, 4.0, 8).expect("bucket layout")
        ),
        &["path", "method", "code"]
    )
    .expect("Failed to register HTTP_RESPONSE_SIZE_BYTES metric")
});

// ============================================================================
// Circuit Breaker Metrics
// ============================================================================

/// Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)
pub static CIRCUIT_BREAKER_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        opts!(
            "gateway_circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)"
        ),
        &["service"]
    )
    .expect("Failed to register CIRCUIT_BREAKER_STATE metric")
});

// ============================================================================
// Metrics Collection
// ============================================================================

/// Gather all registered metrics and encode as Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
