use crate::env_or;

/// Circuit breaker configuration for downstream services
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Probe calls allowed through a half-open breaker (default: 5)
    pub max_requests: u32,
    /// Rolling window length in the closed state, seconds (default: 60)
    pub interval_secs: u64,
    /// Time an open breaker waits before going half-open, seconds (default: 60)
    pub timeout_secs: u64,
    /// Consecutive failures that must be exceeded to trip (default: 5)
    pub failure_threshold: u32,
    /// Failure rate that trips the breaker once enough requests are seen
    /// (default: 0.6)
    pub failure_rate_threshold: f64,
    /// Requests required in the window before the rate threshold applies
    /// (default: 10)
    pub min_requests: u32,
}

impl CircuitBreakerConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            max_requests: env_or("BREAKER_MAX_REQUESTS", 5),
            interval_secs: env_or("BREAKER_INTERVAL_SECS", 60),
            timeout_secs: env_or("BREAKER_TIMEOUT_SECS", 60),
            failure_threshold: env_or("BREAKER_FAILURE_THRESHOLD", 5),
            failure_rate_threshold: env_or("BREAKER_FAILURE_RATE_THRESHOLD", 0.6),
            min_requests: env_or("BREAKER_MIN_REQUESTS", 10),
        }
    }

    /// Per-service configuration: `BREAKER_<SERVICE>_*` overrides win over
    /// the shared values in `fallback`.
    pub(crate) fn from_env_for(service: &str, fallback: &Self) -> Self {
        let prefix = format!("BREAKER_{}", service.to_uppercase().replace('-', "_"));
        Self {
            max_requests: env_or(&format!("{prefix}_MAX_REQUESTS"), fallback.max_requests),
            interval_secs: env_or(&format!("{prefix}_INTERVAL_SECS"), fallback.interval_secs),
            timeout_secs: env_or(&format!("{prefix}_TIMEOUT_SECS"), fallback.timeout_secs),
            failure_threshold: env_or(
                &format!("{prefix}_FAILURE_THRESHOLD"),
                fallback.failure_threshold,
            ),
            failure_rate_threshold: env_or(
                &format!("{prefix}_FAILURE_RATE_THRESHOLD"),
                fallback.failure_rate_threshold,
            ),
            min_requests: env_or(&format!("{prefix}_MIN_REQUESTS"), fallback.min_requests),
        }
    }
}
