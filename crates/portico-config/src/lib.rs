// ============================================================================
// Portico Config - Centralized configuration management
// ============================================================================
//
// This crate provides centralized configuration for the gateway and the
// service runtime. Every value is read from environment variables with a
// documented default; dotted config keys map to UPPER_SNAKE env names
// (`gateway.port` -> `GATEWAY_PORT`).
//
// ============================================================================

mod breaker;
mod bus;
mod gateway;
mod limits;
mod redis;
mod telemetry;

pub use breaker::CircuitBreakerConfig;
pub use bus::BusConfig;
pub use gateway::{CodecConfig, GatewayConfig};
pub use limits::RateLimitConfig;
pub use redis::RedisConfig;
pub use telemetry::TelemetryConfig;

use anyhow::Result;

/// Main configuration structure for Portico processes
#[derive(Clone, Debug)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub codec: CodecConfig,
    pub rate_limit: RateLimitConfig,
    pub breaker: CircuitBreakerConfig,
    pub bus: BusConfig,
    pub redis: RedisConfig,
    pub telemetry: TelemetryConfig,
    pub rust_log: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            gateway: GatewayConfig::from_env(),
            codec: CodecConfig::from_env(),
            rate_limit: RateLimitConfig::from_env(),
            breaker: CircuitBreakerConfig::from_env(),
            bus: BusConfig::from_env(),
            redis: RedisConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Circuit breaker configuration for a downstream service.
    ///
    /// Per-service overrides use a `BREAKER_<SERVICE>_` prefix
    /// (e.g. `BREAKER_ORDER_FAILURE_THRESHOLD`) and fall back to the
    /// shared `BREAKER_*` values.
    pub fn breaker_for(&self, service: &str) -> CircuitBreakerConfig {
        CircuitBreakerConfig::from_env_for(service, &self.breaker)
    }
}

/// Read an env var and parse it, falling back to `default`
pub(crate) fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
