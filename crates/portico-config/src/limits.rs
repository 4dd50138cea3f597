use crate::{env_or, env_string};

/// Distributed rate limiter configuration
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Requests allowed per window (default: 50)
    pub limit: i64,
    /// Window length in seconds (default: 60)
    pub window_secs: u64,
    /// Allow traffic through when the counter store is unreachable.
    /// The default is fail-closed; this knob must be set explicitly.
    pub fail_open: bool,
}

impl RateLimitConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            limit: env_or("RATE_LIMIT_LIMIT", 50),
            window_secs: env_or("RATE_LIMIT_WINDOW_SECS", 60),
            fail_open: env_string("RATE_LIMIT_FAIL_OPEN", "false").to_lowercase() == "true",
        }
    }
}
