use crate::env_string;

/// Counter store (Redis) configuration
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Redis URL (default: redis://127.0.0.1:6379)
    pub url: String,
}

impl RedisConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            url: env_string("REDIS_URL", "redis://127.0.0.1:6379"),
        }
    }
}
