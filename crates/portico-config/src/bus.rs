use crate::env_string;

/// Message bus (NATS) connection configuration
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Bus URL (default: nats://localhost:4222)
    pub url: String,
    /// Optional credentials
    pub username: Option<String>,
    pub password: Option<String>,
}

impl BusConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            url: env_string("BUS_URL", "nats://localhost:4222"),
            username: std::env::var("BUS_USERNAME").ok(),
            password: std::env::var("BUS_PASSWORD").ok(),
        }
    }
}
