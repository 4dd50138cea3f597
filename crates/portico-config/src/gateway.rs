use crate::{env_or, env_string};

/// Gateway HTTP front configuration
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Listen port (default: 8080)
    pub port: u16,
    /// Bind address (default: 0.0.0.0)
    pub bind_address: String,
    /// Frontend origin allowed by CORS (default: http://localhost:3000)
    pub frontend_origin: String,
    /// Name of the session cookie checked by the auth middleware
    pub cookie_name: String,
    /// Per-request timeout in seconds for the bus round-trip (default: 30)
    pub request_timeout_secs: u64,
}

impl GatewayConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            port: env_or("GATEWAY_PORT", 8080),
            bind_address: env_string("GATEWAY_BIND_ADDRESS", "0.0.0.0"),
            frontend_origin: env_string("GATEWAY_FRONTEND_ORIGIN", "http://localhost:3000"),
            cookie_name: env_string("GATEWAY_COOKIE_NAME", "portico_session"),
            request_timeout_secs: env_or("GATEWAY_REQUEST_TIMEOUT_SECS", 30),
        }
    }
}

/// Wire codec behaviour knobs
#[derive(Clone, Debug)]
pub struct CodecConfig {
    /// Host prefix stamped onto envelope URLs for rewritten GET requests
    pub backend_endpoint: String,
    /// Compatibility flag: title-case query parameter keys when a GET is
    /// rewritten into a POST body. Off by default; the original key casing
    /// is preserved.
    pub title_case_query: bool,
}

impl CodecConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            backend_endpoint: env_string("GATEWAY_BACKEND_ENDPOINT", "http://localhost:8080"),
            title_case_query: env_string("CODEC_TITLE_CASE_QUERY", "false").to_lowercase() == "true",
        }
    }
}
