use crate::env_string;

/// Tracing and OTLP export configuration
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Service name attached to exported spans
    pub service_name: String,
    /// OTLP gRPC endpoint. When unset the OTLP layer is skipped and only
    /// local log output is produced.
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            service_name: env_string("TELEMETRY_SERVICE_NAME", "portico-gateway"),
            otlp_endpoint: std::env::var("TELEMETRY_OTLP_ENDPOINT").ok(),
        }
    }

    /// Same configuration with a different service name; used by service
    /// runtime binaries that share the gateway's env surface.
    pub fn for_service(&self, service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            otlp_endpoint: self.otlp_endpoint.clone(),
        }
    }
}
