// ============================================================================
// Telemetry - structured logs, OTLP traces, context propagation
// ============================================================================
//
// Log output always flows through tracing-subscriber (EnvFilter + fmt).
// When an OTLP endpoint is configured, spans are additionally exported via
// the OpenTelemetry OTLP pipeline and W3C trace context travels inside the
// bus envelope headers, so a gateway span and the service span it triggered
// share one trace.
//
// ============================================================================

use std::collections::HashMap;

use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace as sdktrace;
use opentelemetry_sdk::Resource;
use opentelemetry_otlp::WithExportConfig;
use portico_config::TelemetryConfig;
use portico_error::{AppError, AppResult};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Handle returned by [`init`]; shut it down during process exit so
/// buffered spans flush.
pub struct Telemetry {
    otlp_enabled: bool,
}

impl Telemetry {
    /// Flush exporters. Called after the listener/subscription has drained.
    pub fn shutdown(&self) {
        if self.otlp_enabled {
            global::shutdown_tracer_provider();
        }
    }
}

/// Install the global subscriber and propagator. Must be called once per
/// process, before any spans are created.
pub fn init(config: &TelemetryConfig, rust_log: &str) -> AppResult<Telemetry> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let filter = EnvFilter::new(rust_log);

    match &config.otlp_endpoint {
        Some(endpoint) => {
            let tracer_provider = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint.clone()),
                )
                .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(
                    vec![KeyValue::new("service.name", config.service_name.clone())],
                )))
                .install_batch(opentelemetry_sdk::runtime::Tokio)
                .map_err(|e| AppError::config(format!("fail to install OTLP pipeline: {e}")))?;

            global::set_tracer_provider(tracer_provider.clone());
            let tracer = tracer_provider.tracer(config.service_name.clone());

            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .init();

            tracing::info!(endpoint = %endpoint, service = %config.service_name, "OTLP trace export enabled");
            Ok(Telemetry { otlp_enabled: true })
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();

            Ok(Telemetry {
                otlp_enabled: false,
            })
        }
    }
}

struct HeaderInjector<'a>(&'a mut HashMap<String, Vec<String>>);

impl opentelemetry::propagation::Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), vec![value]);
    }
}

struct HeaderExtractor<'a>(&'a HashMap<String, Vec<String>>);

impl opentelemetry::propagation::Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// Inject the current span's context into envelope headers before the
/// envelope goes over the bus.
pub fn inject_current_context(headers: &mut HashMap<String, Vec<String>>) {
    let context = tracing::Span::current().context();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&context, &mut HeaderInjector(headers))
    });
}

/// Extract the upstream trace context from envelope headers on the service
/// side. Attach it with `Span::set_parent`.
pub fn extract_context(headers: &HashMap<String, Vec<String>>) -> opentelemetry::Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

struct HttpHeaderExtractor<'a>(&'a http::HeaderMap);

impl opentelemetry::propagation::Extractor for HttpHeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Extract the caller's trace context from a real HTTP request's headers
/// at the gateway's ingress edge.
pub fn extract_http_context(headers: &http::HeaderMap) -> opentelemetry::Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HttpHeaderExtractor(headers)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extractor_reads_first_value() {
        let mut headers = HashMap::new();
        headers.insert(
            "traceparent".to_string(),
            vec!["00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string()],
        );

        let extractor = HeaderExtractor(&headers);
        use opentelemetry::propagation::Extractor;
        assert_eq!(
            extractor.get("traceparent"),
            Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")
        );
        assert!(extractor.get("tracestate").is_none());
    }

    #[test]
    fn test_http_extractor_reads_header_map() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            "traceparent",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
                .parse()
                .unwrap(),
        );

        let extractor = HttpHeaderExtractor(&headers);
        use opentelemetry::propagation::Extractor;
        assert_eq!(
            extractor.get("traceparent"),
            Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")
        );
        assert!(extractor.keys().contains(&"traceparent"));
    }

    #[test]
    fn test_injector_overwrites_existing_entry() {
        let mut headers = HashMap::new();
        headers.insert("traceparent".to_string(), vec!["stale".to_string()]);

        use opentelemetry::propagation::Injector;
        HeaderInjector(&mut headers).set("traceparent", "fresh".to_string());
        assert_eq!(headers["traceparent"], vec!["fresh".to_string()]);
    }
}
