// ============================================================================
// Gateway Middleware
// ============================================================================
//
// Cross-cutting concerns composed in front of the dispatch handler, in
// order: CORS -> content type -> rate limit -> metrics -> auth. Each
// middleware is a handler wrapper; the first in the chain runs first on
// entry and last on exit. Tracing is a transport-level layer, not part of
// this chain.
//
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use portico_config::Config;
use serde_json::json;

use crate::rate_limit::RateLimiter;

/// Paths exempt from authentication
pub const AUTH_SKIP_PATHS: &[&str] = &["/api/v1/auth/Login", "/api/v1/auth/Callback", "/callback"];

/// State the middleware chain needs; deliberately narrower than the
/// dispatch state so the chain can be exercised without a bus connection.
pub struct GatewayMiddlewareState {
    pub config: Arc<Config>,
    pub rate_limiter: RateLimiter,
}

/// Session identity established by the auth middleware, picked up by the
/// dispatch handler to stamp `X-User-Id` onto the envelope.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

/// CORS headers on every response; OPTIONS preflight short-circuits with
/// 200 and never reaches the inner handler.
pub async fn cors(
    State(state): State<Arc<GatewayMiddlewareState>>,
    request: Request,
    next: Next,
) -> Response {
    let preflight = request.method() == Method::OPTIONS;
    let mut response = if preflight {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    if let Ok(origin) = HeaderValue::from_str(&state.config.gateway.frontend_origin) {
        headers.insert("access-control-allow-origin", origin);
    }
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        "access-control-allow-credentials",
        HeaderValue::from_static("true"),
    );
    response
}

/// Default every response to JSON unless the inner handler said otherwise
pub async fn content_type(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .entry(http::header::CONTENT_TYPE)
        .or_insert(HeaderValue::from_static("application/json"));
    response
}

/// Rate limit keyed by `<remote-addr><path>`. Denials and counter-store
/// failures produce 429 (fail-closed unless configured otherwise); allowed
/// requests carry `X-Request-Remaining`.
pub async fn rate_limit(
    State(state): State<Arc<GatewayMiddlewareState>>,
    request: Request,
    next: Next,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let key = format!("{}{}", remote_addr, request.uri().path());

    let decision = match state.rate_limiter.is_allowed(&key).await {
        Ok(decision) => decision,
        Err(e) => {
            if state.config.rate_limit.fail_open {
                tracing::warn!(error = %e, "counter store unreachable, rate limiter failing open");
                return next.run(request).await;
            }
            tracing::error!(error = %e, "counter store unreachable, rejecting request");
            return too_many_requests(&e.to_string());
        }
    };

    if !decision.allowed {
        tracing::warn!(key = %key, "rate limit exceeded");
        return too_many_requests("rate limit exceeded");
    }

    let mut response = next.run(request).await;
    if let Ok(remaining) = HeaderValue::from_str(&decision.remaining.to_string()) {
        response.headers_mut().insert("x-request-remaining", remaining);
    }
    response
}

fn too_many_requests(message: &str) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": message })),
    )
        .into_response()
}

/// Session-cookie authentication. Skip-set paths pass through untouched;
/// everything else needs a non-empty session cookie.
pub async fn auth(
    State(state): State<Arc<GatewayMiddlewareState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if AUTH_SKIP_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    match session_cookie(request.headers(), &state.config.gateway.cookie_name) {
        Some(session) if !session.is_empty() => {
            request.extensions_mut().insert(AuthenticatedUser(session));
            next.run(request).await
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Not found cookie" })),
        )
            .into_response(),
    }
}

fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Per-path request counter, latency histogram and size observations,
/// labeled by (path, method, status).
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().to_string();
    let request_size = approx_request_size(&request);
    let start = Instant::now();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let code = response.status().as_u16().to_string();
    let labels = [path.as_str(), method.as_str(), code.as_str()];

    portico_metrics::HTTP_REQUESTS_TOTAL
        .with_label_values(&labels)
        .inc();
    portico_metrics::HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&labels)
        .observe(elapsed.as_secs_f64());
    portico_metrics::HTTP_REQUEST_SIZE_BYTES
        .with_label_values(&labels)
        .observe(request_size as f64);

    let response_size = http_body::Body::size_hint(response.body())
        .exact()
        .unwrap_or(0);
    portico_metrics::HTTP_RESPONSE_SIZE_BYTES
        .with_label_values(&labels)
        .observe(response_size as f64);

    tracing::info!(
        method = %method,
        path = %path,
        code = %code,
        elapsed_ms = elapsed.as_millis() as u64,
        "request completed"
    );
    response
}

fn approx_request_size(request: &Request) -> u64 {
    let mut size = request.method().as_str().len() as u64 + request.uri().to_string().len() as u64;
    for (name, value) in request.headers() {
        size += name.as_str().len() as u64 + value.len() as u64;
    }
    size + http_body::Body::size_hint(request.body())
        .exact()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::COOKIE,
            HeaderValue::from_static("a=1; portico_session=abc123; b=2"),
        );

        assert_eq!(
            session_cookie(&headers, "portico_session"),
            Some("abc123".to_string())
        );
        assert_eq!(session_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_session_cookie_empty_value() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(session_cookie(&headers, "session"), Some(String::new()));
    }

    #[test]
    fn test_skip_paths_cover_auth_endpoints() {
        assert!(AUTH_SKIP_PATHS.contains(&"/api/v1/auth/Login"));
        assert!(AUTH_SKIP_PATHS.contains(&"/api/v1/auth/Callback"));
        assert!(AUTH_SKIP_PATHS.contains(&"/callback"));
        assert!(!AUTH_SKIP_PATHS.contains(&"/api/v1/order/GetOrderById"));
    }
}
