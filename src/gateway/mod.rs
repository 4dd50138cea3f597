// ============================================================================
// Gateway Core
// ============================================================================
//
// Single entry point for all client requests: accept HTTP, encode the
// request into a bus envelope, send it through the downstream service's
// circuit breaker, decode the reply envelope back into the HTTP response.
//
// The gateway is stateless and scales horizontally; per-service breakers
// and the shared rate limiter are the only in-process state.
//
// ============================================================================

pub mod middleware;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use http::{HeaderValue, StatusCode};
use portico_config::Config;
use portico_error::{AppError, AppResult};
use portico_redis::RedisClient;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::breaker::BreakerRegistry;
use crate::bus::BusClient;
use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::rate_limit::{RateLimiter, RedisCounterStore};
use crate::telemetry;

use middleware::{AuthenticatedUser, GatewayMiddlewareState};

/// State behind the dispatch handler: the bus connection and the
/// per-service breaker registry. The middleware chain has its own
/// narrower state.
pub struct GatewayContext {
    pub config: Arc<Config>,
    pub bus: BusClient,
    pub breakers: BreakerRegistry<ResponseEnvelope>,
}

pub struct Gateway {
    context: Arc<GatewayContext>,
    middleware_state: Arc<GatewayMiddlewareState>,
    shutdown_tx: watch::Sender<bool>,
}

impl Gateway {
    /// Resolve external collaborators (bus, counter store) and assemble
    /// the gateway.
    pub async fn connect(config: Config) -> AppResult<Self> {
        let bus = BusClient::connect(&config.bus).await?;
        let redis = RedisClient::connect(&config.redis.url).await?;
        tracing::info!(url = %config.redis.url, "connected to counter store");

        let rate_limiter =
            RateLimiter::new(Box::new(RedisCounterStore::new(redis)), &config.rate_limit);

        Ok(Self::new(Arc::new(config), bus, rate_limiter))
    }

    /// Assemble a gateway from already-connected collaborators (tests
    /// inject an in-memory counter store here).
    pub fn new(config: Arc<Config>, bus: BusClient, rate_limiter: RateLimiter) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            context: Arc::new(GatewayContext {
                config: config.clone(),
                bus,
                breakers: BreakerRegistry::new(),
            }),
            middleware_state: Arc::new(GatewayMiddlewareState {
                config,
                rate_limiter,
            }),
            shutdown_tx,
        }
    }

    pub fn context(&self) -> Arc<GatewayContext> {
        self.context.clone()
    }

    /// The full route table with middleware chains applied
    pub fn router(&self) -> Router {
        build_router(self.context.clone(), self.middleware_state.clone())
    }

    /// Bind and serve until [`Gateway::stop`] is called or the listener
    /// fails. After the listener drains, the bus connection is drained so
    /// in-flight replies complete.
    pub async fn start(&self) -> AppResult<()> {
        let gateway = &self.context.config.gateway;
        let addr = format!("{}:{}", gateway.bind_address, gateway.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "API gateway listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stopped| *stopped).await;
        })
        .await
        .map_err(|e| AppError::internal(format!("gateway listener failed: {e}")))?;

        tracing::info!("listener drained, draining bus connection");
        self.context.bus.drain().await
    }

    /// Signal shutdown: the HTTP server refuses new connections and
    /// drains, then the bus connection is drained. Safe to call more than
    /// once.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn build_router(ctx: Arc<GatewayContext>, mw: Arc<GatewayMiddlewareState>) -> Router {
    // Everything not matched below is dispatched over the bus, behind the
    // full protected chain.
    let protected = Router::new()
        .fallback(any(dispatch))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn_with_state(mw.clone(), middleware::cors))
                .layer(from_fn(middleware::content_type))
                .layer(from_fn_with_state(mw.clone(), middleware::rate_limit))
                .layer(from_fn(middleware::track_metrics))
                .layer(from_fn_with_state(mw.clone(), middleware::auth)),
        )
        .with_state(ctx.clone());

    let health = Router::new()
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(mw.clone(), middleware::cors))
                .layer(from_fn(middleware::content_type))
                .layer(from_fn(middleware::track_metrics)),
        )
        .with_state(ctx);

    let metrics = Router::new().route("/metrics", get(metrics_endpoint));

    health.merge(metrics).merge(protected)
}

pub async fn health_check() -> Response {
    (StatusCode::OK, Json(json!({ "status": "healthy" }))).into_response()
}

/// Prometheus text exposition of everything the process registered
pub async fn metrics_endpoint() -> Response {
    match portico_metrics::gather_metrics() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(body.into())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => {
            tracing::error!(error = %e, "failed to gather metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Entry point for every proxied request
async fn dispatch(State(ctx): State<Arc<GatewayContext>>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let timeout = Duration::from_secs(ctx.config.gateway.request_timeout_secs);

    // continue the caller's trace if the request carries one
    let parent = telemetry::extract_http_context(request.headers());
    let span_name = format!("outbound request: {path}");
    let span = tracing::info_span!(
        "outbound request",
        otel.name = %span_name,
        http.method = %request.method(),
        http.route = %path,
    );
    span.set_parent(parent);

    async move {
        match forward(&ctx, request, timeout).await {
            Ok(mut response) => {
                if path.contains("Logout") {
                    clear_session_cookie(&mut response, &ctx.config.gateway.cookie_name);
                }
                response
            }
            Err(e) => {
                tracing::error!(error = %e, path = %path, "fail to dispatch request");
                error_response(e)
            }
        }
    }
    .instrument(span)
    .await
}

async fn forward(
    ctx: &Arc<GatewayContext>,
    request: Request,
    timeout: Duration,
) -> AppResult<Response> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| AppError::internal(format!("fail to read request body: {e}")))?;

    let mut envelope = RequestEnvelope::from_http(&parts, &body, &ctx.config.codec)?;

    // trust-boundary headers for the downstream service
    if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
        envelope.add_header("X-User-Id", &user.0);
    }
    envelope.add_header("X-Request-Id", &uuid::Uuid::new_v4().to_string());
    telemetry::inject_current_context(&mut envelope.header);

    let payload = serde_json::to_vec(&envelope)?;

    let breaker = ctx.breakers.get_or_create(
        &envelope.service_name,
        ctx.config.breaker_for(&envelope.service_name),
    );

    // Bus timeouts, no-responders and malformed replies count against the
    // breaker. A well-formed reply is a success regardless of its status
    // code; the handler chose that status and it forwards verbatim.
    let bus = ctx.bus.clone();
    let subject = envelope.subject.clone();
    let reply = breaker
        .call(|| async move {
            let message = bus.request(&subject, payload, timeout).await?;
            serde_json::from_slice::<ResponseEnvelope>(&message.payload)
                .map_err(|e| AppError::internal(format!("malformed service reply: {e}")))
        })
        .await?;

    reply.into_http_response()
}

/// Unrecognized path shapes are the caller's fault; everything else is an
/// upstream or internal failure surfaced as 500 with the message.
fn error_response(e: AppError) -> Response {
    let status = match &e {
        AppError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

fn clear_session_cookie(response: &mut Response, cookie_name: &str) {
    let cookie = format!("{cookie_name}=; Path=/; Max-Age=0; Secure; HttpOnly; SameSite=None");
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response
            .headers_mut()
            .append(http::header::SET_COOKIE, value);
    }
}
