// ============================================================================
// Portico - ingress gateway and service runtime
// ============================================================================
//
// The gateway terminates external HTTP, translates each request into a
// bus RPC keyed by path, and translates the reply back into an HTTP
// response. Cross-cutting concerns (CORS, content type, rate limiting,
// auth, metrics, tracing) run as a middleware chain in front of the
// dispatch handler; downstream services are guarded by per-service
// circuit breakers.
//
// The service runtime is the mirror image: a queue subscription decodes
// bus messages back into HTTP requests and dispatches them to typed
// handlers through an internal router.
//
// ============================================================================

pub mod breaker;
pub mod bus;
pub mod envelope;
pub mod gateway;
pub mod rate_limit;
pub mod service;
pub mod telemetry;

pub use portico_error::{AppError, AppResult};
