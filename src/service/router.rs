use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use axum::routing::on;
use axum::{Json, Router};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use portico_error::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tower::ServiceExt;

use crate::envelope::{RequestEnvelope, ResponseEnvelope};

/// Request-scoped values handed to every handler: the caller's identity
/// propagated by the gateway plus the synthesized HTTP request itself.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub user_id: Option<String>,
    pub request_id: Option<String>,
}

impl RequestContext {
    fn from_parts(parts: &http::request::Parts) -> Self {
        let header_string = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            user_id: header_string("x-user-id"),
            request_id: header_string("x-request-id"),
        }
    }
}

/// Response builder for handlers that need to override the default 200
/// status or attach headers.
#[derive(Debug, Clone)]
pub struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Reply {
    pub fn ok() -> Self {
        Self::with_status(StatusCode::OK)
    }

    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: http::header::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut response = Response::builder().status(self.status);
        if let Some(headers) = response.headers_mut() {
            headers.extend(self.headers);
        }
        response
            .body(axum::body::Body::from(self.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

/// Encode a handler's return value for the envelope body: strings pass
/// verbatim, scalars are stringified, structured values are JSON-encoded.
pub fn encode_value<T: Serialize>(value: &T) -> AppResult<Vec<u8>> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s.into_bytes()),
        v @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_)) => {
            Ok(v.to_string().into_bytes())
        }
        serde_json::Value::Null => Ok(Vec::new()),
        v => Ok(serde_json::to_vec(&v)?),
    }
}

/// Internal HTTP-style router mapping (method, path) to typed handlers.
///
/// Populated at startup before the subscriber is activated; read-only
/// afterwards.
#[derive(Clone, Default)]
pub struct ServiceRouter {
    inner: Router,
}

impl ServiceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler: the request body is decoded into `Req`,
    /// the return value encoded by shape, status fixed at 200. Handler
    /// errors become status 500 with body `{"error": "<message>"}`.
    pub fn route<Req, Res, H, Fut>(mut self, method: Method, path: &str, handler: H) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        H: Fn(RequestContext, Req) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = AppResult<Res>> + Send + 'static,
    {
        let wrapped = move |request: Request| {
            let handler = handler.clone();
            async move {
                match run_typed(handler, request).await {
                    Ok(reply) => reply.into_response(),
                    Err(e) => handler_error_response(&e),
                }
            }
        };
        self.inner = self.inner.route(path, on(filter_for(&method), wrapped));
        self
    }

    /// Register a raw handler that receives the body bytes untouched and
    /// builds its own [`Reply`] (status and header overrides).
    pub fn route_raw<H, Fut>(mut self, method: Method, path: &str, handler: H) -> Self
    where
        H: Fn(RequestContext, Bytes) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = AppResult<Reply>> + Send + 'static,
    {
        let wrapped = move |request: Request| {
            let handler = handler.clone();
            async move {
                match run_raw(handler, request).await {
                    Ok(reply) => reply.into_response(),
                    Err(e) => handler_error_response(&e),
                }
            }
        };
        self.inner = self.inner.route(path, on(filter_for(&method), wrapped));
        self
    }

    /// Decode the envelope, route it, and re-encode the outcome. This is
    /// the whole service-side request path minus the bus itself.
    pub async fn dispatch(&self, envelope: RequestEnvelope) -> AppResult<ResponseEnvelope> {
        let request = envelope.into_http_request()?;

        let response = match self.inner.clone().oneshot(request).await {
            Ok(response) => response,
            Err(infallible) => match infallible {},
        };

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| AppError::internal(format!("fail to read response body: {e}")))?;

        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in parts.headers.iter() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }

        Ok(ResponseEnvelope::from_reply(
            parts.status.as_u16(),
            headers,
            body.to_vec(),
        ))
    }
}

/// Registration-time method check; unsupported verbs are a programming
/// error caught at startup.
fn filter_for(method: &Method) -> axum::routing::MethodFilter {
    axum::routing::MethodFilter::try_from(method.clone())
        .unwrap_or_else(|_| panic!("unsupported route method: {method}"))
}

async fn run_typed<Req, Res, H, Fut>(handler: H, request: Request) -> AppResult<Reply>
where
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
    H: Fn(RequestContext, Req) -> Fut,
    Fut: Future<Output = AppResult<Res>>,
{
    let (context, body) = split_request(request).await?;
    if body.is_empty() {
        return Err(AppError::validation("body is empty"));
    }

    let value: Req = serde_json::from_slice(&body)?;
    let result = handler(context, value).await?;
    Ok(Reply::ok().body(encode_value(&result)?))
}

async fn run_raw<H, Fut>(handler: H, request: Request) -> AppResult<Reply>
where
    H: Fn(RequestContext, Bytes) -> Fut,
    Fut: Future<Output = AppResult<Reply>>,
{
    let (context, body) = split_request(request).await?;
    handler(context, body).await
}

async fn split_request(request: Request) -> AppResult<(RequestContext, Bytes)> {
    let (parts, body) = request.into_parts();
    let context = RequestContext::from_parts(&parts);
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| AppError::internal(format!("fail to read request body: {e}")))?;
    Ok((context, body))
}

/// Handler failures surface as a 500 envelope with the message in the body
fn handler_error_response(e: &AppError) -> Response {
    tracing::error!(error = %e, "handler error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_config::CodecConfig;
    use serde::Deserialize;

    fn codec() -> CodecConfig {
        CodecConfig {
            backend_endpoint: "http://localhost:8080".to_string(),
            title_case_query: false,
        }
    }

    fn envelope_for(method: &str, path: &str, body: &[u8]) -> RequestEnvelope {
        let request = http::Request::builder()
            .method(method)
            .uri(path)
            .header("x-user-id", "user-7")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();
        RequestEnvelope::from_http(&parts, body, &codec()).unwrap()
    }

    #[derive(Debug, Deserialize)]
    struct EchoRequest {
        message: String,
    }

    #[derive(Debug, Serialize)]
    struct EchoResponse {
        message: String,
        user: String,
    }

    fn echo_router() -> Arc<ServiceRouter> {
        Arc::new(ServiceRouter::new().route(
            Method::POST,
            "/api/v1/echo/Say",
            |ctx: RequestContext, req: EchoRequest| async move {
                Ok(EchoResponse {
                    message: req.message,
                    user: ctx.user_id.unwrap_or_default(),
                })
            },
        ))
    }

    #[tokio::test]
    async fn test_typed_handler_json_response() {
        let router = echo_router();
        let envelope = envelope_for("POST", "/api/v1/echo/Say", br#"{"message":"hi"}"#);

        let reply = router.dispatch(envelope).await.unwrap();
        assert_eq!(reply.status_code, 200);

        let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body["message"], "hi");
        assert_eq!(body["user"], "user-7");
    }

    #[tokio::test]
    async fn test_handler_error_becomes_500_envelope() {
        let router = Arc::new(ServiceRouter::new().route(
            Method::POST,
            "/api/v1/echo/Fail",
            |_ctx: RequestContext, _req: EchoRequest| async move {
                Err::<EchoResponse, _>(AppError::not_found("order not found"))
            },
        ));
        let envelope = envelope_for("POST", "/api/v1/echo/Fail", br#"{"message":"hi"}"#);

        let reply = router.dispatch(envelope).await.unwrap();
        assert_eq!(reply.status_code, 500);

        let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body["error"], "not found: order not found");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let router = echo_router();
        let envelope = envelope_for("POST", "/api/v1/echo/Nope", br#"{"message":"hi"}"#);

        let reply = router.dispatch(envelope).await.unwrap();
        assert_eq!(reply.status_code, 404);
    }

    #[tokio::test]
    async fn test_string_reply_passes_verbatim() {
        let router = Arc::new(ServiceRouter::new().route(
            Method::POST,
            "/api/v1/echo/Version",
            |_ctx: RequestContext, _req: serde_json::Value| async move {
                Ok("v1.2.3".to_string())
            },
        ));
        let envelope = envelope_for("POST", "/api/v1/echo/Version", b"{}");

        let reply = router.dispatch(envelope).await.unwrap();
        assert_eq!(reply.body, b"v1.2.3");
    }

    #[tokio::test]
    async fn test_raw_handler_overrides_status() {
        let router = Arc::new(ServiceRouter::new().route_raw(
            Method::POST,
            "/api/v1/echo/Create",
            |_ctx: RequestContext, body: Bytes| async move {
                Ok(Reply::with_status(StatusCode::CREATED).body(body.to_vec()))
            },
        ));
        let envelope = envelope_for("POST", "/api/v1/echo/Create", b"payload");

        let reply = router.dispatch(envelope).await.unwrap();
        assert_eq!(reply.status_code, 201);
        assert_eq!(reply.body, b"payload");
    }

    #[tokio::test]
    async fn test_empty_body_is_rejected() {
        let router = echo_router();
        let envelope = envelope_for("POST", "/api/v1/echo/Say", b"");

        let reply = router.dispatch(envelope).await.unwrap();
        assert_eq!(reply.status_code, 500);
        let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert!(body["error"].as_str().unwrap().contains("body is empty"));
    }

    #[test]
    fn test_encode_value_shapes() {
        assert_eq!(encode_value(&"plain".to_string()).unwrap(), b"plain");
        assert_eq!(encode_value(&42_u32).unwrap(), b"42");
        assert_eq!(encode_value(&true).unwrap(), b"true");
        assert_eq!(
            encode_value(&json!({"a": 1})).unwrap(),
            br#"{"a":1}"#.to_vec()
        );
        assert!(encode_value(&()).unwrap().is_empty());
    }
}
