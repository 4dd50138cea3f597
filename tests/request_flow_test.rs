// ============================================================================
// Request flow tests
// ============================================================================
//
// The full request path minus the bus itself: an external HTTP request is
// encoded into an envelope at the gateway side, dispatched through a
// service router, and the reply envelope is written back as an HTTP
// response.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use http::{Method, StatusCode};
use portico_config::CodecConfig;
use portico_error::AppError;
use portico_server::envelope::{RequestEnvelope, ResponseEnvelope};
use portico_server::service::{RequestContext, ServiceRouter};
use serde::{Deserialize, Serialize};

fn codec() -> CodecConfig {
    CodecConfig {
        backend_endpoint: "http://localhost:8080".to_string(),
        title_case_query: false,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetOrderByIdRequest {
    id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct OrderResponse {
    id: String,
    name: String,
}

const SEEDED_ORDER: &str = "550e8400-e29b-41d4-a716-446655440001";

fn order_router() -> Arc<ServiceRouter> {
    Arc::new(ServiceRouter::new().route(
        Method::POST,
        "/api/v1/order/GetOrderById",
        |_ctx: RequestContext, req: GetOrderByIdRequest| async move {
            if req.id == SEEDED_ORDER {
                Ok(OrderResponse {
                    id: SEEDED_ORDER.to_string(),
                    name: "Test Order".to_string(),
                })
            } else {
                Err(AppError::not_found("order not found"))
            }
        },
    ))
}

fn encode(method: &str, uri: &str, body: &[u8]) -> RequestEnvelope {
    let mut builder = http::Request::builder().method(method).uri(uri);
    builder = builder.header("cookie", "portico_session=abc");
    let (parts, _) = builder.body(()).unwrap().into_parts();
    RequestEnvelope::from_http(&parts, body, &codec()).unwrap()
}

#[tokio::test]
async fn test_successful_dispatch_round_trip() {
    let router = order_router();

    let mut envelope = encode(
        "POST",
        "/api/v1/order/GetOrderById",
        format!(r#"{{"Id":"{SEEDED_ORDER}"}}"#).as_bytes(),
    );
    envelope.add_header("X-User-Id", "user-1");

    assert_eq!(envelope.subject, "/api/v1/order");
    assert_eq!(envelope.service_name, "order");

    // what actually crosses the bus is JSON
    let wire = serde_json::to_vec(&envelope).unwrap();
    let received: RequestEnvelope = serde_json::from_slice(&wire).unwrap();

    let reply = router.dispatch(received).await.unwrap();
    assert_eq!(reply.status_code, 200);

    let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
    assert_eq!(body["Id"], SEEDED_ORDER);
    assert_eq!(body["Name"], "Test Order");

    // and the gateway writes it back verbatim
    let reply_wire = serde_json::to_vec(&reply).unwrap();
    let decoded: ResponseEnvelope = serde_json::from_slice(&reply_wire).unwrap();
    let response = decoded.into_http_response().unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["Name"], "Test Order");
}

#[tokio::test]
async fn test_handler_error_surfaces_as_500_envelope() {
    let router = order_router();

    let envelope = encode(
        "POST",
        "/api/v1/order/GetOrderById",
        br#"{"Id":"00000000-0000-0000-0000-000000000000"}"#,
    );

    let reply = router.dispatch(envelope).await.unwrap();
    assert_eq!(reply.status_code, 500);
    let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
    assert_eq!(body["error"], "not found: order not found");
}

#[tokio::test]
async fn test_get_request_reaches_post_route_after_rewrite() {
    // GET /...?Id=<uuid> is rewritten to POST with the query as JSON body,
    // so it matches the POST route table on the service side.
    let router = order_router();

    let envelope = encode(
        "GET",
        &format!("/api/v1/order/GetOrderById?Id={SEEDED_ORDER}"),
        b"",
    );
    assert_eq!(envelope.method, "POST");

    let reply = router.dispatch(envelope).await.unwrap();
    assert_eq!(reply.status_code, 200);
}

#[tokio::test]
async fn test_user_id_header_visible_to_handler() {
    let router = Arc::new(ServiceRouter::new().route(
        Method::POST,
        "/api/v1/whoami/Get",
        |ctx: RequestContext, _req: serde_json::Value| async move {
            ctx.user_id
                .ok_or_else(|| AppError::auth("no user propagated"))
        },
    ));

    let mut envelope = encode("POST", "/api/v1/whoami/Get", b"{}");
    envelope.add_header("X-User-Id", "user-42");

    let reply = router.dispatch(envelope).await.unwrap();
    assert_eq!(reply.status_code, 200);
    assert_eq!(reply.body, b"user-42");
}

#[tokio::test]
async fn test_malformed_envelope_rejected_at_gateway_decode() {
    // a reply that is not valid envelope JSON must fail decoding, which
    // the gateway surfaces as a 500
    let garbage = b"not json at all";
    let decoded: Result<ResponseEnvelope, _> = serde_json::from_slice(garbage);
    assert!(decoded.is_err());
}

#[tokio::test]
async fn test_response_headers_survive_minus_hop_by_hop() {
    let router = Arc::new(ServiceRouter::new().route_raw(
        Method::POST,
        "/api/v1/files/Fetch",
        |_ctx: RequestContext, _body: bytes::Bytes| async move {
            Ok(portico_server::service::Reply::ok()
                .header(http::header::ETAG, "\"v7\"")
                .body(b"content".to_vec()))
        },
    ));

    let envelope = encode("POST", "/api/v1/files/Fetch", b"{}");
    let mut reply = router.dispatch(envelope).await.unwrap();

    // a misbehaving service copying hop-by-hop headers into the envelope
    reply
        .headers
        .insert("Content-Length".to_string(), vec!["999".to_string()]);

    let response = reply.into_http_response().unwrap();
    assert_eq!(response.headers().get("etag").unwrap(), "\"v7\"");
    assert!(response.headers().get("content-length").is_none());

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"content");
}

#[tokio::test]
async fn test_async_request_semantics_no_reply_needed() {
    // dispatch produces a response envelope; whether it is published is the
    // server's decision based on the reply subject. The router itself must
    // not require one.
    let router = order_router();
    let envelope = encode(
        "POST",
        "/api/v1/order/GetOrderById",
        format!(r#"{{"Id":"{SEEDED_ORDER}"}}"#).as_bytes(),
    );

    let reply = router.dispatch(envelope).await.unwrap();
    let _headers: &HashMap<String, Vec<String>> = &reply.headers;
    assert_eq!(reply.status_code, 200);
}

#[test]
fn test_encode_is_stable_for_equal_requests() {
    let a = encode("POST", "/api/v1/order/GetOrderById", b"{}");
    let b = encode("POST", "/api/v1/order/GetOrderById", b"{}");
    assert_eq!(a, b);
}
