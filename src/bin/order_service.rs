// ============================================================================
// Order service
// ============================================================================
//
// Demo downstream service exercising the service runtime: subscribes to
// `/api/v1/order` with the shared queue group and answers typed RPCs.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use http::Method;
use portico_config::Config;
use portico_error::AppError;
use portico_server::bus::BusClient;
use portico_server::service::{RequestContext, ServiceConfig, ServiceRouter, ServiceServer};
use portico_server::telemetry;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateOrderRequest {
    customer_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateOrderResponse {
    order_id: String,
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

/// In-memory order store standing in for the repository layer
struct OrderStore {
    orders: HashMap<Uuid, OrderResponse>,
}

impl OrderStore {
    fn seeded() -> Self {
        let mut orders = HashMap::new();
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440001").expect("seed uuid");
        orders.insert(
            id,
            OrderResponse {
                id: id.to_string(),
                name: "Test Order".to_string(),
            },
        );
        Self { orders }
    }

    fn get(&self, id: &Uuid) -> Option<OrderResponse> {
        self.orders.get(id).cloned()
    }
}

async fn create_order(
    _ctx: RequestContext,
    req: CreateOrderRequest,
) -> Result<CreateOrderResponse, AppError> {
    if req.customer_id.is_empty() {
        return Err(AppError::validation("customer_id is required"));
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::internal(format!("clock error: {e}")))?
        .as_secs();
    let order_id = format!("order_{}_{}", req.customer_id, now);

    info!(customer_id = %req.customer_id, order_id = %order_id, "order created");
    Ok(CreateOrderResponse { order_id })
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let telemetry = telemetry::init(&config.telemetry.for_service("order-service"), &config.rust_log)
        .context("failed to initialize telemetry")?;

    let bus = BusClient::connect(&config.bus)
        .await
        .context("failed to connect to bus")?;

    let store = Arc::new(OrderStore::seeded());
    let get_store = store.clone();

    let router = ServiceRouter::new()
        .route(Method::POST, "/api/v1/order/CreateOrder", create_order)
        .route(
            Method::POST,
            "/api/v1/order/GetOrderById",
            move |_ctx: RequestContext, req: GetOrderByIdRequest| {
                let store = get_store.clone();
                async move {
                    let id = Uuid::parse_str(&req.id)
                        .map_err(|e| AppError::validation(format!("invalid order id: {e}")))?;
                    store
                        .get(&id)
                        .ok_or_else(|| AppError::not_found("order not found"))
                }
            },
        );

    let server = ServiceServer::new(
        bus,
        router,
        ServiceConfig {
            service_name: "order-service".to_string(),
            subject: "/api/v1/order".to_string(),
        },
    );

    server.start().await.context("failed to start order service")?;
    info!("order service running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down order service");

    server.stop().await.context("failed to stop order service")?;
    telemetry.shutdown();
    Ok(())
}
