// ============================================================================
// Message bus client
// ============================================================================
//
// Wrapper around the NATS connection shared by the gateway and the service
// runtime. Request/reply carries JSON envelopes; services join the
// `workers` queue group so replicas share load. The connection is drained,
// not closed, during shutdown so in-flight replies complete.
//
// ============================================================================

use std::time::Duration;

use bytes::Bytes;
use portico_config::BusConfig;
use portico_error::{AppError, AppResult};

/// Queue group shared by service replicas: each message is delivered to
/// exactly one member.
pub const QUEUE_GROUP: &str = "workers";

/// Shared, thread-safe bus connection
#[derive(Clone)]
pub struct BusClient {
    client: async_nats::Client,
}

impl BusClient {
    /// Connect to the bus with optional credentials
    pub async fn connect(config: &BusConfig) -> AppResult<Self> {
        let mut options = async_nats::ConnectOptions::new();
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(config.url.as_str())
            .await
            .map_err(|e| AppError::bus(format!("fail to connect to bus at {}: {e}", config.url)))?;

        tracing::info!(url = %config.url, "connected to message bus");
        Ok(Self { client })
    }

    /// Request/reply with a caller-supplied deadline. A timeout counts as a
    /// failure for circuit breaker accounting upstream.
    pub async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> AppResult<async_nats::Message> {
        let subject = subject.to_string();
        match tokio::time::timeout(timeout, self.client.request(subject.clone(), payload.into()))
            .await
        {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(e)) => Err(AppError::bus(format!("request to {subject} failed: {e}"))),
            Err(_) => Err(AppError::Timeout(format!(
                "request to {subject} exceeded {}s",
                timeout.as_secs()
            ))),
        }
    }

    pub async fn publish(&self, subject: async_nats::Subject, payload: Bytes) -> AppResult<()> {
        self.client
            .publish(subject, payload)
            .await
            .map_err(|e| AppError::bus(format!("fail to publish reply: {e}")))
    }

    /// Subscribe with the shared queue group
    pub async fn queue_subscribe(&self, subject: &str) -> AppResult<async_nats::Subscriber> {
        self.client
            .queue_subscribe(subject.to_string(), QUEUE_GROUP.to_string())
            .await
            .map_err(|e| AppError::bus(format!("fail to subscribe to {subject}: {e}")))
    }

    /// Drain the connection: stop accepting new work, let in-flight
    /// replies complete, then close.
    pub async fn drain(&self) -> AppResult<()> {
        self.client
            .drain()
            .await
            .map_err(|e| AppError::bus(format!("fail to drain bus connection: {e}")))
    }

    pub async fn flush(&self) -> AppResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| AppError::bus(format!("fail to flush bus connection: {e}")))
    }
}
