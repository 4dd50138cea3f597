use std::sync::Arc;

use futures::StreamExt;
use portico_error::AppResult;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::bus::{BusClient, QUEUE_GROUP};
use crate::envelope::RequestEnvelope;
use crate::telemetry;

use super::ServiceRouter;

/// Identity of one service process
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub service_name: String,
    /// Bus subject the service answers on, e.g. `/api/v1/order`
    pub subject: String,
}

/// Bus subscriber that feeds decoded envelopes through the service router.
///
/// Replicas subscribe with the shared queue group, so each message is
/// handled by exactly one of them. Each message runs on its own task.
pub struct ServiceServer {
    bus: BusClient,
    router: Arc<ServiceRouter>,
    config: ServiceConfig,
    shutdown_tx: watch::Sender<bool>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ServiceServer {
    pub fn new(bus: BusClient, router: ServiceRouter, config: ServiceConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bus,
            router: Arc::new(router),
            config,
            shutdown_tx,
            worker: std::sync::Mutex::new(None),
        }
    }

    /// Subscribe and start processing. The route table must be complete
    /// before this is called; it is read-only afterwards.
    pub async fn start(&self) -> AppResult<()> {
        let mut subscriber = self.bus.queue_subscribe(&self.config.subject).await?;
        tracing::info!(
            service = %self.config.service_name,
            subject = %self.config.subject,
            queue_group = QUEUE_GROUP,
            "service subscribed"
        );

        let bus = self.bus.clone();
        let router = self.router.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = async {
                        while !*shutdown_rx.borrow() {
                            if shutdown_rx.changed().await.is_err() {
                                break;
                            }
                        }
                    } => {
                        if let Err(e) = subscriber.unsubscribe().await {
                            tracing::warn!(error = %e, "fail to unsubscribe");
                        }
                        // finish whatever already arrived before exiting
                        while let Some(message) = subscriber.next().await {
                            handle_message(&bus, &router, message).await;
                        }
                        break;
                    }
                    maybe = subscriber.next() => match maybe {
                        Some(message) => {
                            let bus = bus.clone();
                            let router = router.clone();
                            tokio::spawn(async move {
                                handle_message(&bus, &router, message).await;
                            });
                        }
                        None => break,
                    }
                }
            }
        });

        *self.worker.lock().expect("worker handle poisoned") = Some(handle);
        Ok(())
    }

    /// Drain the subscription (stop pulling new messages, complete
    /// in-flight) and flush pending replies. Safe to call more than once.
    pub async fn stop(&self) -> AppResult<()> {
        let _ = self.shutdown_tx.send(true);

        let handle = self.worker.lock().expect("worker handle poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "subscription worker ended abnormally");
            }
        }

        self.bus.flush().await?;
        tracing::info!(service = %self.config.service_name, "service drained");
        Ok(())
    }
}

/// One bus message: decode, route, reply. A malformed envelope is logged
/// and dropped without a reply, so the caller observes its bus timeout.
async fn handle_message(bus: &BusClient, router: &Arc<ServiceRouter>, message: async_nats::Message) {
    let envelope: RequestEnvelope = match serde_json::from_slice(&message.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!(error = %e, "fail to unmarshal bus request, dropping message");
            return;
        }
    };

    let parent = telemetry::extract_context(&envelope.header);
    let path = url_path(&envelope.url).to_string();
    let span_name = format!("service request: {path}");
    let span = tracing::info_span!(
        "service request",
        otel.name = %span_name,
        http.method = %envelope.method,
        http.route = %path,
    );
    span.set_parent(parent);

    let reply_to = message.reply.clone();
    let response = async {
        match router.dispatch(envelope).await {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::error!(error = %e, "fail to decode bus request, dropping message");
                None
            }
        }
    }
    .instrument(span)
    .await;

    let Some(response) = response else { return };

    // async requests carry no reply subject and produce no response
    let Some(reply_to) = reply_to else { return };

    match serde_json::to_vec(&response) {
        Ok(payload) => {
            if let Err(e) = bus.publish(reply_to, payload.into()).await {
                tracing::error!(error = %e, "fail to respond to message");
            }
        }
        Err(e) => tracing::error!(error = %e, "fail to marshal response envelope"),
    }
}

/// Path portion of an envelope URL, which may or may not carry a host
fn url_path(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    match rest.find('/') {
        Some(idx) if url.contains("://") => &rest[idx..],
        _ => {
            if url.starts_with('/') {
                url
            } else {
                rest
            }
        }
    }
}
