use std::sync::Arc;

use scriptflow_core::clock::{Clock, TokioClock};
use scriptflow_core::config::Config;
use scriptflow_core::coordinator::Coordinator;
use scriptflow_core::models::ModelCatalog;
use scriptflow_core::store::Datastore;
use scriptflow_core::types::{PollPhase, StepNumber, StepStatus};
use scriptflow_core::webhook::WebhookForwarder;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Lifecycle notification for a server-side run, fanned out over SSE.
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub project_id: String,
    pub step: StepNumber,
    pub phase: PollPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Datastore>,
    pub forwarder: Arc<WebhookForwarder>,
    pub coordinator: Arc<Coordinator>,
    pub catalog: Arc<ModelCatalog>,
    pub event_tx: broadcast::Sender<RunEvent>,
    /// Cancelled on shutdown; every spawned run polls with a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Datastore>, client: reqwest::Client) -> Self {
        Self::with_clock(config, store, client, Arc::new(TokioClock::new()))
    }

    pub fn with_clock(
        config: Config,
        store: Arc<dyn Datastore>,
        client: reqwest::Client,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let forwarder = Arc::new(WebhookForwarder::new(
            client.clone(),
            config.webhooks.clone(),
            config.webhook_timeout(),
        ));
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            forwarder.clone(),
            clock,
            config.polling,
        ));
        let (event_tx, _) = broadcast::channel(64);
        Self {
            config: Arc::new(config),
            store,
            forwarder,
            coordinator,
            catalog: Arc::new(ModelCatalog::new(client)),
            event_tx,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn emit(&self, event: RunEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}
