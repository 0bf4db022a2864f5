//! # League Webhooks Server
//!
//! Standalone HTTP service exposing subscription management, health and
//! analytics queries, and event intake for the webhook delivery engine.

mod api;
mod config;

pub use api::{ApiError, AppState, EmitRequest, ListParams, SubscriptionListResponse, SubscriptionView, router};
pub use config::{CONFIG_ENV, ConfigError, ServerConfig, config_path, load_config, parse_config};

use league_events::{EventBus, SharedEventEmitter};
use league_webhooks::{WebhookConfig, WebhookResult, WebhookSystem};
use std::sync::Arc;

/// The webhook server: the delivery engine, an event bus feeding it, and the API.
pub struct WebhookServer {
    /// Server configuration.
    pub config: ServerConfig,
    system: Arc<WebhookSystem>,
    bus: Arc<EventBus>,
}

impl WebhookServer {
    /// Creates a server with an in-memory HTTP delivery engine.
    pub async fn new(config: ServerConfig, webhooks: WebhookConfig) -> WebhookResult<Self> {
        let system = Arc::new(WebhookSystem::with_config(webhooks)?);
        let bus = Arc::new(EventBus::new());
        system.clone().connect_to_events(&bus).await;
        Ok(Self { config, system, bus })
    }

    /// Returns the webhook system.
    pub fn system(&self) -> &Arc<WebhookSystem> {
        &self.system
    }

    /// Returns the event bus deliveries are fed from.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Builds the API router.
    pub fn router(&self) -> axum::Router {
        router(AppState {
            system: self.system.clone(),
            events: SharedEventEmitter::new(self.bus.clone()),
        })
    }

    /// Serves the API and runs the retry scheduler until Ctrl-C.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let address = self.config.bind_address();
        let listener = tokio::net::TcpListener::bind(&address).await?;
        let scheduler = self.system.start_scheduler();

        tracing::info!(
            address = %address,
            sweep_interval_ms = self.system.config().sweep_interval_ms,
            "Starting league webhooks server"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
            })
            .await?;

        scheduler.shutdown().await;
        tracing::info!("Server stopped");
        Ok(())
    }
}
