//! League webhooks server binary.

use league_webhooks_server::{CONFIG_ENV, ServerConfig, WebhookServer, config_path, load_config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let (config, webhooks) = match config_path(std::env::args().skip(1), std::env::var(CONFIG_ENV).ok()) {
        Some(path) => load_config(&path)?,
        None => (ServerConfig::default(), Default::default()),
    };

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Create and run server
    let server = WebhookServer::new(config, webhooks).await?;
    server.run().await?;

    Ok(())
}
