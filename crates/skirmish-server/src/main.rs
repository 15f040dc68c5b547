//! Relay server binary.
//!
//! `SKIRMISH_ADDR` overrides the listen address.

use skirmish_server::{LobbyServer, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::var("SKIRMISH_ADDR").unwrap_or_else(|_| "0.0.0.0:4040".to_string());
    let server = LobbyServer::bind(&addr, ServerConfig::default()).await?;
    tracing::info!(addr = %server.local_addr()?, "Relay listening");
    server.run().await?;
    Ok(())
}
