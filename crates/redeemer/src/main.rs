use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod chain;
mod config;
mod error;
mod issuance;
mod lease;
mod price;
mod redemption;
mod refund;
mod server;
mod signing;
mod store;

use config::RedeemerConfig;
use server::RedeemerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "redeemer=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting payment redemption service");

    dotenvy::dotenv().ok();
    let config = RedeemerConfig::from_env()?;

    info!("Configured chains: {:?}", config.chains.keys().collect::<Vec<_>>());
    info!("Listening on: {}:{}", config.host, config.port);

    let state = Arc::new(RedeemerState::new(config)?);
    server::run(state).await?;
    Ok(())
}
