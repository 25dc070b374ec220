//! Contract log node binary
//!
//! Usage: `contract-node [CONTRACT_ID...]`
//!
//! Every id given on the command line is whitelisted before replication
//! starts; previously whitelisted contracts are restored from settings.

use anyhow::Context;
use contract_log::{Config, Engine, Registry, Replicator};
use message_bus::{Channel, NatsChannel, NatsConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting contract log node");

    let config = Config::from_env().context("loading configuration")?;
    let close_timeout = config.channel.close_timeout();
    let nats_config = NatsConfig {
        url: config.nats_url.clone(),
        subject_prefix: config.subject_prefix.clone(),
        ..NatsConfig::default()
    };

    let engine = Engine::open(config, Registry::with_defaults())
        .await
        .context("opening engine")?;
    tracing::info!("Engine opened successfully");

    let channel = Arc::new(
        NatsChannel::connect(nats_config)
            .await
            .context("connecting subscription channel")?,
    );
    let events = channel
        .take_events()
        .context("channel event stream already taken")?;

    let replicator = Replicator::new(engine.handle(), channel.clone());
    for contract_id in std::env::args().skip(1) {
        replicator
            .follow(&contract_id)
            .await
            .with_context(|| format!("following {}", contract_id))?;
    }

    let runner = {
        let replicator = replicator.clone();
        tokio::spawn(async move { replicator.run(events).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down contract log node");

    if let Err(e) = channel.close(close_timeout).await {
        tracing::warn!("Channel did not close cleanly: {}", e);
    }
    let stats = runner.await?;
    tracing::info!(delivered = stats.delivered, failed = stats.failed, "Replication finished");

    engine.shutdown().await?;
    Ok(())
}
