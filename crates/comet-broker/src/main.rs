use anyhow::{Context, Result};
use clap::Parser;
use comet_broker::{http, Broker};
use comet_core::BrokerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "comet-broker")]
#[command(about = "Comet load test broker - pairs waiting long polls with incoming messages")]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => BrokerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => BrokerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    info!(
        "Starting broker on {} (comet timeout {}ms, message timeout {}ms)",
        config.bind, config.comet_timeout_ms, config.message_timeout_ms
    );

    let broker = Arc::new(Broker::new(config.comet_timeout(), config.message_timeout()));
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    axum::serve(listener, http::router(broker)).await?;

    Ok(())
}
