use anyhow::{Context, Result};
use clap::Parser;
use comet_client::Controller;
use comet_core::{ClientConfig, MetricsSnapshot};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "comet-client")]
#[command(about = "Comet load test client - ramps long-poll connections and fires messages at the broker")]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Broker base URL (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// Number of comet connections (overrides config)
    #[arg(long)]
    connections: Option<u32>,

    /// Number of messages (overrides config)
    #[arg(long)]
    messages: Option<u32>,

    /// Sleep between connection starts in ms (overrides config)
    #[arg(long)]
    connection_throttle_ms: Option<u64>,

    /// Sleep between message sends in ms (overrides config)
    #[arg(long)]
    message_throttle_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunResult {
    timestamp: String,
    url: String,
    connections: u32,
    messages: u32,
    successful: bool,
    #[serde(flatten)]
    metrics: MetricsSnapshot,
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
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => ClientConfig::default(),
    };
    if let Some(url) = args.url {
        config.url = url;
    }
    if let Some(connections) = args.connections {
        config.connections = connections;
    }
    if let Some(messages) = args.messages {
        config.messages = messages;
    }
    if let Some(throttle) = args.connection_throttle_ms {
        config.connection_throttle_ms = throttle;
    }
    if let Some(throttle) = args.message_throttle_ms {
        config.message_throttle_ms = throttle;
    }

    info!(
        "Starting run against {} ({} connections, {} messages)",
        config.url, config.connections, config.messages
    );

    let mut controller = Controller::new(config.url.clone())?;

    info!("establishing comet connections ...");
    controller
        .establish_comet_connections(config.connections, config.connection_throttle_ms)
        .await;
    controller
        .wait_for_connections(config.connections, config.await_connections_timeout_ms)
        .await?;

    info!("sending messages ...");
    controller
        .send_messages(config.messages, config.message_throttle_ms)
        .await;
    let acks = controller
        .wait_for_acks(config.messages, config.await_acks_timeout_ms)
        .await;

    let snapshot = controller.snapshot();
    let successful = acks.is_ok() && controller.is_successful();

    info!("terminating ...");
    controller.terminate().await;

    print_summary(&snapshot);
    write_run_result(&config, successful, snapshot)?;

    if let Err(err) = acks {
        return Err(err);
    }
    if !successful {
        anyhow::bail!("run completed with errors (see summary above)");
    }
    Ok(())
}

fn print_summary(snapshot: &MetricsSnapshot) {
    println!("\n=== Run Summary ===");
    println!("Comet connections established: {}", snapshot.connections_established);
    println!("Messages echoed: {}", snapshot.echoes);
    println!("Errors: {}", snapshot.errors);
    println!("Messages sent: {}", snapshot.messages_sent);
    println!("Messages acknowledged: {}", snapshot.acks);
    println!("Average ack latency: {}ms", snapshot.avg_ack_latency_ms);
    println!();
}

fn write_run_result(
    config: &ClientConfig,
    successful: bool,
    metrics: MetricsSnapshot,
) -> Result<()> {
    let result = RunResult {
        timestamp: chrono::Utc::now().to_rfc3339(),
        url: config.url.clone(),
        connections: config.connections,
        messages: config.messages,
        successful,
        metrics,
    };

    std::fs::create_dir_all("results").ok();
    let output_path = format!(
        "results/run_{}.json",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    );
    let result_json = serde_json::to_string_pretty(&result)?;
    std::fs::write(&output_path, result_json)?;
    info!("Results written to {}", output_path);
    Ok(())
}
