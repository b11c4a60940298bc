use crate::connection::CometConnection;
use crate::sender;
use anyhow::{Context, Result};
use comet_core::{Metrics, MetricsSnapshot};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Ramps up comet connections and message senders against one broker URL,
/// polls for completion conditions, and shuts everything down together. All
/// state machines share one metrics collector and one HTTP client.
pub struct Controller {
    url: String,
    client: reqwest::Client,
    metrics: Arc<Metrics>,
    connections: Vec<CometConnection>,
    senders: Vec<JoinHandle<()>>,
}

impl Controller {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        // the request deadline must outlast the broker's 300s long-poll
        // deadline, otherwise reconnects get misreported as errors
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            url: url.into(),
            client,
            metrics: Arc::new(Metrics::new()),
            connections: Vec::new(),
            senders: Vec::new(),
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Starts `n` comet connections, sleeping the throttle between starts.
    /// Returns once all are started, not necessarily connected; pair with
    /// `wait_for_connections`.
    pub async fn establish_comet_connections(&mut self, n: u32, throttle_ms: u64) {
        let start = Instant::now();
        for _ in 0..n {
            self.connections.push(CometConnection::spawn(
                self.client.clone(),
                &self.url,
                self.metrics.clone(),
            ));
            sleep(Duration::from_millis(throttle_ms)).await;
        }
        info!(
            "started {} comet connections in {}ms",
            n,
            start.elapsed().as_millis()
        );
    }

    /// Polls the broker's waiting count until it reaches `n`.
    pub async fn wait_for_connections(&self, n: u32, timeout_ms: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let count = self.fetch_count().await?;
            debug!("waiting listener count: {count}");
            if count >= n as u64 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                anyhow::bail!(
                    "only {count} of {n} comet connections established within {timeout_ms}ms"
                );
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Fires `m` one-shot message senders with the same throttling discipline
    /// as connection ramp-up.
    pub async fn send_messages(&mut self, m: u32, throttle_ms: u64) {
        let start = Instant::now();
        for _ in 0..m {
            let client = self.client.clone();
            let url = self.url.clone();
            let metrics = self.metrics.clone();
            self.senders.push(tokio::spawn(async move {
                sender::send_message(client, &url, metrics).await;
            }));
            sleep(Duration::from_millis(throttle_ms)).await;
        }
        info!("sent {} messages over {}ms", m, start.elapsed().as_millis());
    }

    /// Polls the shared ack counter until it reaches `m`.
    pub async fn wait_for_acks(&self, m: u32, timeout_ms: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let count = self.metrics.ack_count();
            debug!("ack count: {count}");
            if count >= m as u64 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                anyhow::bail!("only {count} of {m} messages acknowledged within {timeout_ms}ms");
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Cancels every comet connection, waits for their tasks to exit, and
    /// aborts any sender that is still in flight.
    pub async fn terminate(&mut self) {
        for connection in &self.connections {
            connection.terminate();
        }
        for connection in self.connections.drain(..) {
            connection.join().await;
        }
        for sender in self.senders.drain(..) {
            sender.abort();
        }
    }

    pub fn is_successful(&self) -> bool {
        self.metrics.is_clean()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn fetch_count(&self) -> Result<u64> {
        let body = self
            .client
            .get(format!("{}/count", self.url))
            .send()
            .await
            .context("count request failed")?
            .text()
            .await
            .context("count response unreadable")?;
        body.trim()
            .parse()
            .with_context(|| format!("unparseable count response '{body}'"))
    }
}
