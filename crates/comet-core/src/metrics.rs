use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

/// Run-scoped counters shared by every connection state machine. All
/// recorders are lock-free and safe to call from any completion task;
/// `record_error` doubles as the failure sink for the whole harness.
#[derive(Debug, Default)]
pub struct Metrics {
    connections_established: AtomicU64,
    echoes: AtomicU64,
    errors: AtomicU64,
    messages_sent: AtomicU64,
    acks: AtomicU64,
    ack_latency_total_ms: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
    }

    /// A message was delivered to a waiting comet connection.
    pub fn record_echo(&self) {
        self.echoes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, cause: impl std::fmt::Display) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        error!("{cause}");
    }

    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack(&self, latency_ms: u64) {
        self.acks.fetch_add(1, Ordering::Relaxed);
        self.ack_latency_total_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn ack_count(&self) -> u64 {
        self.acks.load(Ordering::Relaxed)
    }

    /// No errors recorded and every sent message was acknowledged.
    pub fn is_clean(&self) -> bool {
        self.errors.load(Ordering::Relaxed) == 0
            && self.messages_sent.load(Ordering::Relaxed) == self.acks.load(Ordering::Relaxed)
    }

    /// Counters may be read at slightly different instants; exact
    /// cross-counter consistency is not needed for reporting.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let acks = self.acks.load(Ordering::Relaxed);
        let latency_total = self.ack_latency_total_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            connections_established: self.connections_established.load(Ordering::Relaxed),
            echoes: self.echoes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            acks,
            avg_ack_latency_ms: if acks > 0 { latency_total / acks } else { 0 },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connections_established: u64,
    pub echoes: u64,
    pub errors: u64,
    pub messages_sent: u64,
    pub acks: u64,
    pub avg_ack_latency_ms: u64,
}
