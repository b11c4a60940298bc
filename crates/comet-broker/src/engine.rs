use comet_core::wire;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("no comet connection available")]
    NoListener,
    #[error("malformed pingback '{0}'")]
    BadPingback(String),
}

/// A suspended comet request, queued until a message is delivered to it or
/// its own deadline fires. Never mutated after registration, only removed.
struct WaitingListener {
    token: u64,
    registered_at: Instant,
    deliver: oneshot::Sender<String>,
}

/// A suspended send request, held until the receiving listener's next comet
/// request carries the matching pingback, or the ack deadline fires.
struct PendingMessage {
    payload: String,
    enqueued_at: Instant,
    ack: oneshot::Sender<String>,
}

/// The rendezvous engine: pairs waiting comet requests with incoming
/// messages in strict registration order and holds each delivered message
/// until it is acknowledged.
///
/// Suspension is a pending oneshot, never a blocked thread. Both races
/// (delivery vs. listener deadline, pingback vs. message deadline) are
/// settled by an atomic claim: whichever side removes the entry from the
/// shared structure completes the request, the other observes absence and
/// no-ops.
pub struct Broker {
    waiting: Mutex<VecDeque<WaitingListener>>,
    pending: Mutex<HashMap<u64, PendingMessage>>,
    next_message_id: AtomicU64,
    next_listener_token: AtomicU64,
    comet_timeout: Duration,
    message_timeout: Duration,
}

impl Broker {
    pub fn new(comet_timeout: Duration, message_timeout: Duration) -> Self {
        Self {
            waiting: Mutex::new(VecDeque::new()),
            pending: Mutex::new(HashMap::new()),
            next_message_id: AtomicU64::new(0),
            next_listener_token: AtomicU64::new(0),
            comet_timeout,
            message_timeout,
        }
    }

    /// Handles a comet long poll. A pingback, if present, acknowledges the
    /// previously delivered message; the request then always re-registers as
    /// a fresh waiting listener. Resolves with a delivery body or "TIMEOUT".
    pub async fn listen(&self, pingback: Option<&str>) -> Result<String, BrokerError> {
        if let Some(pingback) = pingback {
            self.acknowledge(pingback)?;
        }

        let token = self.next_listener_token.fetch_add(1, Ordering::Relaxed);
        let (deliver, mut delivered) = oneshot::channel();
        {
            let mut waiting = self.waiting.lock().unwrap();
            waiting.push_back(WaitingListener {
                token,
                registered_at: Instant::now(),
                deliver,
            });
        }
        debug!(token, "comet request queued");
        // if the client disconnects, axum drops this future; the guard keeps
        // the queue free of dead entries (a no-op on every normal path, where
        // the entry has already been claimed)
        let _guard = WaitingGuard {
            broker: self,
            token,
        };

        tokio::select! {
            body = &mut delivered => Ok(body.unwrap_or_else(|_| wire::TIMEOUT_BODY.to_string())),
            _ = tokio::time::sleep(self.comet_timeout) => {
                if self.remove_waiting(token) {
                    debug!(token, "comet request timed out while queued");
                    Ok(wire::TIMEOUT_BODY.to_string())
                } else {
                    // a send popped this listener first, so the delivery is
                    // already in flight
                    Ok(delivered.await.unwrap_or_else(|_| wire::TIMEOUT_BODY.to_string()))
                }
            }
        }
    }

    /// Handles a message send: pops the earliest waiting listener, delivers
    /// `"<id>:<payload>"` to it, and stays suspended until the pingback
    /// arrives (resolving with the echoed payload) or the deadline fires
    /// (resolving with "TIMEOUT"). An empty queue fails without side effects.
    pub async fn send(&self, payload: &str) -> Result<String, BrokerError> {
        let listener = self
            .waiting
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(BrokerError::NoListener)?;

        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let (ack, mut acked) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(
                message_id,
                PendingMessage {
                    payload: payload.to_string(),
                    enqueued_at: Instant::now(),
                    ack,
                },
            );
        }

        let _guard = PendingGuard {
            broker: self,
            message_id,
        };

        debug!(
            message_id,
            queued_ms = listener.registered_at.elapsed().as_millis() as u64,
            "delivering message"
        );
        if listener
            .deliver
            .send(wire::format_delivery(message_id, payload))
            .is_err()
        {
            warn!(message_id, "listener vanished mid-delivery, waiting out the ack deadline");
        }

        tokio::select! {
            body = &mut acked => Ok(body.unwrap_or_else(|_| wire::TIMEOUT_BODY.to_string())),
            _ = tokio::time::sleep(self.message_timeout) => {
                let reaped = self.pending.lock().unwrap().remove(&message_id);
                match reaped {
                    Some(pending) => {
                        warn!(
                            message_id,
                            payload = %pending.payload,
                            waited_ms = pending.enqueued_at.elapsed().as_millis() as u64,
                            "message timed out waiting for pingback"
                        );
                        Ok(wire::TIMEOUT_BODY.to_string())
                    }
                    // the pingback claimed the entry first; its completion
                    // is already in flight
                    None => Ok(acked.await.unwrap_or_else(|_| wire::TIMEOUT_BODY.to_string())),
                }
            }
        }
    }

    /// Current waiting-listener count. Never suspends; used by the client
    /// harness to synchronize ramp-up.
    pub fn waiting_count(&self) -> usize {
        self.waiting.lock().unwrap().len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Reinitializes all state between test runs in the same process.
    /// Outstanding suspensions observe their channels closing and resolve
    /// as "TIMEOUT".
    pub fn reset(&self) {
        self.waiting.lock().unwrap().clear();
        self.pending.lock().unwrap().clear();
        self.next_message_id.store(0, Ordering::Relaxed);
    }

    /// Completes the pending message named by the pingback. A missing entry
    /// means the send already timed out and was reaped, which is expected
    /// under load rather than an error.
    fn acknowledge(&self, pingback: &str) -> Result<(), BrokerError> {
        let (message_id, payload) = wire::parse_delivery(pingback)
            .ok_or_else(|| BrokerError::BadPingback(pingback.to_string()))?;

        let entry = self.pending.lock().unwrap().remove(&message_id);
        match entry {
            Some(pending) => {
                debug!(
                    message_id,
                    ack_ms = pending.enqueued_at.elapsed().as_millis() as u64,
                    "message acknowledged"
                );
                if pending.ack.send(payload.to_string()).is_err() {
                    warn!(message_id, "send request gone before acknowledgment");
                }
            }
            None => warn!(message_id, "message already timed out, dropping pingback"),
        }
        Ok(())
    }

    /// Claims the queued listener with this token. Returns false when a send
    /// already popped it, in which case the send wins the race.
    fn remove_waiting(&self, token: u64) -> bool {
        let mut waiting = self.waiting.lock().unwrap();
        match waiting.iter().position(|listener| listener.token == token) {
            Some(idx) => {
                waiting.remove(idx);
                true
            }
            None => false,
        }
    }
}

struct WaitingGuard<'a> {
    broker: &'a Broker,
    token: u64,
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.broker.remove_waiting(self.token);
    }
}

struct PendingGuard<'a> {
    broker: &'a Broker,
    message_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.broker.pending.lock().unwrap().remove(&self.message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn broker(comet_ms: u64, message_ms: u64) -> Arc<Broker> {
        Arc::new(Broker::new(
            Duration::from_millis(comet_ms),
            Duration::from_millis(message_ms),
        ))
    }

    async fn wait_for_waiting(broker: &Broker, n: usize) {
        for _ in 0..1000 {
            if broker.waiting_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("never saw {n} waiting listeners");
    }

    #[tokio::test]
    async fn test_round_trip_with_pingback() {
        let broker = broker(5_000, 5_000);

        let b = broker.clone();
        let listener = tokio::spawn(async move { b.listen(None).await });
        wait_for_waiting(&broker, 1).await;

        let b = broker.clone();
        let send = tokio::spawn(async move { b.send("42").await });

        let delivery = listener.await.unwrap().unwrap();
        assert_eq!(delivery, "0:42");

        // the listener's next request carries the pingback and releases the
        // suspended send
        let b = broker.clone();
        tokio::spawn(async move { b.listen(Some(&delivery)).await });

        assert_eq!(send.await.unwrap().unwrap(), "42");
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fifo_fairness() {
        let broker = broker(5_000, 100);

        let b = broker.clone();
        let first = tokio::spawn(async move { b.listen(None).await });
        wait_for_waiting(&broker, 1).await;

        let b = broker.clone();
        let second = tokio::spawn(async move { b.listen(None).await });
        wait_for_waiting(&broker, 2).await;

        let b = broker.clone();
        tokio::spawn(async move { b.send("only").await });

        // the earliest-registered listener receives the single message
        assert_eq!(first.await.unwrap().unwrap(), "0:only");
        assert_eq!(broker.waiting_count(), 1);

        broker.reset();
        assert_eq!(second.await.unwrap().unwrap(), wire::TIMEOUT_BODY);
    }

    #[tokio::test]
    async fn test_message_ids_unique_under_concurrent_sends() {
        let broker = broker(5_000, 20);
        let n = 50;

        let mut listeners = Vec::new();
        for _ in 0..n {
            let b = broker.clone();
            listeners.push(tokio::spawn(async move { b.listen(None).await }));
        }
        wait_for_waiting(&broker, n).await;

        let mut sends = Vec::new();
        for i in 0..n {
            let b = broker.clone();
            sends.push(tokio::spawn(async move { b.send(&format!("m{i}")).await }));
        }

        let mut ids = std::collections::HashSet::new();
        for listener in listeners {
            let delivery = listener.await.unwrap().unwrap();
            let (id, _) = wire::parse_delivery(&delivery).expect("delivery body");
            assert!(ids.insert(id), "message id {id} assigned twice");
        }
        assert_eq!(ids.len(), n);

        // unacknowledged sends all resolve via their own deadline
        for send in sends {
            assert_eq!(send.await.unwrap().unwrap(), wire::TIMEOUT_BODY);
        }
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_without_listener_is_rejected() {
        let broker = broker(5_000, 5_000);
        let err = broker.send("orphan").await.unwrap_err();
        assert!(matches!(err, BrokerError::NoListener));

        // exhaustion leaves no trace
        assert_eq!(broker.waiting_count(), 0);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_queued_listener_times_out() {
        let broker = broker(50, 5_000);
        let start = Instant::now();
        assert_eq!(broker.listen(None).await.unwrap(), wire::TIMEOUT_BODY);
        assert!(start.elapsed() < Duration::from_millis(1_000));
        assert_eq!(broker.waiting_count(), 0);
    }

    #[tokio::test]
    async fn test_pingback_for_reaped_message_is_not_an_error() {
        let broker = broker(50, 5_000);
        // no pending entry for id 7; the listener still re-registers and
        // times out normally
        assert_eq!(broker.listen(Some("7:stale")).await.unwrap(), wire::TIMEOUT_BODY);
    }

    #[tokio::test]
    async fn test_malformed_pingback_is_rejected() {
        let broker = broker(50, 50);
        let err = broker.listen(Some("nonsense")).await.unwrap_err();
        assert!(matches!(err, BrokerError::BadPingback(_)));
        assert_eq!(broker.waiting_count(), 0);
    }

    #[tokio::test]
    async fn test_reset_wakes_suspended_listeners() {
        let broker = broker(300_000, 300_000);

        let b = broker.clone();
        let listener = tokio::spawn(async move { b.listen(None).await });
        wait_for_waiting(&broker, 1).await;

        broker.reset();
        assert_eq!(listener.await.unwrap().unwrap(), wire::TIMEOUT_BODY);
        assert_eq!(broker.waiting_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ack_vs_timeout_race_settles_exactly_once() {
        // short ack deadline and a jittered pingback force both orderings
        for i in 0..100u64 {
            let broker = broker(5_000, 4);

            let b = broker.clone();
            let listener = tokio::spawn(async move { b.listen(None).await });
            wait_for_waiting(&broker, 1).await;

            let payload = format!("p{i}");
            let b = broker.clone();
            let expected = payload.clone();
            let send = tokio::spawn(async move { b.send(&expected).await });

            let delivery = listener.await.unwrap().unwrap();
            tokio::time::sleep(Duration::from_millis(i % 8)).await;

            let b = broker.clone();
            tokio::spawn(async move { b.listen(Some(&delivery)).await });

            // exactly one of {ack, deadline} wins; either way the send
            // resolves once and the table is drained
            let body = send.await.unwrap().unwrap();
            assert!(
                body == payload || body == wire::TIMEOUT_BODY,
                "unexpected send resolution '{body}'"
            );
            assert_eq!(broker.pending_count(), 0);
        }
    }
}
