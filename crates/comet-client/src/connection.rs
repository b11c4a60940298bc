use comet_core::{wire, Metrics};
use reqwest::StatusCode;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a comet connection does after inspecting a completed long poll.
/// Classification is pure so the transition table is testable without I/O;
/// the driver loop applies the metric side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconnect {
    /// Quiet deadline on the broker side; reconnect without a pingback.
    Plain,
    /// A message arrived; reconnect carrying the delivery as pingback.
    WithPingback(String),
    /// Unexpected status or body; record the error, then reconnect plain.
    PlainAfterError(String),
}

impl Reconnect {
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        if status != StatusCode::OK {
            return Reconnect::PlainAfterError(format!(
                "unexpected comet response status {status}"
            ));
        }
        if body == wire::TIMEOUT_BODY {
            return Reconnect::Plain;
        }
        if wire::parse_delivery(body).is_some() {
            Reconnect::WithPingback(body.to_string())
        } else {
            Reconnect::PlainAfterError(format!("unparseable comet response body '{body}'"))
        }
    }
}

/// A repeating long-poll loop against `GET /comet`, driven on its own task.
/// Every response (delivery, timeout, or failure) triggers a reconnect; the
/// loop only exits through `terminate`.
pub struct CometConnection {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl CometConnection {
    pub fn spawn(client: reqwest::Client, base_url: &str, metrics: Arc<Metrics>) -> Self {
        let cancel = CancellationToken::new();
        let task = ConnectionTask {
            client,
            comet_url: format!("{base_url}/comet"),
            metrics,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());
        Self { handle, cancel }
    }

    /// Cancels the in-flight long poll. This is the expected shutdown path
    /// and is never recorded as an error.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

struct ConnectionTask {
    client: reqwest::Client,
    comet_url: String,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
}

impl ConnectionTask {
    async fn run(self) {
        let mut pingback: Option<String> = None;
        self.metrics.record_connection_established();

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return,
                res = self.poll(pingback.take()) => res,
            };

            let next = match outcome {
                Ok((status, body)) => Reconnect::from_response(status, &body),
                Err(err) => Reconnect::PlainAfterError(format!("comet transport failure: {err}")),
            };

            pingback = match next {
                Reconnect::Plain => None,
                Reconnect::WithPingback(delivery) => {
                    debug!("received server message {delivery}");
                    self.metrics.record_echo();
                    Some(delivery)
                }
                Reconnect::PlainAfterError(cause) => {
                    self.metrics.record_error(cause);
                    None
                }
            };
        }
    }

    async fn poll(&self, pingback: Option<String>) -> reqwest::Result<(StatusCode, String)> {
        let mut request = self.client.get(&self.comet_url);
        if let Some(pingback) = &pingback {
            request = request.query(&[("pingback", pingback)]);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_reconnects_plain() {
        let next = Reconnect::from_response(StatusCode::OK, "TIMEOUT");
        assert_eq!(next, Reconnect::Plain);
    }

    #[test]
    fn test_delivery_reconnects_with_pingback() {
        let next = Reconnect::from_response(StatusCode::OK, "5:hello");
        assert_eq!(next, Reconnect::WithPingback("5:hello".to_string()));
    }

    #[test]
    fn test_bad_status_is_an_error_but_reconnects() {
        let next = Reconnect::from_response(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(matches!(next, Reconnect::PlainAfterError(_)));
    }

    #[test]
    fn test_garbage_body_is_an_error_but_reconnects() {
        let next = Reconnect::from_response(StatusCode::OK, "not a delivery");
        assert!(matches!(next, Reconnect::PlainAfterError(_)));
    }
}
