use comet_core::Metrics;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Process-wide payload counter so concurrently ramped senders never collide.
static NEXT_PAYLOAD: AtomicU64 = AtomicU64::new(0);

/// One-shot send against `GET /message`: fires the payload, then verifies the
/// broker echoes it back once a listener has acknowledged. Any other outcome
/// (timeout body, mismatch, bad status, transport failure) is an error; a
/// failed send is not retried.
pub async fn send_message(client: reqwest::Client, base_url: &str, metrics: Arc<Metrics>) {
    let payload = NEXT_PAYLOAD.fetch_add(1, Ordering::Relaxed).to_string();
    let start = Instant::now();
    metrics.record_message_sent();

    let response = client
        .get(format!("{base_url}/message"))
        .query(&[("message", &payload)])
        .send()
        .await;

    match response {
        Ok(response) if response.status() == StatusCode::OK => match response.text().await {
            Ok(body) if body == payload => {
                metrics.record_ack(start.elapsed().as_millis() as u64);
            }
            Ok(body) => metrics.record_error(format!(
                "received message '{body}' but expecting message '{payload}'"
            )),
            Err(err) => metrics.record_error(format!("message transport failure: {err}")),
        },
        Ok(response) => metrics.record_error(format!(
            "unexpected message response status {}",
            response.status()
        )),
        Err(err) => metrics.record_error(format!("message transport failure: {err}")),
    }
}
