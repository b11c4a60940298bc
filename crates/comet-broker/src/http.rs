use crate::engine::{Broker, BrokerError};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

/// HTTP surface over a shared broker instance. The broker is passed in
/// rather than global so tests can run several isolated instances.
pub fn router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/comet", get(comet))
        .route("/message", get(message))
        .route("/count", get(count))
        .route("/reset", post(reset))
        .with_state(broker)
}

#[derive(Debug, Deserialize)]
struct CometParams {
    pingback: Option<String>,
}

async fn comet(
    State(broker): State<Arc<Broker>>,
    Query(params): Query<CometParams>,
) -> Result<String, (StatusCode, String)> {
    broker
        .listen(params.pingback.as_deref())
        .await
        .map_err(internal_error)
}

#[derive(Debug, Deserialize)]
struct MessageParams {
    message: Option<String>,
}

async fn message(
    State(broker): State<Arc<Broker>>,
    Query(params): Query<MessageParams>,
) -> Result<String, (StatusCode, String)> {
    let Some(payload) = params.message else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "missing message parameter".to_string(),
        ));
    };
    broker.send(&payload).await.map_err(internal_error)
}

async fn count(State(broker): State<Arc<Broker>>) -> String {
    broker.waiting_count().to_string()
}

async fn reset(State(broker): State<Arc<Broker>>) -> StatusCode {
    broker.reset();
    info!("broker state reset");
    StatusCode::NO_CONTENT
}

fn internal_error(err: BrokerError) -> (StatusCode, String) {
    error!("{err}");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
