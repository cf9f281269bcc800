// src/api.rs
//! Admin HTTP surface: health, manual runs, state inspection and metrics.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::ingest::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub cancel: CancellationToken,
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/run", post(trigger_run))
        .route("/state", get(state_info));

    if state.metrics.is_some() {
        app = app.route("/metrics", get(render_metrics));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn trigger_run(State(state): State<AppState>) -> Response {
    match state.pipeline.try_run(&state.cancel).await {
        Some(report) => Json(report).into_response(),
        None => (StatusCode::CONFLICT, "run already in progress").into_response(),
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct StateOut {
    last_processed_date: Option<DateTime<Utc>>,
    delivered: usize,
    subscribers: usize,
}

async fn state_info(State(state): State<AppState>) -> Json<StateOut> {
    let store = state.pipeline.store();
    Json(StateOut {
        last_processed_date: store.load().await,
        delivered: store.history().await.len(),
        subscribers: state.pipeline.subscribers().all().len(),
    })
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(|h| h.render())
        .unwrap_or_default()
}
