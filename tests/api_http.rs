// tests/api_http.rs
//
// HTTP-level tests for the admin Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /run (report JSON, 409 while busy)
// - GET /state
// - GET /metrics (present only with a handle)

mod common;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::{self, Body},
    Router,
};
use http::{Request, StatusCode};
use serde_json::Value as Json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as _; // for `oneshot`

use common::*;
use feed_translator::api::{self, AppState};
use feed_translator::ingest::types::{FeedItem, SourceProvider};
use feed_translator::ingest::Pipeline;
use feed_translator::store::MemoryStore;

const BODY_LIMIT: usize = 1024 * 1024;

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    String::from_utf8(bytes).expect("utf8")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET")
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .expect("build POST")
}

async fn test_pipeline(items: Vec<FeedItem>) -> Arc<Pipeline> {
    let api = FakeTranslateApi::default();
    let tg = FakeTelegram::default();
    let translate_url = api.start().await;
    let telegram_url = tg.start().await;
    let (provider, _) = StaticProvider::new("elpais.com", items);
    Arc::new(pipeline(
        vec![Box::new(provider)],
        Arc::new(MemoryStore::with_watermark(at(1, 0))),
        &translate_url,
        &telegram_url,
        registry_with_chat().await,
    ))
}

fn test_router(pipeline: Arc<Pipeline>) -> Router {
    api::router(AppState {
        pipeline,
        cancel: CancellationToken::new(),
        metrics: None,
    })
}

#[tokio::test]
async fn health_returns_ok() {
    let app = test_router(test_pipeline(vec![]).await);
    let resp = app.oneshot(get("/health")).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "OK");
}

#[tokio::test]
async fn run_returns_report_and_state_reflects_it() {
    let pipeline = test_pipeline(vec![
        item("a", "Uno", "x", at(2, 8)),
        item("b", "Dos", "x", at(2, 9)),
    ])
    .await;
    let app = test_router(pipeline);

    let resp = app.clone().oneshot(post("/run")).await.expect("oneshot /run");
    assert_eq!(resp.status(), StatusCode::OK);
    let report: Json = serde_json::from_str(&body_string(resp).await).expect("json");
    assert_eq!(report["fresh"], 2);
    assert_eq!(report["delivered"], 2);
    assert_eq!(report["watermark"], "2024-01-02T09:00:00Z");

    let resp = app.oneshot(get("/state")).await.expect("oneshot /state");
    assert_eq!(resp.status(), StatusCode::OK);
    let state: Json = serde_json::from_str(&body_string(resp).await).expect("json");
    assert_eq!(state["lastProcessedDate"], "2024-01-02T09:00:00Z");
    assert_eq!(state["delivered"], 2);
    assert_eq!(state["subscribers"], 1);
}

/// Blocks inside fetch until released, keeping a run in progress.
struct GateProvider {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl SourceProvider for GateProvider {
    async fn fetch_latest(&self) -> Result<Vec<FeedItem>> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(vec![])
    }
    fn name(&self) -> &str {
        "gate"
    }
}

#[tokio::test]
async fn run_while_busy_is_conflict() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let provider = GateProvider {
        entered: entered.clone(),
        release: release.clone(),
    };
    let tg = FakeTelegram::default();
    let telegram_url = tg.start().await;
    let pipeline = Arc::new(pipeline(
        vec![Box::new(provider)],
        Arc::new(MemoryStore::with_watermark(at(1, 0))),
        "http://127.0.0.1:9",
        &telegram_url,
        registry_with_chat().await,
    ));

    let running = {
        let p = pipeline.clone();
        tokio::spawn(async move { p.run(&CancellationToken::new()).await })
    };
    entered.notified().await;

    let app = test_router(pipeline);
    let resp = app.oneshot(post("/run")).await.expect("oneshot /run");
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    release.notify_one();
    let report = running.await.expect("join");
    assert_eq!(report.fetched, 0);
}

#[tokio::test]
async fn metrics_route_depends_on_handle() {
    let pipeline = test_pipeline(vec![]).await;

    let app = test_router(pipeline.clone());
    let resp = app.oneshot(get("/metrics")).await.expect("oneshot /metrics");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .build_recorder()
        .handle();
    let app = api::router(AppState {
        pipeline,
        cancel: CancellationToken::new(),
        metrics: Some(handle),
    });
    let resp = app.oneshot(get("/metrics")).await.expect("oneshot /metrics");
    assert_eq!(resp.status(), StatusCode::OK);
}
