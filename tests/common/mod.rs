// tests/common/mod.rs
//
// Local HTTP fakes for the translation and Telegram APIs, plus pipeline builders.
// Every fake binds 127.0.0.1:0 so tests can run in parallel.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use feed_translator::ingest::types::{FeedItem, SourceProvider};
use feed_translator::ingest::Pipeline;
use feed_translator::notify::TelegramGateway;
use feed_translator::store::WatermarkStore;
use feed_translator::subscribers::SubscriberRegistry;
use feed_translator::translate::{HuggingFaceTranslator, DEFAULT_MODEL};

pub const CHAT_ID: i64 = 369600113;
pub const TRANSLATED_PREFIX: &str = "УКР: ";

/// Serve `app` on an ephemeral port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake server");
    });
    format!("http://{addr}")
}

// ---------- translation API ----------

#[derive(Clone, Default)]
pub struct FakeTranslateApi {
    pub inputs: Arc<Mutex<Vec<String>>>,
    pub down: Arc<AtomicBool>,
}

impl FakeTranslateApi {
    pub async fn start(&self) -> String {
        let app = Router::new()
            .route("/models/{*model}", post(translate_handler))
            .with_state(self.clone());
        serve(app).await
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

async fn translate_handler(
    State(api): State<FakeTranslateApi>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let input = body["inputs"].as_str().unwrap_or_default().to_string();
    api.inputs.lock().push(input.clone());
    if api.down.load(Ordering::SeqCst) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Model is currently loading" })),
        );
    }
    let text = match input.as_str() {
        "Hola" => "Привіт".to_string(),
        other => format!("{TRANSLATED_PREFIX}{other}"),
    };
    (StatusCode::OK, Json(json!([{ "translation_text": text }])))
}

pub fn translator(base_url: &str) -> HuggingFaceTranslator {
    HuggingFaceTranslator::new(base_url, DEFAULT_MODEL, "hf_test".into(), Duration::from_secs(5))
        .expect("translator client")
}

// ---------- Telegram Bot API ----------

#[derive(Debug, Clone)]
pub struct TgCall {
    pub method: String,
    pub body: Value,
}

#[derive(Clone, Default)]
pub struct FakeTelegram {
    pub calls: Arc<Mutex<Vec<TgCall>>>,
    pub updates: Arc<Mutex<Vec<Value>>>,
    reject_photos: Arc<AtomicBool>,
    fail_status: Arc<AtomicU16>,
    fail_remaining: Arc<AtomicUsize>,
}

impl FakeTelegram {
    pub async fn start(&self) -> String {
        let app = Router::new()
            .route("/{bot}/{method}", post(telegram_handler))
            .with_state(self.clone());
        serve(app).await
    }

    /// Answer the next `n` send calls with `status`.
    pub fn fail_next(&self, n: usize, status: u16) {
        self.fail_status.store(status, Ordering::SeqCst);
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn reject_photos(&self, reject: bool) {
        self.reject_photos.store(reject, Ordering::SeqCst);
    }

    pub fn push_message(&self, update_id: i64, chat_id: i64, text: &str) {
        self.updates.lock().push(json!({
            "update_id": update_id,
            "message": {
                "message_id": update_id,
                "chat": { "id": chat_id, "type": "private" },
                "text": text,
            }
        }));
    }

    /// Successful sendMessage/sendPhoto calls, in order.
    pub fn delivered(&self) -> Vec<TgCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == "sendMessage" || c.method == "sendPhoto")
            .filter(|c| c.body["ok_sent"].as_bool().unwrap_or(false))
            .cloned()
            .collect()
    }

    pub fn calls_to(&self, method: &str) -> Vec<TgCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }
}

async fn telegram_handler(
    State(tg): State<FakeTelegram>,
    Path((_bot, method)): Path<(String, String)>,
    Json(mut body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if method == "getUpdates" {
        let offset = body["offset"].as_i64().unwrap_or(0);
        let pending: Vec<Value> = tg
            .updates
            .lock()
            .iter()
            .filter(|u| u["update_id"].as_i64().unwrap_or(0) >= offset)
            .cloned()
            .collect();
        if pending.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tg.calls.lock().push(TgCall { method, body });
        return (StatusCode::OK, Json(json!({ "ok": true, "result": pending })));
    }

    let failing = tg
        .fail_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    let rejected_photo = method == "sendPhoto" && tg.reject_photos.load(Ordering::SeqCst);

    let resp = if failing {
        let status = StatusCode::from_u16(tg.fail_status.load(Ordering::SeqCst))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(json!({ "ok": false, "error_code": status.as_u16(), "description": "Internal Server Error" })),
        )
    } else if rejected_photo {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error_code": 400, "description": "Bad Request: wrong file identifier/HTTP URL specified" })),
        )
    } else {
        body["ok_sent"] = json!(true);
        (
            StatusCode::OK,
            Json(json!({ "ok": true, "result": { "message_id": 1 } })),
        )
    };
    tg.calls.lock().push(TgCall { method, body });
    resp
}

pub fn gateway(base_url: &str) -> TelegramGateway {
    TelegramGateway::new("123:abc".into())
        .with_api_base(base_url)
        .with_timeout(5)
        .with_retries(1)
}

// ---------- sources ----------

pub struct StaticProvider {
    pub name: String,
    pub items: Arc<Mutex<Vec<FeedItem>>>,
}

impl StaticProvider {
    pub fn new(name: &str, items: Vec<FeedItem>) -> (Self, Arc<Mutex<Vec<FeedItem>>>) {
        let shared = Arc::new(Mutex::new(items));
        (
            Self {
                name: name.into(),
                items: shared.clone(),
            },
            shared,
        )
    }
}

#[async_trait]
impl SourceProvider for StaticProvider {
    async fn fetch_latest(&self) -> Result<Vec<FeedItem>> {
        Ok(self.items.lock().clone())
    }
    fn name(&self) -> &str {
        &self.name
    }
}

pub struct FailingProvider;

#[async_trait]
impl SourceProvider for FailingProvider {
    async fn fetch_latest(&self) -> Result<Vec<FeedItem>> {
        anyhow::bail!("connection reset by peer")
    }
    fn name(&self) -> &str {
        "failing"
    }
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
}

pub fn item(slug: &str, title: &str, body: &str, published_at: DateTime<Utc>) -> FeedItem {
    FeedItem {
        source: "elpais.com".into(),
        title: title.into(),
        link: format!("https://elpais.com/{slug}.html"),
        raw_content: body.into(),
        published_at,
        image_url: None,
    }
}

pub async fn registry_with_chat() -> SubscriberRegistry {
    let subs = SubscriberRegistry::in_memory();
    subs.register(CHAT_ID).await;
    subs
}

/// Pipeline over real HTTP clients pointed at the fakes.
pub fn pipeline(
    providers: Vec<Box<dyn SourceProvider>>,
    store: Arc<dyn WatermarkStore>,
    translate_url: &str,
    telegram_url: &str,
    subscribers: SubscriberRegistry,
) -> Pipeline {
    Pipeline::new(
        providers,
        store,
        Arc::new(translator(translate_url)),
        Arc::new(gateway(telegram_url)),
        subscribers,
    )
    .with_fetch_timeout(Duration::from_secs(5))
}
