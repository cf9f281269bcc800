//! Feed translator: binary entrypoint.
//! Polls the configured feeds, translates new items and posts them to Telegram.
//! Also runs the chat command loop and (optionally) the admin HTTP server.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_translator::api::{self, AppState};
use feed_translator::bot::CommandBot;
use feed_translator::config::AppConfig;
use feed_translator::ingest::providers::RssProvider;
use feed_translator::ingest::scheduler::{spawn_scheduler, IngestSchedulerCfg};
use feed_translator::ingest::types::SourceProvider;
use feed_translator::ingest::Pipeline;
use feed_translator::metrics::Metrics;
use feed_translator::notify::TelegramGateway;
use feed_translator::store::JsonFileStore;
use feed_translator::subscribers::SubscriberRegistry;
use feed_translator::translate::HuggingFaceTranslator;

/// `RUST_LOG` wins; otherwise our crate at info, everything else at warn.
/// `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("feed_translator=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let metrics = match Metrics::init(cfg.check_interval_secs) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "prometheus recorder not installed; /metrics disabled");
            None
        }
    };

    let store = JsonFileStore::open(&cfg.store_path).await;
    let subscribers = SubscriberRegistry::load(&cfg.subscribers_path).await;
    if let Some(chat_id) = cfg.telegram_chat_id {
        if subscribers.all().iter().all(|s| s.chat_id != chat_id) {
            subscribers.register(chat_id).await;
        }
    }

    let translator = HuggingFaceTranslator::new(
        &cfg.translate_base_url,
        &cfg.translate_model,
        cfg.huggingface_api_key.clone(),
        Duration::from_secs(cfg.translate_timeout_secs),
    )?;
    let gateway = TelegramGateway::new(cfg.telegram_bot_token.clone())
        .with_api_base(cfg.telegram_api_base.clone())
        .with_timeout(cfg.delivery_timeout_secs);

    let fetch_timeout = Duration::from_secs(cfg.fetch_timeout_secs);
    let providers: Vec<Box<dyn SourceProvider>> = cfg
        .feeds
        .iter()
        .map(|url| {
            RssProvider::from_url(url.clone(), fetch_timeout)
                .map(|p| Box::new(p) as Box<dyn SourceProvider>)
        })
        .collect::<anyhow::Result<_>>()?;

    tracing::info!(
        feeds = providers.len(),
        model = %cfg.translate_model,
        store = %store.path().display(),
        interval_secs = cfg.check_interval_secs,
        subscribers = subscribers.all().len(),
        "starting feed translator"
    );

    let pipeline = Arc::new(
        Pipeline::new(
            providers,
            Arc::new(store),
            Arc::new(translator),
            Arc::new(gateway.clone()),
            subscribers.clone(),
        )
        .with_fetch_timeout(fetch_timeout)
        .with_failure_policy(cfg.on_delivery_failure),
    );

    let cancel = CancellationToken::new();

    let scheduler = spawn_scheduler(
        IngestSchedulerCfg {
            interval_secs: cfg.check_interval_secs,
            run_at_start: true,
        },
        pipeline.clone(),
        cancel.clone(),
    );

    let bot = tokio::spawn(CommandBot::new(gateway, subscribers, pipeline.clone()).run(cancel.clone()));

    let admin = match cfg.admin_addr {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding admin server to {addr}"))?;
            let app = api::router(AppState {
                pipeline: pipeline.clone(),
                cancel: cancel.clone(),
                metrics: metrics.as_ref().map(|m| m.handle.clone()),
            });
            tracing::info!(%addr, "admin server listening");
            let shutdown = cancel.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
            }))
        }
        None => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested");
    cancel.cancel();

    let _ = scheduler.await;
    let _ = bot.await;
    if let Some(handle) = admin {
        match handle.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "admin server error"),
            Err(e) => tracing::warn!(error = %e, "admin server task failed"),
            Ok(Ok(())) => {}
        }
    }
    tracing::info!("bye");
    Ok(())
}
