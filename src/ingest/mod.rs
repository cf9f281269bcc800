// src/ingest/mod.rs
//! Incremental ingestion: fetch → dedupe by watermark → translate → deliver → commit.
//!
//! Items newer than the stored watermark are processed oldest first, one at a
//! time. An item is committed to the store only after the gateway confirmed its
//! delivery, so the watermark only ever moves past items that reached the chat.

pub mod config;
pub mod providers;
pub mod scheduler;
pub mod types;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::links::{self, LinkToken};
use crate::notify::{self, DeliveryGateway};
use crate::store::WatermarkStore;
use crate::subscribers::SubscriberRegistry;
use crate::translate::Translator;
use crate::ingest::types::{FeedItem, RunReport, SourceProvider, TranslatedArticle};

/// Longest body (in chars) sent for translation.
pub const MAX_BODY_CHARS: usize = 1500;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Pipeline runs started.");
        describe_counter!("ingest_items_fetched_total", "Items parsed from all providers.");
        describe_counter!(
            "ingest_items_fresh_total",
            "Items newer than the watermark."
        );
        describe_counter!("ingest_delivered_total", "Items confirmed by the gateway.");
        describe_counter!(
            "ingest_delivery_failed_total",
            "Items the gateway did not confirm."
        );
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider fetch/parse errors."
        );
        describe_counter!(
            "ingest_items_superseded_total",
            "Failed items a newer commit moved the watermark past."
        );
        describe_counter!("store_commit_errors_total", "Failed store writes.");
        describe_counter!(
            "translate_passthrough_total",
            "Texts delivered untranslated after a translation failure."
        );
        describe_histogram!("ingest_parse_ms", "Provider parse time in milliseconds.");
        describe_gauge!("ingest_watermark_ts", "Unix ts of the stored watermark.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when ingest pipeline last ran."
        );
    });
}

/// Decode entities, strip leftover tags, collapse whitespace, cap length.
/// `[LINK]` markers survive untouched.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[a-z][^>]*>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 4) Length cap, cut on a word boundary so a marker is never split
    if out.chars().count() > MAX_BODY_CHARS {
        let cut: String = out.chars().take(MAX_BODY_CHARS).collect();
        out = match cut.rfind(' ') {
            Some(i) if i > 0 => cut[..i].to_string(),
            _ => cut,
        };
        out.push('…');
    }

    out
}

/// Fetch every provider concurrently. A failing or slow provider contributes
/// nothing. Returns (items, provider_errors).
pub async fn fetch_all(
    providers: &[Box<dyn SourceProvider>],
    timeout: Duration,
) -> (Vec<FeedItem>, usize) {
    let results = join_all(providers.iter().map(|p| async move {
        let res = tokio::time::timeout(timeout, p.fetch_latest()).await;
        (p.name().to_string(), res)
    }))
    .await;

    let mut items = Vec::new();
    let mut errors = 0usize;
    for (name, res) in results {
        match res {
            Ok(Ok(mut v)) => {
                tracing::info!(target: "ingest", provider = %name, items = v.len(), "feed fetched");
                items.append(&mut v);
            }
            Ok(Err(e)) => {
                errors += 1;
                tracing::warn!(target: "ingest", provider = %name, error = ?e, "provider error");
                counter!("ingest_provider_errors_total").increment(1);
            }
            Err(_) => {
                errors += 1;
                tracing::warn!(target: "ingest", provider = %name, timeout_secs = timeout.as_secs(), "provider timed out");
                counter!("ingest_provider_errors_total").increment(1);
            }
        }
    }
    (items, errors)
}

/// Outcome of [`select_fresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Items strictly newer than the cutoff, oldest first.
    pub fresh: Vec<FeedItem>,
    /// Watermark the filter used.
    pub cutoff: Option<DateTime<Utc>>,
    /// True when no watermark was stored and the cutoff came from the batch.
    pub bootstrapped: bool,
}

/// Keep items newer than `watermark`. Without a watermark the newest item in the
/// batch becomes the cutoff, so a cold start delivers nothing. The same link
/// showing up in several feeds is kept once.
pub fn select_fresh(items: Vec<FeedItem>, watermark: Option<DateTime<Utc>>) -> Selection {
    let (cutoff, bootstrapped) = match watermark {
        Some(w) => (Some(w), false),
        None => (items.iter().map(|i| i.published_at).max(), true),
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut fresh: Vec<FeedItem> = items
        .into_iter()
        .filter(|i| cutoff.is_some_and(|c| i.published_at > c))
        .filter(|i| seen.insert(i.link.clone()))
        .collect();
    // stable: ties keep feed order
    fresh.sort_by_key(|i| i.published_at);

    Selection {
        fresh,
        cutoff,
        bootstrapped,
    }
}

/// Extract links, translate title and body independently, restore links.
/// Returns the article plus how many of the two texts went through untranslated.
pub async fn translate_item(translator: &dyn Translator, item: FeedItem) -> (TranslatedArticle, usize) {
    let extracted = links::extract(&item.raw_content);
    let body = normalize_text(&extracted.text);
    let tokens: Vec<LinkToken> = extracted
        .tokens
        .into_iter()
        .map(|t| LinkToken {
            display_text: normalize_text(&t.display_text),
            target_url: html_escape::decode_html_entities(t.target_url.trim()).to_string(),
        })
        .collect();

    let title = translator.translate(&normalize_text(&item.title)).await;
    let summary = translator.translate(&body).await;

    let markers = links::placeholder_count(summary.text());
    if markers != tokens.len() {
        tracing::warn!(
            target: "translate",
            id = %item.short_id(),
            markers,
            links = tokens.len(),
            "translation changed link markers; surplus markers dropped, missing links lost"
        );
    }

    let passed_through = [&title, &summary]
        .iter()
        .filter(|t| !t.is_translated())
        .count();
    let translated_summary = links::restore(summary.text(), &tokens);

    (
        TranslatedArticle {
            item,
            translated_title: title.into_text(),
            translated_summary,
            delivered_at: None,
        },
        passed_through,
    )
}

/// What a run does after a delivery failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log it and move on to the next item.
    #[default]
    Continue,
    /// Stop the item loop so nothing newer is committed past the failed item.
    Halt,
}

/// The ingestion pipeline with everything it talks to. Runs are serialised: the
/// store has exactly one writer at a time.
pub struct Pipeline {
    providers: Vec<Box<dyn SourceProvider>>,
    store: Arc<dyn WatermarkStore>,
    translator: Arc<dyn Translator>,
    gateway: Arc<dyn DeliveryGateway>,
    subscribers: SubscriberRegistry,
    fetch_timeout: Duration,
    on_failure: FailurePolicy,
    run_lock: tokio::sync::Mutex<()>,
}

impl Pipeline {
    pub fn new(
        providers: Vec<Box<dyn SourceProvider>>,
        store: Arc<dyn WatermarkStore>,
        translator: Arc<dyn Translator>,
        gateway: Arc<dyn DeliveryGateway>,
        subscribers: SubscriberRegistry,
    ) -> Self {
        Self {
            providers,
            store,
            translator,
            gateway,
            subscribers,
            fetch_timeout: Duration::from_secs(15),
            on_failure: FailurePolicy::Continue,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn WatermarkStore> {
        &self.store
    }

    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    /// Run once, waiting for any run already in progress to finish first.
    pub async fn run(&self, cancel: &CancellationToken) -> RunReport {
        let _guard = self.run_lock.lock().await;
        self.run_locked(cancel).await
    }

    /// Run once unless another run is in progress (then `None`).
    pub async fn try_run(&self, cancel: &CancellationToken) -> Option<RunReport> {
        let _guard = self.run_lock.try_lock().ok()?;
        Some(self.run_locked(cancel).await)
    }

    async fn run_locked(&self, cancel: &CancellationToken) -> RunReport {
        ensure_metrics_described();
        counter!("ingest_runs_total").increment(1);
        let mut report = RunReport::default();

        // FETCH
        let (items, provider_errors) = fetch_all(&self.providers, self.fetch_timeout).await;
        report.fetched = items.len();
        report.provider_errors = provider_errors;
        counter!("ingest_items_fetched_total").increment(items.len() as u64);

        // DEDUPE
        let selection = select_fresh(items, self.store.load().await);
        report.bootstrapped = selection.bootstrapped;
        report.fresh = selection.fresh.len();
        counter!("ingest_items_fresh_total").increment(selection.fresh.len() as u64);

        if selection.bootstrapped {
            if let Some(ts) = selection.cutoff {
                tracing::info!(target: "ingest", watermark = %ts, "no stored watermark, starting from newest item in feed");
                if let Err(e) = self.store.bootstrap(ts).await {
                    tracing::error!(target: "ingest", error = %e, "could not persist initial watermark");
                    counter!("store_commit_errors_total").increment(1);
                }
            }
        }

        // TRANSLATE → DELIVER → COMMIT, one item at a time
        let recipient = self.subscribers.primary();
        if recipient.is_none() && !selection.fresh.is_empty() {
            tracing::warn!(target: "ingest", fresh = selection.fresh.len(), "no subscriber registered; items stay pending");
        }

        // failed items a later commit would pass
        let mut failed_links: Vec<String> = Vec::new();

        for item in selection.fresh {
            if cancel.is_cancelled() {
                tracing::info!(target: "ingest", "run cancelled between items");
                report.cancelled = true;
                break;
            }

            let id = item.short_id();
            let (mut article, passed) = translate_item(self.translator.as_ref(), item).await;
            report.passed_through += passed;

            match notify::deliver(self.gateway.as_ref(), recipient.as_ref(), &article).await {
                Ok(()) => {
                    report.delivered += 1;
                    counter!("ingest_delivered_total").increment(1);
                    article.delivered_at = Some(Utc::now());
                    match self.store.commit(&article).await {
                        Ok(()) => {
                            tracing::info!(target: "ingest", %id, published_at = %article.published_at(), "article delivered");
                            for link in failed_links.drain(..) {
                                report.superseded += 1;
                                counter!("ingest_items_superseded_total").increment(1);
                                tracing::error!(
                                    target: "ingest",
                                    %link,
                                    watermark = %article.published_at(),
                                    "failed item passed by a newer commit; it will not be retried"
                                );
                            }
                        }
                        Err(e) => {
                            report.commit_failures += 1;
                            counter!("store_commit_errors_total").increment(1);
                            tracing::error!(target: "ingest", %id, error = %e, "delivered but not recorded; may be sent again next run");
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    counter!("ingest_delivery_failed_total").increment(1);
                    tracing::error!(target: "ingest", %id, error = %e, "delivery failed");
                    failed_links.push(article.item.link.clone());
                    if self.on_failure == FailurePolicy::Halt {
                        tracing::warn!(target: "ingest", "halting run after delivery failure");
                        break;
                    }
                }
            }
        }

        // DONE
        report.watermark = self.store.load().await;
        if let Some(w) = report.watermark {
            gauge!("ingest_watermark_ts").set(w.timestamp() as f64);
        }
        gauge!("ingest_pipeline_last_run_ts").set(Utc::now().timestamp() as f64);
        if let Err(e) = self.store.record_run(&report).await {
            tracing::warn!(target: "ingest", error = %e, "could not record run summary");
        }

        tracing::info!(
            target: "ingest",
            fetched = report.fetched,
            fresh = report.fresh,
            delivered = report.delivered,
            failed = report.failed,
            superseded = report.superseded,
            commit_failures = report.commit_failures,
            passed_through = report.passed_through,
            provider_errors = report.provider_errors,
            translator = self.translator.name(),
            "ingest run finished"
        );
        report
    }
}
