// src/store.rs
//! Watermark store: last delivered `publishedAt` plus the delivery history.
//!
//! On disk this is one JSON document:
//!
//! ```json
//! { "articles": [ ... ], "lastProcessedDate": "2024-01-02T00:00:00Z", "lastRun": { ... } }
//! ```
//!
//! Reads never fail (missing, empty or broken files degrade to an empty document).
//! Writes go to a temp file that is fsynced and renamed over the original, so a
//! crash mid-write leaves the previous document intact.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::ingest::types::{RunReport, TranslatedArticle};

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Timestamp of the newest delivered item, if any was ever recorded.
    async fn load(&self) -> Option<DateTime<Utc>>;

    /// Seed the watermark on cold start. No-op if one is already stored.
    async fn bootstrap(&self, ts: DateTime<Utc>) -> Result<(), StoreError>;

    /// Record a confirmed delivery. The watermark and the history advance together;
    /// on `Err` neither has moved.
    async fn commit(&self, article: &TranslatedArticle) -> Result<(), StoreError>;

    /// Delivered articles, oldest commit first.
    async fn history(&self) -> Vec<TranslatedArticle>;

    /// Persist the summary of the last finished run.
    async fn record_run(&self, report: &RunReport) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDocument {
    // Kept as raw JSON so entries written by older versions survive rewrites.
    #[serde(default)]
    pub articles: Vec<serde_json::Value>,
    #[serde(default)]
    pub last_processed_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<LastRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastRun {
    pub finished_at: DateTime<Utc>,
    pub fresh: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl StoreDocument {
    fn apply_commit(&mut self, article: &TranslatedArticle) -> Result<(), StoreError> {
        self.articles.push(serde_json::to_value(article)?);
        let ts = article.published_at();
        self.last_processed_date = Some(match self.last_processed_date {
            Some(cur) if cur > ts => cur,
            _ => ts,
        });
        Ok(())
    }

    fn parsed_articles(&self) -> Vec<TranslatedArticle> {
        self.articles
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect()
    }
}

/// Parse a store document, tolerating junk. Never fails.
pub fn parse_document(raw: &str) -> StoreDocument {
    if raw.trim().is_empty() {
        tracing::warn!(target: "store", "store file is empty, starting from an empty document");
        return StoreDocument::default();
    }
    match serde_json::from_str::<StoreDocument>(raw) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::error!(target: "store", error = %e, "store file unreadable, starting from an empty document");
            StoreDocument::default()
        }
    }
}

/// JSON document on the local filesystem.
pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<StoreDocument>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => parse_document(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(target: "store", path = %path.display(), "store file does not exist yet, starting empty");
                StoreDocument::default()
            }
            Err(e) => {
                tracing::error!(target: "store", path = %path.display(), error = %e, "store file unreadable, starting empty");
                StoreDocument::default()
            }
        };
        Self {
            path,
            doc: Mutex::new(doc),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> StoreDocument {
        self.doc.lock().await.clone()
    }

    async fn persist(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(doc)?).await
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    let mut f = tokio::fs::File::create(&tmp).await?;
    f.write_all(bytes).await?;
    f.sync_all().await?;
    drop(f);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl WatermarkStore for JsonFileStore {
    async fn load(&self) -> Option<DateTime<Utc>> {
        self.doc.lock().await.last_processed_date
    }

    async fn bootstrap(&self, ts: DateTime<Utc>) -> Result<(), StoreError> {
        let mut guard = self.doc.lock().await;
        if guard.last_processed_date.is_some() {
            return Ok(());
        }
        let mut next = guard.clone();
        next.last_processed_date = Some(ts);
        self.persist(&next).await?;
        *guard = next;
        Ok(())
    }

    async fn commit(&self, article: &TranslatedArticle) -> Result<(), StoreError> {
        let mut guard = self.doc.lock().await;
        let mut next = guard.clone();
        next.apply_commit(article)?;
        self.persist(&next).await?;
        *guard = next;
        tracing::debug!(target: "store", id = %article.item.short_id(), watermark = ?guard.last_processed_date, "committed");
        Ok(())
    }

    async fn history(&self) -> Vec<TranslatedArticle> {
        self.doc.lock().await.parsed_articles()
    }

    async fn record_run(&self, report: &RunReport) -> Result<(), StoreError> {
        let mut guard = self.doc.lock().await;
        let mut next = guard.clone();
        next.last_run = Some(LastRun {
            finished_at: Utc::now(),
            fresh: report.fresh,
            delivered: report.delivered,
            failed: report.failed,
        });
        self.persist(&next).await?;
        *guard = next;
        Ok(())
    }
}

/// In-memory store for tests and dry runs. `fail_writes` simulates a full disk.
#[derive(Default)]
pub struct MemoryStore {
    doc: Mutex<StoreDocument>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watermark(ts: DateTime<Utc>) -> Self {
        Self {
            doc: Mutex::new(StoreDocument {
                last_processed_date: Some(ts),
                ..StoreDocument::default()
            }),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("simulated write failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for MemoryStore {
    async fn load(&self) -> Option<DateTime<Utc>> {
        self.doc.lock().await.last_processed_date
    }

    async fn bootstrap(&self, ts: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut g = self.doc.lock().await;
        if g.last_processed_date.is_none() {
            g.last_processed_date = Some(ts);
        }
        Ok(())
    }

    async fn commit(&self, article: &TranslatedArticle) -> Result<(), StoreError> {
        self.check_writable()?;
        self.doc.lock().await.apply_commit(article)
    }

    async fn history(&self) -> Vec<TranslatedArticle> {
        self.doc.lock().await.parsed_articles()
    }

    async fn record_run(&self, report: &RunReport) -> Result<(), StoreError> {
        self.check_writable()?;
        self.doc.lock().await.last_run = Some(LastRun {
            finished_at: Utc::now(),
            fresh: report.fresh,
            delivered: report.delivered,
            failed: report.failed,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::FeedItem;
    use chrono::TimeZone;

    fn article(day: u32) -> TranslatedArticle {
        TranslatedArticle {
            item: FeedItem {
                source: "t".into(),
                title: format!("t{day}"),
                link: format!("https://x.com/{day}"),
                raw_content: String::new(),
                published_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
                image_url: None,
            },
            translated_title: format!("tt{day}"),
            translated_summary: String::new(),
            delivered_at: None,
        }
    }

    #[test]
    fn parse_tolerates_empty_and_garbage() {
        assert!(parse_document("").last_processed_date.is_none());
        assert!(parse_document("   \n").articles.is_empty());
        assert!(parse_document("{not json").last_processed_date.is_none());
    }

    #[test]
    fn parse_reads_legacy_document() {
        let raw = r#"{
            "articles": [{"title": "old", "pubDate": "2024-01-01T00:00:00.000Z"}],
            "lastProcessedDate": "2024-01-01T10:00:00.000Z"
        }"#;
        let doc = parse_document(raw);
        assert_eq!(
            doc.last_processed_date,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(doc.articles.len(), 1);
        // legacy entries are preserved but not surfaced as typed history
        assert!(doc.parsed_articles().is_empty());
    }

    #[tokio::test]
    async fn watermark_never_decreases() {
        let store = MemoryStore::new();
        store.commit(&article(5)).await.unwrap();
        store.commit(&article(3)).await.unwrap();
        assert_eq!(
            store.load().await,
            Some(Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap())
        );
        assert_eq!(store.history().await.len(), 2);
    }

    #[tokio::test]
    async fn bootstrap_only_seeds_empty_store() {
        let store = MemoryStore::new();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.bootstrap(t1).await.unwrap();
        store
            .bootstrap(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(store.load().await, Some(t1));
        assert!(store.history().await.is_empty());
    }

    #[tokio::test]
    async fn failed_write_does_not_advance() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.commit(&article(2)).await.is_err());
        assert!(store.load().await.is_none());
        assert!(store.history().await.is_empty());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("db.json");

        let store = JsonFileStore::open(&path).await;
        assert!(store.load().await.is_none());
        store.commit(&article(2)).await.unwrap();
        store.commit(&article(4)).await.unwrap();
        store.record_run(&RunReport { delivered: 2, ..Default::default() }).await.unwrap();

        let reopened = JsonFileStore::open(&path).await;
        assert_eq!(
            reopened.load().await,
            Some(Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap())
        );
        let hist = reopened.history().await;
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[0].translated_title, "tt2");
        assert_eq!(reopened.snapshot().await.last_run.unwrap().delivered, 2);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn file_store_write_failure_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = dir.path().join("db.json");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("blocker"), b"x").unwrap();

        let store = JsonFileStore::open(&path).await;
        assert!(store.commit(&article(2)).await.is_err());
        assert!(store.load().await.is_none());
        assert!(store.history().await.is_empty());
    }
}
