// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry as it came out of a feed. Immutable after fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    #[serde(default)]
    pub source: String, // provider name, e.g. "elpais.com"
    pub title: String,
    pub link: String,
    pub raw_content: String, // may contain inline HTML
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl FeedItem {
    /// Short stable id for logs; avoids dumping whole URLs/titles.
    pub fn short_id(&self) -> String {
        short_hash(&self.link)
    }
}

/// A feed item after translation. This is what gets delivered and recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TranslatedArticle {
    #[serde(flatten)]
    pub item: FeedItem,
    pub translated_title: String,
    pub translated_summary: String,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl TranslatedArticle {
    pub fn published_at(&self) -> DateTime<Utc> {
        self.item.published_at
    }
}

/// Counters for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub fetched: usize,
    pub fresh: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Failed items a later commit moved the watermark past; never retried.
    #[serde(default)]
    pub superseded: usize,
    pub commit_failures: usize,
    pub passed_through: usize,
    pub provider_errors: usize,
    pub bootstrapped: bool,
    pub cancelled: bool,
    pub watermark: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<FeedItem>>;
    fn name(&self) -> &str;
}

pub(crate) fn short_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
