// src/ingest/providers/rss.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::histogram;
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::types::{FeedItem, SourceProvider};

/// Body used when an item carries neither a description nor encoded content.
pub const NO_DESCRIPTION: &str = "Без опису";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded", alias = "encoded")]
    content_encoded: Option<String>,
    #[serde(rename = "media:content", alias = "content", default)]
    media: Vec<Media>,
    #[serde(default)]
    enclosure: Vec<Enclosure>,
}

#[derive(Debug, Deserialize)]
struct Media {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
    #[serde(rename = "@medium")]
    medium: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

fn parse_pub_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let unix = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .map(|dt| dt.unix_timestamp())
        .ok()
        // chrono is more lenient with obsolete zone names (EST, PDT, ...)
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts)
                .ok()
                .map(|dt| dt.timestamp())
        })?;
    DateTime::from_timestamp(unix, 0)
}

fn img_src_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<img[^>]+src\s*=\s*["']([^"']+)["']"#).expect("img regex"))
}

fn is_image(mime: Option<&str>, medium: Option<&str>) -> bool {
    match (mime, medium) {
        (_, Some(m)) => m.eq_ignore_ascii_case("image"),
        (Some(t), None) => t.to_ascii_lowercase().starts_with("image/"),
        (None, None) => true,
    }
}

/// First inline `<img>`, then an image `media:content`, then an image enclosure.
fn pick_image(it: &Item) -> Option<String> {
    let inline = [it.content_encoded.as_deref(), it.description.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|html| img_src_re().captures(html).map(|c| c[1].to_string()));
    if inline.is_some() {
        return inline;
    }
    if let Some(url) = it
        .media
        .iter()
        .filter(|m| is_image(m.mime.as_deref(), m.medium.as_deref()))
        .find_map(|m| m.url.clone())
    {
        return Some(url);
    }
    it.enclosure
        .iter()
        .filter(|e| {
            e.mime
                .as_deref()
                .is_some_and(|t| t.to_ascii_lowercase().starts_with("image/"))
        })
        .find_map(|e| e.url.clone())
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

/// RSS 2.0 (incl. Media RSS) feed, read over HTTP or from an in-memory fixture.
pub struct RssProvider {
    name: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssProvider {
    pub fn from_fixture(name: impl Into<String>, xml: &str) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    /// Fails only if the HTTP client cannot be built (e.g. no TLS backend).
    pub fn from_url(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        let name = reqwest::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.clone());
        let client = reqwest::Client::builder()
            .user_agent(concat!("feed-translator/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .with_context(|| format!("building http client for {name}"))?;
        Ok(Self {
            name,
            mode: Mode::Http { url, client },
        })
    }

    fn parse_items_from_str(&self, s: &str) -> Result<Vec<FeedItem>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean).with_context(|| format!("parsing {} rss xml", self.name))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let Some(link) = non_blank(it.link.clone()) else {
                tracing::debug!(target: "ingest", provider = %self.name, "item without link skipped");
                continue;
            };
            let Some(published_at) = it.pub_date.as_deref().and_then(parse_pub_date) else {
                tracing::warn!(target: "ingest", provider = %self.name, link = %link, "item without usable pubDate skipped");
                continue;
            };
            let image_url = pick_image(&it);
            let raw_content = non_blank(it.description)
                .or(non_blank(it.content_encoded))
                .unwrap_or_else(|| NO_DESCRIPTION.to_string());

            out.push(FeedItem {
                source: self.name.clone(),
                title: it.title.unwrap_or_default().trim().to_string(),
                link: link.trim().to_string(),
                raw_content,
                published_at,
                image_url,
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for RssProvider {
    async fn fetch_latest(&self) -> Result<Vec<FeedItem>> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http { url, client } => {
                let body = client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .with_context(|| format!("rss http get {url}"))?
                    .text()
                    .await
                    .context("rss http .text()")?;
                self.parse_items_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// HTML entities that are not valid XML and break the parser outside CDATA.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&laquo;", "«")
        .replace("&raquo;", "»")
}
