// src/translate.rs
//! Translator adapter: wraps the hosted inference endpoint and never fails.
//!
//! Any problem with the remote call (transport, timeout, non-2xx, unexpected
//! body) hands the original text back tagged as [`Translation::PassedThrough`],
//! so delivery is never blocked on translation.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";
/// Spanish → Ukrainian.
pub const DEFAULT_MODEL: &str = "Helsinki-NLP/opus-mt-es-uk";

/// Outcome of a translation attempt. Both variants carry usable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translation {
    Translated(String),
    PassedThrough(String),
}

impl Translation {
    pub fn text(&self) -> &str {
        match self {
            Translation::Translated(s) | Translation::PassedThrough(s) => s,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Translation::Translated(s) | Translation::PassedThrough(s) => s,
        }
    }

    pub fn is_translated(&self) -> bool {
        matches!(self, Translation::Translated(_))
    }
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> Translation;
    fn name(&self) -> &'static str;
}

/// Returns input unchanged; used for dry runs and when translation is disabled.
pub struct PassthroughTranslator;

#[async_trait]
impl Translator for PassthroughTranslator {
    async fn translate(&self, text: &str) -> Translation {
        Translation::PassedThrough(text.to_string())
    }
    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Hugging Face inference API client for a fixed source/target model.
pub struct HuggingFaceTranslator {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct Req<'a> {
    inputs: &'a str,
}

#[derive(Deserialize)]
struct RespItem {
    translation_text: Option<String>,
}

impl HuggingFaceTranslator {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("feed-translator/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5).min(timeout))
            .timeout(timeout)
            .build()
            .context("building translation http client")?;
        let endpoint = format!("{}/models/{}", base_url.trim_end_matches('/'), model);
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, text: &str) -> anyhow::Result<String> {
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Req { inputs: text })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("translation endpoint returned {status}: {}", truncate(&body, 200));
        }

        let items: Vec<RespItem> = resp.json().await?;
        match items.into_iter().next().and_then(|i| i.translation_text) {
            Some(t) if !t.trim().is_empty() => Ok(t),
            _ => anyhow::bail!("empty translation response"),
        }
    }
}

#[async_trait]
impl Translator for HuggingFaceTranslator {
    async fn translate(&self, text: &str) -> Translation {
        if text.trim().is_empty() {
            return Translation::PassedThrough(text.to_string());
        }
        match self.call(text).await {
            Ok(t) => Translation::Translated(t),
            Err(e) => {
                tracing::warn!(target: "translate", error = %e, chars = text.chars().count(), "translation failed, passing text through");
                counter!("translate_passthrough_total").increment(1);
                Translation::PassedThrough(text.to_string())
            }
        }
    }

    fn name(&self) -> &'static str {
        "huggingface"
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
