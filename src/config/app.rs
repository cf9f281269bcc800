// src/config/app.rs
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::ingest::FailurePolicy;
use crate::{ingest, notify, translate};

/// Everything the binary needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telegram_bot_token: String,
    pub huggingface_api_key: String,
    /// Seed subscriber; otherwise recipients register via `/start`.
    pub telegram_chat_id: Option<i64>,
    pub feeds: Vec<String>,
    pub translate_model: String,
    pub translate_base_url: String,
    pub telegram_api_base: String,
    pub store_path: PathBuf,
    pub subscribers_path: PathBuf,
    pub check_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub translate_timeout_secs: u64,
    pub delivery_timeout_secs: u64,
    pub admin_addr: Option<SocketAddr>,
    pub on_delivery_failure: FailurePolicy,
}

impl AppConfig {
    /// Read from the process environment (call `dotenvy::dotenv()` first) and
    /// the feed list file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let feeds = ingest::config::load_feeds_default()?;
        Self::from_lookup(|k| std::env::var(k).ok(), feeds)
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F, feeds: Vec<String>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |k: &'static str| get(k).ok_or(ConfigError::Missing(k));
        let number = |k: &'static str, default: u64| -> Result<u64, ConfigError> {
            match get(k) {
                Some(v) => v.parse().map_err(|e| ConfigError::invalid(k, e)),
                None => Ok(default),
            }
        };

        let telegram_chat_id = match get("TELEGRAM_CHAT_ID") {
            Some(v) => Some(
                v.parse::<i64>()
                    .map_err(|e| ConfigError::invalid("TELEGRAM_CHAT_ID", e))?,
            ),
            None => None,
        };

        // ADMIN_ADDR="" disables the admin server; absent means the default.
        let admin_addr = match get("ADMIN_ADDR") {
            Some(v) => Some(
                v.parse::<SocketAddr>()
                    .map_err(|e| ConfigError::invalid("ADMIN_ADDR", e))?,
            ),
            None if lookup("ADMIN_ADDR").is_some() => None,
            None => Some(SocketAddr::from(([127, 0, 0, 1], 8080))),
        };

        let on_delivery_failure = match get("HALT_ON_DELIVERY_FAILURE").as_deref() {
            Some("1") | Some("true") => FailurePolicy::Halt,
            Some("0") | Some("false") | None => FailurePolicy::Continue,
            Some(other) => {
                return Err(ConfigError::invalid(
                    "HALT_ON_DELIVERY_FAILURE",
                    format!("expected 1/0/true/false, got {other:?}"),
                ))
            }
        };

        Ok(Self {
            telegram_bot_token: required("TELEGRAM_BOT_TOKEN")?,
            huggingface_api_key: required("HUGGINGFACE_API_KEY")?,
            telegram_chat_id,
            feeds,
            translate_model: get("TRANSLATE_MODEL")
                .unwrap_or_else(|| translate::DEFAULT_MODEL.to_string()),
            translate_base_url: get("TRANSLATE_BASE_URL")
                .unwrap_or_else(|| translate::DEFAULT_BASE_URL.to_string()),
            telegram_api_base: get("TELEGRAM_API_BASE")
                .unwrap_or_else(|| notify::telegram::DEFAULT_API_BASE.to_string()),
            store_path: get("STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("state/db.json")),
            subscribers_path: get("SUBSCRIBERS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("state/subscribers.json")),
            check_interval_secs: number("CHECK_INTERVAL_SECS", 900)?,
            fetch_timeout_secs: number("FETCH_TIMEOUT_SECS", 15)?,
            translate_timeout_secs: number("TRANSLATE_TIMEOUT_SECS", 20)?,
            delivery_timeout_secs: number("DELIVERY_TIMEOUT_SECS", 10)?,
            admin_addr,
            on_delivery_failure,
        })
    }
}
