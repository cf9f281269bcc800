// src/ingest/config.rs
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const ENV_PATH: &str = "FEEDS_PATH";

/// Used when no feed list is configured anywhere.
pub const DEFAULT_FEEDS: &[&str] =
    &["https://feeds.elpais.com/mrss-s/pages/ep/site/elpais.com/portada"];

/// Load feed URLs from an explicit path. Supports TOML (`feeds = [...]`) or a JSON array.
pub fn load_feeds_from(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = fs::read_to_string(path)
        .map_err(|e| ConfigError::Feeds(format!("reading {}: {e}", path.display())))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let feeds = parse_feeds(&content, ext.as_str())?;
    if feeds.is_empty() {
        return Err(ConfigError::Feeds(format!("{} lists no feeds", path.display())));
    }
    Ok(feeds)
}

/// Load feed URLs using env var + fallbacks:
/// 1) $FEEDS_PATH
/// 2) config/feeds.toml
/// 3) config/feeds.json
/// 4) built-in default
pub fn load_feeds_default() -> Result<Vec<String>, ConfigError> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_feeds_from(&pb);
        } else {
            return Err(ConfigError::Feeds(
                "FEEDS_PATH points to non-existent path".into(),
            ));
        }
    }
    let toml_p = PathBuf::from("config/feeds.toml");
    if toml_p.exists() {
        return load_feeds_from(&toml_p);
    }
    let json_p = PathBuf::from("config/feeds.json");
    if json_p.exists() {
        return load_feeds_from(&json_p);
    }
    Ok(DEFAULT_FEEDS.iter().map(|s| s.to_string()).collect())
}

fn parse_feeds(s: &str, hint_ext: &str) -> Result<Vec<String>, ConfigError> {
    // Try TOML first if hinted or content looks like toml.
    let try_toml = hint_ext == "toml" || s.contains("feeds");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(ConfigError::Feeds("unsupported feed list format".into()))
}

fn parse_toml(s: &str) -> Result<Vec<String>, toml::de::Error> {
    #[derive(serde::Deserialize)]
    struct TomlFeeds {
        feeds: Vec<String>,
    }
    let v: TomlFeeds = toml::from_str(s)?;
    Ok(clean_list(v.feeds))
}

fn parse_json(s: &str) -> Result<Vec<String>, serde_json::Error> {
    let v: Vec<String> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

// Trim, drop blanks, drop duplicates; first occurrence wins so order is kept.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}
