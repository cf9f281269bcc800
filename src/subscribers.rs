// src/subscribers.rs
//! Recipient registry. Chats register through `/start`; the most recent
//! registration is the primary recipient that pipeline runs deliver to.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub chat_id: i64,
    #[serde(default)]
    pub link_preview: bool,
    #[serde(default = "default_photos")]
    pub photos: bool,
    pub registered_at: DateTime<Utc>,
}

fn default_photos() -> bool {
    true
}

impl Subscriber {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            link_preview: false,
            photos: true,
            registered_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    // registration order; last entry is primary
    subs: Vec<Subscriber>,
}

/// Cheap to clone; all clones share state.
#[derive(Debug, Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<RwLock<Inner>>,
    path: Option<PathBuf>,
}

impl SubscriberRegistry {
    /// Registry with no persistence.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path` (missing or broken file → empty) and persist changes there.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let subs: Vec<Subscriber> = match fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                tracing::warn!(target: "bot", error = %e, "subscribers file unreadable, starting empty");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self {
            inner: Arc::new(RwLock::new(Inner { subs })),
            path: Some(path),
        }
    }

    /// Add or refresh `chat_id` and make it primary.
    pub async fn register(&self, chat_id: i64) -> Subscriber {
        let sub = {
            let mut g = self.inner.write();
            let sub = match g.subs.iter().position(|s| s.chat_id == chat_id) {
                Some(i) => {
                    let mut s = g.subs.remove(i);
                    s.registered_at = Utc::now();
                    s
                }
                None => Subscriber::new(chat_id),
            };
            g.subs.push(sub.clone());
            sub
        };
        self.save().await;
        sub
    }

    /// Remove `chat_id`. Returns whether it was registered.
    pub async fn unregister(&self, chat_id: i64) -> bool {
        let removed = {
            let mut g = self.inner.write();
            let before = g.subs.len();
            g.subs.retain(|s| s.chat_id != chat_id);
            before != g.subs.len()
        };
        if removed {
            self.save().await;
        }
        removed
    }

    pub fn primary(&self) -> Option<Subscriber> {
        let g = self.inner.read();
        g.subs.last().cloned()
    }

    pub fn all(&self) -> Vec<Subscriber> {
        let g = self.inner.read();
        g.subs.clone()
    }

    async fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let bytes = {
            let g = self.inner.read();
            serde_json::to_vec_pretty(&g.subs).unwrap_or_default()
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                tracing::warn!(target: "bot", "subscribers dir: {e:#}");
            }
        }
        if let Err(e) = fs::write(path, bytes).await {
            tracing::warn!(target: "bot", "write subscribers: {e:#}");
        }
    }
}
