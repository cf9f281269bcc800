// src/notify/mod.rs
//! Delivery gateway: pushes a translated article to one chat.

pub mod telegram;

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::ingest::types::TranslatedArticle;
use crate::subscribers::Subscriber;

pub use telegram::TelegramGateway;

/// Telegram limits, in characters.
pub const MAX_TEXT_CHARS: usize = 4096;
pub const MAX_CAPTION_CHARS: usize = 1024;

pub const READ_MORE: &str = "Читати більше";

#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    async fn send_text(
        &self,
        chat_id: i64,
        markdown: &str,
        suppress_link_preview: bool,
    ) -> Result<(), DeliveryError>;

    async fn send_photo(
        &self,
        chat_id: i64,
        image_url: &str,
        markdown_caption: &str,
    ) -> Result<(), DeliveryError>;
}

/// Escape legacy-Markdown control characters.
pub fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `📰 *title*\n\nsummary\n\n[Читати більше](link)`, with the summary cut so the
/// whole message fits in `max_chars`.
pub fn format_article(article: &TranslatedArticle, max_chars: usize) -> String {
    let head = format!("📰 *{}*\n\n", escape_markdown(&article.translated_title));
    let tail = format!("\n\n[{READ_MORE}]({})", article.item.link);
    let budget = max_chars.saturating_sub(head.chars().count() + tail.chars().count());

    let summary = escape_markdown(article.translated_summary.trim());
    let summary = if summary.chars().count() > budget {
        let mut cut: String = summary.chars().take(budget.saturating_sub(1)).collect();
        // never leave a dangling escape
        if cut.ends_with('\\') {
            cut.pop();
        }
        cut.push('…');
        cut
    } else {
        summary
    };

    format!("{head}{summary}{tail}")
}

/// Route one article to `recipient`. `Ok` only on confirmed delivery.
///
/// Articles with an image go out as photo + caption; if that is rejected the
/// text path is tried before giving up.
pub async fn deliver(
    gateway: &dyn DeliveryGateway,
    recipient: Option<&Subscriber>,
    article: &TranslatedArticle,
) -> Result<(), DeliveryError> {
    let Some(sub) = recipient else {
        return Err(DeliveryError::NoRecipient);
    };

    let image = article
        .item
        .image_url
        .as_deref()
        .filter(|u| !u.trim().is_empty() && sub.photos);

    if let Some(url) = image {
        let caption = format_article(article, MAX_CAPTION_CHARS);
        match gateway.send_photo(sub.chat_id, url, &caption).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(target: "notify", id = %article.item.short_id(), error = %e, "photo delivery failed, retrying as text");
            }
        }
    }

    let text = format_article(article, MAX_TEXT_CHARS);
    gateway
        .send_text(sub.chat_id, &text, !sub.link_preview)
        .await
}
